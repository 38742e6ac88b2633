use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::PersistError;

// ════════════════════════════════════════════════════════════════
//  Activity Record
// ════════════════════════════════════════════════════════════════

/// Одно событие активности пользователя, как его прислал producer.
///
/// Поля опциональны на уровне wire: отсутствие поля не ошибка декодирования,
/// решение принимает `ValidationPolicy`. `id` и `timestamp` сюда не входят —
/// их генерирует каждый sink сам в момент записи.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
}

impl ActivityRecord {
    /// Полностью заполненная запись.
    pub fn new(
        user_id: impl Into<String>,
        url: impl Into<String>,
        process_type: impl Into<String>,
        response_time_ms: f64,
    ) -> Self {
        Self {
            user_id: Some(user_id.into()),
            url: Some(url.into()),
            process_type: Some(process_type.into()),
            response_time_ms: Some(response_time_ms),
        }
    }

    /// Декодировать payload из канала.
    ///
    /// Поддерживаются два варианта:
    /// 1. `{"userId":..,"url":..,"processType":..,"responseTimeMs":..}` — голый объект
    /// 2. `{"pattern":"..","data":{...}}` — envelope microservice-клиентов
    pub fn decode(payload: &[u8]) -> Result<Self, PersistError> {
        let raw: serde_json::Value = serde_json::from_slice(payload)?;

        let body = match raw {
            serde_json::Value::Object(mut map) => {
                let envelope = map.contains_key("pattern")
                    && map.get("data").is_some_and(|d| d.is_object());
                if envelope {
                    map.remove("data").unwrap_or_default()
                } else {
                    serde_json::Value::Object(map)
                }
            }
            other => {
                return Err(PersistError::format_err(format!(
                    "expected JSON object, got {}",
                    json_type_name(&other)
                )));
            }
        };

        Ok(serde_json::from_value(body)?)
    }

    /// Имена обязательных полей, которых нет в записи. Пустой `userId`
    /// считается отсутствующим.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.user_id.as_deref().is_none_or(str::is_empty) {
            missing.push("userId");
        }
        if self.url.is_none() {
            missing.push("url");
        }
        if self.process_type.is_none() {
            missing.push("processType");
        }
        if self.response_time_ms.is_none() {
            missing.push("responseTimeMs");
        }
        missing
    }

    /// Проверка перед записью. Ошибка вида `Rejected` со списком полей.
    pub fn validate(&self) -> Result<(), PersistError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PersistError::rejected(format!(
                "missing required fields: {}",
                missing.join(", ")
            )))
        }
    }

    /// Документ для search index: все входные поля + собственный `timestamp`
    /// индексатора (RFC 3339, UTC, миллисекунды).
    pub fn search_document(&self, timestamp: DateTime<Utc>) -> serde_json::Value {
        let mut doc = serde_json::Map::new();
        if let Some(v) = &self.user_id {
            doc.insert("userId".into(), v.clone().into());
        }
        if let Some(v) = &self.url {
            doc.insert("url".into(), v.clone().into());
        }
        if let Some(v) = &self.process_type {
            doc.insert("processType".into(), v.clone().into());
        }
        if let Some(v) = self.response_time_ms {
            doc.insert("responseTimeMs".into(), number(v));
        }
        doc.insert(
            "timestamp".into(),
            timestamp.to_rfc3339_opts(SecondsFormat::Millis, true).into(),
        );
        serde_json::Value::Object(doc)
    }
}

/// Целые длительности остаются целыми в документе.
fn number(v: f64) -> serde_json::Value {
    if v.fract() == 0.0 && v.abs() < i64::MAX as f64 {
        serde_json::Value::from(v as i64)
    } else {
        serde_json::Number::from_f64(v)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    }
}

fn json_type_name(v: &serde_json::Value) -> &'static str {
    match v {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// Результат успешной записи в relational store: значения, которые
/// сгенерировала база.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredActivity {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
}

// ════════════════════════════════════════════════════════════════
//  Validation Policy
// ════════════════════════════════════════════════════════════════

/// Что делать с записью, у которой нет обязательных полей.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Отклонить до любой записи, залогировать warning.
    #[default]
    Strict,
    /// Отдать sink'ам как есть: relational store упадёт на NOT NULL,
    /// search document проиндексируется без отсутствующих полей.
    Passthrough,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn decodes_bare_object() {
        let rec = ActivityRecord::decode(
            br#"{"userId":"user-123","url":"/api/endpoint","processType":"GET","responseTimeMs":42}"#,
        )
        .unwrap();
        assert_eq!(rec, ActivityRecord::new("user-123", "/api/endpoint", "GET", 42.0));
        assert!(rec.validate().is_ok());
    }

    #[test]
    fn decodes_envelope() {
        let rec = ActivityRecord::decode(
            br#"{"pattern":"activity_log","data":{"userId":"u1","url":"/x","processType":"POST","responseTimeMs":7.5},"id":"abc"}"#,
        )
        .unwrap();
        assert_eq!(rec.user_id.as_deref(), Some("u1"));
        assert_eq!(rec.response_time_ms, Some(7.5));
    }

    #[test]
    fn object_with_data_but_no_pattern_is_not_an_envelope() {
        let rec = ActivityRecord::decode(br#"{"userId":"u1","data":{"userId":"u2"}}"#).unwrap();
        assert_eq!(rec.user_id.as_deref(), Some("u1"));
    }

    #[test]
    fn wrong_field_type_is_format_error() {
        let err = ActivityRecord::decode(br#"{"userId":"u1","responseTimeMs":"slow"}"#).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);

        let err = ActivityRecord::decode(b"[1,2,3]").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);

        let err = ActivityRecord::decode(b"not json").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Format);
    }

    #[test]
    fn missing_fields_are_reported_not_decode_errors() {
        let rec = ActivityRecord::decode(br#"{"userId":"","url":"/x"}"#).unwrap();
        assert_eq!(rec.missing_fields(), vec!["userId", "processType", "responseTimeMs"]);

        let err = rec.validate().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Rejected);
        assert!(err.message().contains("processType"));
    }

    #[test]
    fn search_document_carries_own_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap();
        let doc = ActivityRecord::new("user-123", "/api/endpoint", "GET", 42.0).search_document(ts);
        assert_eq!(
            doc,
            serde_json::json!({
                "userId": "user-123",
                "url": "/api/endpoint",
                "processType": "GET",
                "responseTimeMs": 42,
                "timestamp": "2024-05-01T12:30:00.000Z",
            })
        );
    }

    #[test]
    fn search_document_omits_missing_fields() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        let rec = ActivityRecord { user_id: Some("u".into()), response_time_ms: Some(1.25), ..Default::default() };
        let doc = rec.search_document(ts);
        let obj = doc.as_object().unwrap();
        assert!(!obj.contains_key("url"));
        assert_eq!(obj["responseTimeMs"], serde_json::json!(1.25));
    }

    #[test]
    fn validation_policy_parses_snake_case() {
        #[derive(Deserialize)]
        struct W {
            v: ValidationPolicy,
        }
        let w: W = serde_json::from_str(r#"{"v":"passthrough"}"#).unwrap();
        assert_eq!(w.v, ValidationPolicy::Passthrough);
        assert_eq!(ValidationPolicy::default(), ValidationPolicy::Strict);
    }
}
