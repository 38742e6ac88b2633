use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};

use activity_api::{ActivityRecord, PersistError, SearchIndexer};

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

/// Elasticsearch/OpenSearch-совместимый document API.
///
/// Отсутствие секции, `url` или пустой `url` выключает индексацию целиком.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct SearchConfig {
    /// Базовый URL кластера, e.g. `http://localhost:9200`.
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_index")]
    pub index: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl SearchConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: default_index(),
            username: None,
            password: None,
            timeout_secs: default_timeout_secs(),
            accept_invalid_certs: false,
        }
    }

    /// Задан ли backend вообще.
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

fn default_index() -> String {
    "activity-logs".into()
}
fn default_timeout_secs() -> u64 {
    10
}

// ═══════════════════════════════════════════════════════════════
//  HttpSearchIndexer
// ═══════════════════════════════════════════════════════════════

/// Индексирует один документ на событие: `POST {url}/{index}/_doc`.
///
/// id документа генерирует кластер; связи с relational строкой нет.
pub struct HttpSearchIndexer {
    http: reqwest::Client,
    doc_url: String,
    index: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpSearchIndexer {
    pub fn new(cfg: &SearchConfig) -> Result<Self, PersistError> {
        if cfg.index.is_empty() || cfg.index.contains('/') {
            return Err(PersistError::config(format!("invalid index name '{}'", cfg.index)));
        }
        let base = reqwest::Url::parse(&cfg.url)
            .map_err(|e| PersistError::config(format!("search url '{}': {e}", cfg.url)))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .danger_accept_invalid_certs(cfg.accept_invalid_certs)
            .build()
            .map_err(|e| PersistError::config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            doc_url: format!("{}/{}/_doc", base.as_str().trim_end_matches('/'), cfg.index),
            index: cfg.index.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
        })
    }

    async fn post(&self, doc: &serde_json::Value) -> Result<(), PersistError> {
        let mut req = self.http.post(&self.doc_url).json(doc);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_ref());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| PersistError::io(format!("search request: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(PersistError::io(format!("search index {}: {status}: {body}", self.index)))
    }
}

impl SearchIndexer for HttpSearchIndexer {
    fn index<'a>(
        &'a self,
        record: &'a ActivityRecord,
        timestamp: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>> {
        Box::pin(async move {
            let doc = record.search_document(timestamp);
            self.post(&doc).await
        })
    }
}
