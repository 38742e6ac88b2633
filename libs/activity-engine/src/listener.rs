use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;

use activity_api::{
    ActivityHandler, ActivityRecord, IdentityScopes, PersistError, RelationalWriter,
    SearchIndexer, StoredActivity, ValidationPolicy,
};

// ═══════════════════════════════════════════════════════════════
//  Outcomes
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum RelationalOutcome {
    Succeeded(StoredActivity),
    Failed(PersistError),
    /// Запись не прошла валидацию, ни один sink не вызывался.
    Rejected(PersistError),
}

#[derive(Debug, Clone)]
pub enum SearchOutcome {
    Succeeded,
    Failed(PersistError),
    /// Indexer не сконфигурирован (или запись отклонена).
    Skipped,
}

/// Что произошло с одним событием. Только для наблюдения: handler
/// не возвращает ошибок вызывающему.
#[derive(Debug, Clone)]
pub struct HandleReport {
    pub relational: RelationalOutcome,
    pub search: SearchOutcome,
}

// ═══════════════════════════════════════════════════════════════
//  ActivityListener
// ═══════════════════════════════════════════════════════════════

/// Listener событий активности: relational запись внутри identity scope,
/// затем search запись. Ошибки одного sink'а не влияют на другой и
/// никогда не выходят наружу. Retry и dead-letter нет.
pub struct ActivityListener {
    writer: Arc<dyn RelationalWriter>,
    indexer: Option<Arc<dyn SearchIndexer>>,
    scopes: IdentityScopes,
    validation: ValidationPolicy,
}

impl ActivityListener {
    pub fn new(
        writer: Arc<dyn RelationalWriter>,
        indexer: Option<Arc<dyn SearchIndexer>>,
        validation: ValidationPolicy,
    ) -> Self {
        Self {
            writer,
            indexer,
            scopes: IdentityScopes::new(),
            validation,
        }
    }

    /// Использовать внешний источник scope'ов (общий счётчик).
    pub fn with_scopes(mut self, scopes: IdentityScopes) -> Self {
        self.scopes = scopes;
        self
    }

    pub fn scopes(&self) -> &IdentityScopes {
        &self.scopes
    }

    /// Обработать одно событие. Всегда доходит до конца.
    pub async fn process(&self, record: ActivityRecord) -> HandleReport {
        tracing::info!(
            user_id = record.user_id.as_deref().unwrap_or(""),
            url = record.url.as_deref().unwrap_or(""),
            process_type = record.process_type.as_deref().unwrap_or(""),
            "activity received"
        );

        if self.validation == ValidationPolicy::Strict {
            if let Err(e) = record.validate() {
                tracing::warn!(
                    user_id = record.user_id.as_deref().unwrap_or(""),
                    error = %e,
                    "activity rejected"
                );
                return HandleReport {
                    relational: RelationalOutcome::Rejected(e),
                    search: SearchOutcome::Skipped,
                };
            }
        }

        let relational = self.write_relational(&record).await;
        let search = self.write_search(&record).await;

        HandleReport { relational, search }
    }

    async fn write_relational(&self, record: &ActivityRecord) -> RelationalOutcome {
        let user_id = record.user_id.as_deref().unwrap_or_default();
        let result = {
            let scope = self.scopes.open(user_id);
            self.writer.insert(&scope, record).await
            // scope closes here on every path
        };

        match result {
            Ok(stored) => {
                tracing::info!(
                    id = stored.id,
                    user_id,
                    "activity saved to relational store"
                );
                RelationalOutcome::Succeeded(stored)
            }
            Err(e) => {
                tracing::error!(user_id, error = ?e, "failed to save activity to relational store");
                RelationalOutcome::Failed(e)
            }
        }
    }

    async fn write_search(&self, record: &ActivityRecord) -> SearchOutcome {
        let Some(indexer) = &self.indexer else {
            tracing::debug!("search indexer not configured, skipping");
            return SearchOutcome::Skipped;
        };

        let user_id = record.user_id.as_deref().unwrap_or_default();
        match indexer.index(record, Utc::now()).await {
            Ok(()) => {
                tracing::info!(user_id, "activity indexed");
                SearchOutcome::Succeeded
            }
            Err(e) => {
                tracing::warn!(user_id, error = ?e, "failed to index activity");
                SearchOutcome::Failed(e)
            }
        }
    }
}

impl ActivityHandler for ActivityListener {
    fn handle(&self, record: ActivityRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.process(record).await;
        })
    }
}
