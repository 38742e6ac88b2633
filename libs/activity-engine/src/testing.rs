//! In-memory sink doubles for listener and ingress tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};

use activity_api::{
    ActivityRecord, IdentityScope, IdentityScopes, PersistError, RelationalWriter, SearchIndexer,
    StoredActivity,
};

#[derive(Debug, Clone)]
pub struct Row {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub record: ActivityRecord,
    /// user id seen through the identity scope during the insert
    pub scope_user: String,
    /// open scopes at the moment of the insert
    pub scopes_open: usize,
}

/// Relational double. `healthy = false` simulates an unreachable store.
pub struct MemoryWriter {
    healthy: bool,
    scopes: IdentityScopes,
    next_id: AtomicI64,
    pub rows: Mutex<Vec<Row>>,
}

impl MemoryWriter {
    pub fn new(scopes: IdentityScopes) -> Self {
        Self { healthy: true, scopes, next_id: AtomicI64::new(1), rows: Mutex::new(Vec::new()) }
    }

    pub fn down(scopes: IdentityScopes) -> Self {
        Self { healthy: false, ..Self::new(scopes) }
    }

    pub fn rows(&self) -> Vec<Row> {
        self.rows.lock().unwrap().clone()
    }
}

impl RelationalWriter for MemoryWriter {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn insert<'a>(
        &'a self,
        scope: &'a IdentityScope,
        record: &'a ActivityRecord,
    ) -> Pin<Box<dyn Future<Output = Result<StoredActivity, PersistError>> + Send + 'a>> {
        Box::pin(async move {
            // let concurrent records interleave
            tokio::task::yield_now().await;
            if !self.healthy {
                return Err(PersistError::io("connection refused"));
            }
            if record.missing_fields().iter().any(|f| *f != "userId") {
                return Err(PersistError::io("null value violates not-null constraint"));
            }
            let stored = StoredActivity {
                id: self.next_id.fetch_add(1, Ordering::SeqCst),
                timestamp: Utc::now(),
            };
            self.rows.lock().unwrap().push(Row {
                id: stored.id,
                timestamp: stored.timestamp,
                record: record.clone(),
                scope_user: scope.user_id().to_string(),
                scopes_open: self.scopes.active(),
            });
            Ok(stored)
        })
    }
}

#[derive(Debug, Clone)]
pub struct Doc {
    pub body: serde_json::Value,
    /// open scopes at the moment of indexing
    pub scopes_open: usize,
}

/// Search double. `healthy = false` simulates an unreachable cluster.
pub struct MemoryIndexer {
    healthy: bool,
    scopes: IdentityScopes,
    pub calls: AtomicI64,
    pub docs: Mutex<Vec<Doc>>,
}

impl MemoryIndexer {
    pub fn new(scopes: IdentityScopes) -> Self {
        Self { healthy: true, scopes, calls: AtomicI64::new(0), docs: Mutex::new(Vec::new()) }
    }

    pub fn down(scopes: IdentityScopes) -> Self {
        Self { healthy: false, ..Self::new(scopes) }
    }

    pub fn docs(&self) -> Vec<Doc> {
        self.docs.lock().unwrap().clone()
    }

    pub fn calls(&self) -> i64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SearchIndexer for MemoryIndexer {
    fn index<'a>(
        &'a self,
        record: &'a ActivityRecord,
        timestamp: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let scopes_open = self.scopes.active();
            tokio::task::yield_now().await;
            if !self.healthy {
                return Err(PersistError::io("search backend unreachable"));
            }
            self.docs.lock().unwrap().push(Doc {
                body: record.search_document(timestamp),
                scopes_open,
            });
            Ok(())
        })
    }
}
