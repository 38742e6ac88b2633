mod error;
mod identity;
mod record;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

pub use error::{ErrorKind, PersistError};
pub use identity::{IdentityScope, IdentityScopes};
pub use record::{ActivityRecord, StoredActivity, ValidationPolicy};

// ════════════════════════════════════════════════════════════════
//  Sink Traits
// ════════════════════════════════════════════════════════════════

/// Relational store для activity записей: одна строка на событие.
///
/// Реализации: PostgreSQL (`storage-postgres`), in-memory двойники в тестах.
pub trait RelationalWriter: Send + Sync {
    /// Инициализация (создание таблиц и т.д.)
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>>;

    /// Вставить одну запись внутри открытого identity scope. База сама
    /// генерирует `id` и `timestamp` и возвращает их.
    fn insert<'a>(
        &'a self,
        scope: &'a IdentityScope,
        record: &'a ActivityRecord,
    ) -> Pin<Box<dyn Future<Output = Result<StoredActivity, PersistError>> + Send + 'a>>;
}

/// Search/analytics store: один документ на событие.
///
/// `timestamp` генерирует вызывающий в момент индексации, независимо от
/// relational store.
pub trait SearchIndexer: Send + Sync {
    fn index<'a>(
        &'a self,
        record: &'a ActivityRecord,
        timestamp: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>>;
}

// ════════════════════════════════════════════════════════════════
//  Ingress Traits
// ════════════════════════════════════════════════════════════════

/// Точка входа для каждого доставленного события.
///
/// Никогда не возвращает ошибку: всё, что случилось с sink'ами,
/// остаётся в логах.
pub trait ActivityHandler: Send + Sync {
    fn handle(&self, record: ActivityRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Source — получает события из pub/sub канала и отдаёт их handler'у.
///
/// Доставка at-least-once, порядок не гарантирован. Каждое событие
/// обрабатывается независимо.
pub trait ActivitySource: Send + Sync {
    /// Запустить source. Должен блокировать (async) пока source активен.
    fn start(
        &self,
        handler: Arc<dyn ActivityHandler>,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>>;

    /// Остановить source (graceful shutdown).
    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>>;
}
