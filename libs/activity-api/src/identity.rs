use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Источник identity scope'ов. Клонируется дёшево; все клоны видят
/// один и тот же счётчик открытых scope'ов.
#[derive(Clone, Debug, Default)]
pub struct IdentityScopes {
    active: Arc<AtomicUsize>,
}

impl IdentityScopes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Открыть scope для одного события. Закрывается при drop.
    pub fn open(&self, user_id: impl Into<String>) -> IdentityScope {
        self.active.fetch_add(1, Ordering::SeqCst);
        IdentityScope {
            user_id: user_id.into(),
            active: self.active.clone(),
        }
    }

    /// Сколько scope'ов открыто прямо сейчас.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

/// Identity acting-пользователя на время одной relational записи.
///
/// Передаётся writer'у явно, а не через thread/task-local. Каждое событие
/// получает свой экземпляр, поэтому параллельные события не видят чужой
/// user id. Drop закрывает scope на любом пути выхода, включая отмену
/// future и unwinding.
#[derive(Debug)]
pub struct IdentityScope {
    user_id: String,
    active: Arc<AtomicUsize>,
}

impl IdentityScope {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl Drop for IdentityScope {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}
