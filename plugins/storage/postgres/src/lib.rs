use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};

use activity_api::{
    ActivityRecord, IdentityScope, PersistError, RelationalWriter, StoredActivity,
};

const SQL_CREATE: &str = include_str!("../sql/create_activity_logs.sql");

/// GUC, через который identity scope виден базе. `created_by` берёт
/// значение отсюда по DEFAULT.
const IDENTITY_SETTING: &str = "app.user_id";

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, serde::Deserialize)]
pub struct PostgresConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_database")]
    pub database: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Сколько ждать свободного соединения из пула. Фактически таймаут
    /// записи при недоступной базе.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Создать таблицу при старте, если её нет.
    #[serde(default)]
    pub create_table: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            user: default_user(),
            password: String::new(),
            database: default_database(),
            table: default_table(),
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            create_table: false,
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    5432
}
fn default_user() -> String {
    "postgres".into()
}
fn default_database() -> String {
    "activity".into()
}
fn default_table() -> String {
    "activity_logs".into()
}
fn default_max_connections() -> u32 {
    10
}
fn default_acquire_timeout_secs() -> u64 {
    5
}

/// Имя таблицы подставляется в SQL как есть, поэтому только `[A-Za-z0-9_]`.
fn validate_table(table: &str) -> Result<(), PersistError> {
    let valid = !table.is_empty()
        && !table.starts_with(|c: char| c.is_ascii_digit())
        && table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(PersistError::config(format!("invalid table name '{table}'")))
    }
}

fn db_err(context: &str, e: sqlx::Error) -> PersistError {
    PersistError::io(format!("{context}: {e}"))
}

// ═══════════════════════════════════════════════════════════════
//  PostgresWriter
// ═══════════════════════════════════════════════════════════════

/// PostgreSQL RelationalWriter.
///
/// Каждая запись — отдельная транзакция: `set_config(app.user_id, .., true)`
/// делает identity видимой только внутри неё, затем INSERT ... RETURNING.
/// При ошибке транзакция откатывается на drop, строка не появляется.
pub struct PostgresWriter {
    pool: PgPool,
    table: String,
    create_table: bool,
    insert_sql: String,
}

impl PostgresWriter {
    /// Пул создаётся lazy: недоступная на старте база не мешает запуску,
    /// ошибки проявятся на записях.
    pub fn connect(cfg: &PostgresConfig) -> Result<Self, PersistError> {
        validate_table(&cfg.table)?;

        let opts = PgConnectOptions::new()
            .host(&cfg.host)
            .port(cfg.port)
            .username(&cfg.user)
            .password(&cfg.password)
            .database(&cfg.database)
            .application_name("activity-server");

        let pool = PgPoolOptions::new()
            .max_connections(cfg.max_connections)
            .acquire_timeout(Duration::from_secs(cfg.acquire_timeout_secs))
            .connect_lazy_with(opts);

        Ok(Self::with_pool(pool, &cfg.table, cfg.create_table))
    }

    pub fn with_pool(pool: PgPool, table: &str, create_table: bool) -> Self {
        Self {
            pool,
            table: table.to_string(),
            create_table,
            insert_sql: insert_sql(table),
        }
    }

    /// Закрыть пул (graceful shutdown).
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn insert_sql(table: &str) -> String {
    format!(
        "INSERT INTO {table} (user_id, url, process_type, response_time_ms) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, \"timestamp\""
    )
}

impl RelationalWriter for PostgresWriter {
    fn init(&self) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>> {
        Box::pin(async {
            if !self.create_table {
                return Ok(());
            }
            let sql = SQL_CREATE.replace("{table}", &self.table);
            sqlx::raw_sql(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("create table", e))?;
            tracing::info!(table = %self.table, "activity table ready");
            Ok(())
        })
    }

    fn insert<'a>(
        &'a self,
        scope: &'a IdentityScope,
        record: &'a ActivityRecord,
    ) -> Pin<Box<dyn Future<Output = Result<StoredActivity, PersistError>> + Send + 'a>> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(|e| db_err("begin", e))?;

            sqlx::query("SELECT set_config($1, $2, true)")
                .bind(IDENTITY_SETTING)
                .bind(scope.user_id())
                .execute(&mut *tx)
                .await
                .map_err(|e| db_err("identity", e))?;

            let (id, timestamp): (i64, DateTime<Utc>) = sqlx::query_as(&self.insert_sql)
                .bind(record.user_id.as_deref())
                .bind(record.url.as_deref())
                .bind(record.process_type.as_deref())
                .bind(record.response_time_ms)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| db_err("insert", e))?;

            tx.commit().await.map_err(|e| db_err("commit", e))?;

            Ok(StoredActivity { id, timestamp })
        })
    }
}
