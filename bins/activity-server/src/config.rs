use std::path::Path;

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use activity_api::ValidationPolicy;
use source_redis::RedisConfig;
use storage_postgres::PostgresConfig;
use storage_search::SearchConfig;

use crate::error::ServerError;

#[derive(Parser)]
#[command(name = "activity-server", about = "Запись событий активности в PostgreSQL и search index")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Запустить listener
    Serve(ServeArgs),
}

/// Флаги перекрывают значения из TOML. Каждый также читается из env.
#[derive(Args, Clone, Debug)]
pub struct ServeArgs {
    /// Путь к TOML конфиг файлу (необязателен)
    #[arg(long, default_value = "config.toml", env = "ACTIVITY_CONFIG")]
    pub config: String,

    #[arg(long, env = "POSTGRES_HOST")]
    pub postgres_host: Option<String>,
    #[arg(long, env = "POSTGRES_PORT")]
    pub postgres_port: Option<u16>,
    #[arg(long, env = "POSTGRES_USER")]
    pub postgres_user: Option<String>,
    #[arg(long, env = "POSTGRES_PASSWORD", hide_env_values = true)]
    pub postgres_password: Option<String>,
    #[arg(long, env = "POSTGRES_DB")]
    pub postgres_db: Option<String>,

    /// URL search кластера. Пустое значение выключает индексацию.
    #[arg(long, env = "SEARCH_URL")]
    pub search_url: Option<String>,
    #[arg(long, env = "SEARCH_INDEX")]
    pub search_index: Option<String>,

    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,
    /// Pub/sub канал с событиями
    #[arg(long, env = "ACTIVITY_CHANNEL")]
    pub channel: Option<String>,

    /// strict | passthrough
    #[arg(long, env = "ACTIVITY_VALIDATION", value_parser = parse_validation)]
    pub validation: Option<ValidationPolicy>,
}

fn parse_validation(s: &str) -> Result<ValidationPolicy, String> {
    match s {
        "strict" => Ok(ValidationPolicy::Strict),
        "passthrough" => Ok(ValidationPolicy::Passthrough),
        other => Err(format!("unknown validation policy '{other}' (strict | passthrough)")),
    }
}

// ---- TOML Config ----

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub postgres: PostgresConfig,
    /// Нет секции — нет индексации.
    #[serde(default)]
    pub search: Option<SearchConfig>,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub validation: ValidationPolicy,
    /// Сколько ждать записей в полёте при shutdown.
    #[serde(default = "default_drain_timeout_secs")]
    pub drain_timeout_secs: u64,
}

fn default_drain_timeout_secs() -> u64 {
    10
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            search: None,
            redis: RedisConfig::default(),
            validation: ValidationPolicy::default(),
            drain_timeout_secs: default_drain_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Прочитать TOML. Отсутствующий файл — конфиг по умолчанию.
    pub fn load(path: &str) -> Result<Self, ServerError> {
        if !Path::new(path).exists() {
            tracing::info!(config = %path, "config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServerError::Config { context: "read", detail: format!("'{path}': {e}") })?;
        Self::parse(&content)
            .map_err(|e| ServerError::Config { context: "parse", detail: format!("'{path}': {e}") })
    }

    /// `[search]` без `url` или с пустым `url` — то же, что нет секции.
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        let mut cfg: Self = toml::from_str(content)?;
        cfg.search = cfg.search.filter(SearchConfig::is_enabled);
        Ok(cfg)
    }

    /// Применить CLI/env поверх файла.
    pub fn with_overrides(mut self, args: &ServeArgs) -> Self {
        if let Some(v) = &args.postgres_host {
            self.postgres.host = v.clone();
        }
        if let Some(v) = args.postgres_port {
            self.postgres.port = v;
        }
        if let Some(v) = &args.postgres_user {
            self.postgres.user = v.clone();
        }
        if let Some(v) = &args.postgres_password {
            self.postgres.password = v.clone();
        }
        if let Some(v) = &args.postgres_db {
            self.postgres.database = v.clone();
        }

        match args.search_url.as_deref() {
            Some(url) if url.trim().is_empty() => self.search = None,
            Some(url) => match &mut self.search {
                Some(search) => search.url = url.to_string(),
                None => self.search = Some(SearchConfig::new(url)),
            },
            None => {}
        }
        if let (Some(index), Some(search)) = (&args.search_index, &mut self.search) {
            search.index = index.clone();
        }

        if let Some(v) = &args.redis_url {
            self.redis.url = v.clone();
        }
        if let Some(v) = &args.channel {
            self.redis.channel = v.clone();
        }
        if let Some(v) = args.validation {
            self.validation = v;
        }
        self
    }
}
