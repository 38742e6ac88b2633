use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use activity_api::{ActivityHandler, ActivitySource, RelationalWriter, SearchIndexer};
use activity_engine::{ActivityListener, Dispatcher, spawn_source_task};
use source_redis::RedisSource;
use storage_postgres::PostgresWriter;
use storage_search::HttpSearchIndexer;

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("activity-server starting");

    // --- Load config ---
    let config = ServerConfig::load(&args.config)?.with_overrides(&args);
    tracing::info!(config = %args.config, validation = ?config.validation, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Relational writer ---
    let writer = Arc::new(PostgresWriter::connect(&config.postgres)?);
    writer.init().await?;
    tracing::info!(
        host = %config.postgres.host,
        port = config.postgres.port,
        database = %config.postgres.database,
        table = %config.postgres.table,
        "relational writer ready"
    );

    // --- Search indexer (optional) ---
    let indexer: Option<Arc<dyn SearchIndexer>> = match &config.search {
        Some(search_cfg) => {
            let indexer = HttpSearchIndexer::new(search_cfg)?;
            tracing::info!(url = %search_cfg.url, index = %search_cfg.index, "search indexer ready");
            Some(Arc::new(indexer))
        }
        None => {
            tracing::info!("search backend not configured, indexing disabled");
            None
        }
    };

    // --- Listener ---
    let listener = ActivityListener::new(writer.clone(), indexer, config.validation);
    let dispatcher = Dispatcher::new(Arc::new(listener));

    // --- Source ---
    let source: Arc<dyn ActivitySource> = Arc::new(RedisSource::new(&config.redis)?);
    let handler: Arc<dyn ActivityHandler> = Arc::new(dispatcher.clone());
    let mut source_handle = spawn_source_task(
        source,
        "redis".into(),
        config.redis.channel.clone(),
        handler,
        token.clone(),
    );

    tracing::info!(channel = %config.redis.channel, "server ready");

    // --- Ожидание Ctrl+C или конца source'а ---
    let source_ended = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            tracing::info!("shutting down...");
            false
        }
        _ = &mut source_handle => {
            tracing::warn!("source ended, shutting down");
            true
        }
    };

    // Signal source to stop cooperatively
    token.cancel();
    if !source_ended {
        let _ = source_handle.await;
    }

    // Drain: записи, которые уже в работе
    let drain_timeout = Duration::from_secs(config.drain_timeout_secs);
    if dispatcher.drain(drain_timeout).await {
        tracing::info!("in-flight records drained");
    }

    writer.close().await;
    tracing::info!("shutdown complete");

    if source_ended {
        return Err(ServerError::SourceEnded("redis".into()));
    }
    Ok(())
}
