use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use activity_api::{ActivityHandler, ActivitySource, PersistError};
use activity_engine::deliver;

// ═══════════════════════════════════════════════════════════════
//  Config
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`.
    #[serde(default = "default_url")]
    pub url: String,
    /// Pub/sub канал с событиями активности.
    #[serde(default = "default_channel")]
    pub channel: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            channel: default_channel(),
        }
    }
}

fn default_url() -> String {
    "redis://127.0.0.1:6379".into()
}
fn default_channel() -> String {
    "activity_log".into()
}

// ═══════════════════════════════════════════════════════════════
//  RedisSource
// ═══════════════════════════════════════════════════════════════

/// Redis pub/sub source. Подписывается на канал и отдаёт каждое
/// сообщение handler'у. Потеря соединения завершает `start` с ошибкой,
/// переподключения нет.
pub struct RedisSource {
    client: redis::Client,
    stop: CancellationToken,
}

impl RedisSource {
    pub fn new(cfg: &RedisConfig) -> Result<Self, PersistError> {
        let client = redis::Client::open(cfg.url.as_str())
            .map_err(|e| PersistError::config(format!("redis url: {e}")))?;
        Ok(Self {
            client,
            stop: CancellationToken::new(),
        })
    }
}

impl ActivitySource for RedisSource {
    fn start(
        &self,
        handler: Arc<dyn ActivityHandler>,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>> {
        let channel = channel.to_string();
        Box::pin(async move {
            let mut pubsub = self
                .client
                .get_async_pubsub()
                .await
                .map_err(|e| PersistError::io(format!("redis connect: {e}")))?;
            pubsub
                .subscribe(&channel)
                .await
                .map_err(|e| PersistError::io(format!("redis subscribe '{channel}': {e}")))?;
            tracing::info!(%channel, "redis source subscribed");

            let mut messages = std::pin::pin!(pubsub.on_message());
            loop {
                tokio::select! {
                    msg = messages.next() => {
                        match msg {
                            Some(msg) => deliver(&*handler, &channel, msg.get_payload_bytes()).await,
                            None => {
                                return Err(PersistError::io(format!("redis pubsub '{channel}' closed")));
                            }
                        }
                    }
                    _ = self.stop.cancelled() => break,
                }
            }
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>> {
        self.stop.cancel();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use activity_api::{ActivityRecord, ErrorKind};

    struct Nop;

    impl ActivityHandler for Nop {
        fn handle(&self, _record: ActivityRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
            Box::pin(async {})
        }
    }

    #[test]
    fn config_defaults() {
        let cfg: RedisConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.channel, "activity_log");
    }

    #[test]
    fn bad_url_is_config_error() {
        let cfg = RedisConfig { url: "http://nope".into(), ..Default::default() };
        assert_eq!(RedisSource::new(&cfg).err().unwrap().kind(), ErrorKind::Config);
    }

    #[tokio::test]
    async fn unreachable_server_fails_start() {
        let cfg = RedisConfig { url: "redis://127.0.0.1:1".into(), ..Default::default() };
        let source = RedisSource::new(&cfg).unwrap();
        let err = source.start(Arc::new(Nop), "activity_log").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }
}
