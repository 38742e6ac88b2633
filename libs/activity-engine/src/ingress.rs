use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use activity_api::{ActivityHandler, ActivityRecord, ActivitySource, PersistError};

// ═══════════════════════════════════════════════════════════════
//  Payload delivery
// ═══════════════════════════════════════════════════════════════

/// Декодировать сырой payload из канала и отдать handler'у.
/// Недекодируемый payload логируется и отбрасывается.
pub async fn deliver(handler: &dyn ActivityHandler, channel: &str, payload: &[u8]) {
    match ActivityRecord::decode(payload) {
        Ok(record) => handler.handle(record).await,
        Err(e) => {
            tracing::warn!(channel, bytes = payload.len(), error = ?e, "undecodable payload, dropping");
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Dispatcher — one task per delivered record
// ═══════════════════════════════════════════════════════════════

/// Handler-обёртка: каждое событие обрабатывается в своей task, source
/// не ждёт завершения записи. Лимита на число задач в полёте нет.
///
/// TaskTracker нужен только для graceful shutdown — дождаться задач,
/// которые уже в работе.
#[derive(Clone)]
pub struct Dispatcher {
    handler: Arc<dyn ActivityHandler>,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn ActivityHandler>) -> Self {
        Self {
            handler,
            tracker: TaskTracker::new(),
        }
    }

    /// Задач в полёте.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Дождаться задач в полёте, не дольше `timeout`. `true` если все
    /// завершились.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.tracker.close();
        let drained = tokio::time::timeout(timeout, self.tracker.wait()).await.is_ok();
        if !drained {
            tracing::warn!(in_flight = self.tracker.len(), "drain timeout, abandoning in-flight records");
        }
        drained
    }
}

impl ActivityHandler for Dispatcher {
    fn handle(&self, record: ActivityRecord) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        let handler = self.handler.clone();
        self.tracker.spawn(async move {
            handler.handle(record).await;
        });
        Box::pin(async {})
    }
}

// ═══════════════════════════════════════════════════════════════
//  ChannelSource — in-process mpsc feed
// ═══════════════════════════════════════════════════════════════

/// Source поверх tokio mpsc: сырые payload'ы из того же процесса.
/// Декодирование то же, что у сетевых source'ов.
pub struct ChannelSource {
    rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
    stop: CancellationToken,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (mpsc::Sender<Vec<u8>>, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        let source = Self {
            rx: Mutex::new(Some(rx)),
            stop: CancellationToken::new(),
        };
        (tx, source)
    }
}

impl ActivitySource for ChannelSource {
    fn start(
        &self,
        handler: Arc<dyn ActivityHandler>,
        channel: &str,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + '_>> {
        let channel = channel.to_string();
        Box::pin(async move {
            let mut rx = self
                .rx
                .lock()
                .await
                .take()
                .ok_or_else(|| PersistError::new("channel source already started"))?;
            tracing::info!(%channel, "channel source subscribed");

            loop {
                tokio::select! {
                    payload = rx.recv() => {
                        match payload {
                            Some(payload) => deliver(&*handler, &channel, &payload).await,
                            None => break,
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

// ═══════════════════════════════════════════════════════════════
//  Source task
// ═══════════════════════════════════════════════════════════════

/// Запустить source в отдельной task: start() до окончания source'а или
/// до отмены token'а, затем stop().
pub fn spawn_source_task(
    source: Arc<dyn ActivitySource>,
    source_name: String,
    channel: String,
    handler: Arc<dyn ActivityHandler>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(source = %source_name, %channel, "source starting");
        tokio::select! {
            result = source.start(handler, &channel) => {
                if let Err(e) = result {
                    tracing::error!(source = %source_name, error = ?e, "source error");
                }
            }
            _ = token.cancelled() => {
                tracing::info!(source = %source_name, "source cancellation requested");
                if let Err(e) = source.stop().await {
                    tracing::error!(source = %source_name, error = ?e, "source stop error");
                }
            }
        }
        tracing::info!(source = %source_name, "source stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ActivityListener;
    use crate::testing::{MemoryIndexer, MemoryWriter};
    use activity_api::{IdentityScopes, SearchIndexer, ValidationPolicy};

    fn pipeline() -> (Arc<MemoryWriter>, Arc<MemoryIndexer>, Dispatcher) {
        let scopes = IdentityScopes::new();
        let writer = Arc::new(MemoryWriter::new(scopes.clone()));
        let indexer = Arc::new(MemoryIndexer::new(scopes.clone()));
        let listener = ActivityListener::new(
            writer.clone(),
            Some(indexer.clone() as Arc<dyn SearchIndexer>),
            ValidationPolicy::Strict,
        )
        .with_scopes(scopes);
        (writer, indexer, Dispatcher::new(Arc::new(listener)))
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn channel_source_dispatches_each_payload() {
        let (writer, indexer, dispatcher) = pipeline();
        let (tx, source) = ChannelSource::new(16);
        let token = CancellationToken::new();
        let task = spawn_source_task(
            Arc::new(source),
            "test".into(),
            "activity_log".into(),
            Arc::new(dispatcher.clone()),
            token.clone(),
        );

        tx.send(br#"{"userId":"alice","url":"/a","processType":"GET","responseTimeMs":1}"#.to_vec())
            .await
            .unwrap();
        tx.send(br#"{"pattern":"activity_log","data":{"userId":"bob","url":"/b","processType":"POST","responseTimeMs":2}}"#.to_vec())
            .await
            .unwrap();
        tx.send(b"garbage".to_vec()).await.unwrap();
        drop(tx);

        task.await.unwrap();
        assert!(dispatcher.drain(Duration::from_secs(5)).await);

        let mut users: Vec<String> = writer
            .rows()
            .into_iter()
            .filter_map(|r| r.record.user_id)
            .collect();
        users.sort();
        assert_eq!(users, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(indexer.docs().len(), 2);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn cancellation_stops_source() {
        let (_writer, _indexer, dispatcher) = pipeline();
        let (_tx, source) = ChannelSource::new(1);
        let token = CancellationToken::new();
        let task = spawn_source_task(
            Arc::new(source),
            "test".into(),
            "activity_log".into(),
            Arc::new(dispatcher),
            token.clone(),
        );
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("source task did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn channel_source_starts_once() {
        let (_writer, _indexer, dispatcher) = pipeline();
        let (tx, source) = ChannelSource::new(1);
        drop(tx);
        let handler: Arc<dyn ActivityHandler> = Arc::new(dispatcher);
        source.start(handler.clone(), "c").await.unwrap();
        assert!(source.start(handler, "c").await.is_err());
    }
}
