//! 인제스천 노티파이어와 랜딩 워처
//!
//! [`Notifier`]는 오브젝트 생성 알림을 큐 메시지로 바꿉니다. 큐가 일시적으로
//! 가득 차면 지수 백오프로 재시도하고, 모든 시도가 실패하면 이벤트를 로그로
//! 남기고 버립니다. 잘못된 형식의 알림은 재시도해도 성공할 수 없으므로
//! 바로 버립니다.
//!
//! [`LandingWatcher`]는 알림을 직접 보내지 못하는 스토어를 위해
//! [`ObjectStore::list`]를 주기적으로 폴링해 새 오브젝트를 알림으로 바꿉니다.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logrelay_core::event::CreationEvent;
use logrelay_core::metrics as m;
use logrelay_core::types::RawLogObject;

use crate::error::RelayPipelineError;
use crate::queue::IngestionQueue;
use crate::store::ObjectStore;

/// 백오프 상한
const MAX_ENQUEUE_BACKOFF: Duration = Duration::from_secs(5);

/// 인제스천 노티파이어
#[derive(Debug, Clone)]
pub struct Notifier {
    queue: Arc<IngestionQueue>,
    max_attempts: u32,
    backoff: Duration,
}

impl Notifier {
    /// 새 노티파이어를 생성합니다.
    pub fn new(queue: Arc<IngestionQueue>, max_attempts: u32, backoff: Duration) -> Self {
        Self {
            queue,
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// JSON 알림 페이로드를 처리합니다.
    ///
    /// 잘못된 페이로드는 카운트하고 [`RelayPipelineError::MalformedEvent`]를 반환합니다.
    pub async fn handle_payload(&self, payload: &[u8]) -> Result<u64, RelayPipelineError> {
        metrics::counter!(m::NOTIFIER_EVENTS_TOTAL).increment(1);
        let event = match CreationEvent::from_json(payload) {
            Ok(event) => event,
            Err(reason) => {
                warn!(reason = %reason, bytes = payload.len(), "dropping malformed creation event");
                metrics::counter!(m::NOTIFIER_MALFORMED_TOTAL).increment(1);
                return Err(RelayPipelineError::MalformedEvent(reason));
            }
        };
        self.enqueue_with_retry(event.into_object()).await
    }

    /// 디코딩된 알림을 큐에 넣습니다.
    pub async fn notify(&self, event: CreationEvent) -> Result<u64, RelayPipelineError> {
        metrics::counter!(m::NOTIFIER_EVENTS_TOTAL).increment(1);
        self.enqueue_with_retry(event.into_object()).await
    }

    async fn enqueue_with_retry(&self, object: RawLogObject) -> Result<u64, RelayPipelineError> {
        let mut backoff = self.backoff;
        let mut attempt = 1;
        loop {
            match self.queue.enqueue(object.clone()).await {
                Ok(id) => return Ok(id),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    debug!(
                        object_key = %object.object_key,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "enqueue failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(MAX_ENQUEUE_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        object_key = %object.object_key,
                        source_id = %object.source_id,
                        attempts = attempt,
                        error = %e,
                        "dropping creation event after enqueue failures"
                    );
                    metrics::counter!(m::NOTIFIER_DROPPED_TOTAL).increment(1);
                    return Err(e);
                }
            }
        }
    }
}

/// 랜딩 스토어 폴링 워처
pub struct LandingWatcher<S: ObjectStore> {
    store: Arc<S>,
    notifier: Notifier,
    interval: Duration,
    seen: HashSet<String>,
}

impl<S: ObjectStore> LandingWatcher<S> {
    /// 새 워처를 생성합니다.
    pub fn new(store: Arc<S>, notifier: Notifier, interval: Duration) -> Self {
        Self {
            store,
            notifier,
            interval,
            seen: HashSet::new(),
        }
    }

    /// 이미 처리한 키를 등록합니다 (재시작 시 중복 enqueue 방지).
    pub fn mark_seen(&mut self, keys: impl IntoIterator<Item = String>) {
        self.seen.extend(keys);
    }

    /// 지금까지 enqueue한 키
    pub fn seen_keys(&self) -> &HashSet<String> {
        &self.seen
    }

    /// 스토어를 한 번 훑어 새 오브젝트를 enqueue하고 그 수를 반환합니다.
    ///
    /// enqueue에 실패한 오브젝트는 다음 폴링에서 다시 시도합니다.
    pub async fn poll_once(&mut self) -> Result<usize, RelayPipelineError> {
        let objects = self.store.list().await?;
        let mut enqueued = 0;
        for meta in objects {
            if self.seen.contains(&meta.key) {
                continue;
            }
            let event = CreationEvent {
                source_id: RawLogObject::source_from_key(&meta.key).to_owned(),
                object_key: meta.key.clone(),
                size: meta.size,
                event_time: meta.modified,
            };
            if event.source_id.is_empty() {
                warn!(object_key = %meta.key, "skipping object without a resource segment");
                self.seen.insert(meta.key);
                continue;
            }
            match self.notifier.notify(event).await {
                Ok(_) => {
                    self.seen.insert(meta.key);
                    enqueued += 1;
                }
                Err(e) => {
                    warn!(object_key = %meta.key, error = %e, "enqueue failed, will retry next poll");
                }
            }
        }
        if enqueued > 0 {
            debug!(count = enqueued, "landing watcher enqueued new objects");
        }
        Ok(enqueued)
    }

    /// 취소될 때까지 폴링합니다. 종료 시 워처를 돌려줍니다.
    pub async fn run(mut self, cancel: CancellationToken) -> Self {
        info!(interval_ms = self.interval.as_millis() as u64, "landing watcher started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        warn!(error = %e, "landing store listing failed");
                    }
                }
            }
        }
        info!(seen = self.seen.len(), "landing watcher stopped");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueSettings;
    use crate::store::MemoryObjectStore;

    fn queue(max_depth: usize) -> Arc<IngestionQueue> {
        Arc::new(IngestionQueue::new(QueueSettings {
            visibility_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            max_receives: 3,
            max_depth,
        }))
    }

    #[tokio::test]
    async fn malformed_payload_is_dropped_without_enqueue() {
        let queue = queue(10);
        let notifier = Notifier::new(queue.clone(), 3, Duration::from_millis(1));
        let err = notifier.handle_payload(b"{not json").await.unwrap_err();
        assert!(matches!(err, RelayPipelineError::MalformedEvent(_)));
        assert_eq!(queue.stats().await.depth(), 0);
    }

    #[tokio::test]
    async fn valid_payload_is_enqueued() {
        let queue = queue(10);
        let notifier = Notifier::new(queue.clone(), 3, Duration::from_millis(1));
        let payload = br#"{"source_id":"web-alb","object_key":"web-alb/a.log","size":3,"event_time":"2024-03-02T10:00:00Z"}"#;
        notifier.handle_payload(payload).await.unwrap();
        assert_eq!(queue.stats().await.visible, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_queue_retries_then_gives_up() {
        let queue = queue(1);
        let notifier = Notifier::new(queue.clone(), 3, Duration::from_millis(10));
        let event = |key: &str| CreationEvent {
            source_id: "a".to_owned(),
            object_key: key.to_owned(),
            size: 1,
            event_time: chrono::Utc::now(),
        };
        notifier.notify(event("a/1")).await.unwrap();
        let err = notifier.notify(event("a/2")).await.unwrap_err();
        assert!(matches!(err, RelayPipelineError::QueueFull { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_once_space_frees_up() {
        let queue = queue(1);
        let notifier = Notifier::new(queue.clone(), 5, Duration::from_millis(10));
        let event = |key: &str| CreationEvent {
            source_id: "a".to_owned(),
            object_key: key.to_owned(),
            size: 1,
            event_time: chrono::Utc::now(),
        };
        notifier.notify(event("a/1")).await.unwrap();

        let pending = {
            let notifier = notifier.clone();
            let second = event("a/2");
            tokio::spawn(async move { notifier.notify(second).await })
        };
        tokio::task::yield_now().await;
        let batch = queue.receive(1).await;
        queue.ack(&batch[0].receipt).await.unwrap();

        pending.await.unwrap().unwrap();
        assert_eq!(queue.receive(1).await[0].object.object_key, "a/2");
    }

    #[tokio::test]
    async fn watcher_enqueues_each_object_once() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("web-alb/2024/03/02/a.log", "x").await;
        store.insert("web-cdn/b.gz", "y").await;
        let queue = queue(10);
        let mut watcher = LandingWatcher::new(
            store.clone(),
            Notifier::new(queue.clone(), 1, Duration::from_millis(1)),
            Duration::from_millis(100),
        );

        assert_eq!(watcher.poll_once().await.unwrap(), 2);
        assert_eq!(watcher.poll_once().await.unwrap(), 0);
        store.insert("web-alb/2024/03/02/c.log", "z").await;
        assert_eq!(watcher.poll_once().await.unwrap(), 1);

        let batch = queue.receive(10).await;
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].object.source_id, "web-alb");
    }

    #[tokio::test]
    async fn watcher_skips_keys_marked_seen() {
        let store = Arc::new(MemoryObjectStore::new());
        store.insert("web-alb/a.log", "x").await;
        let queue = queue(10);
        let mut watcher = LandingWatcher::new(
            store,
            Notifier::new(queue.clone(), 1, Duration::from_millis(1)),
            Duration::from_millis(100),
        );
        watcher.mark_seen(["web-alb/a.log".to_owned()]);
        assert_eq!(watcher.poll_once().await.unwrap(), 0);
    }
}
