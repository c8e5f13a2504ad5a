//! 파이프라인 오케스트레이션 -- 큐/디스패처/딜리버리 스트림의 생명주기를 관리합니다.
//!
//! [`LogRelay`]는 core의 [`Pipeline`] trait을 구현하여
//! `logrelay-daemon`에서 start/stop/health_check로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! LandingWatcher / Notifier -> IngestionQueue -> Dispatcher workers (W) -> DeliveryStream -> sink
//!                                    |                                        ^
//!                                    +-- dead letters                 background flusher
//! ```
//!
//! 정지 시 워커는 처리 중인 배치를 마치고, 스트림은 열린 배치를 모두 플러시하며,
//! 큐 상태와 워처가 본 키 목록을 스냅샷 파일에 저장합니다.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use logrelay_core::error::{PipelineError, RelayError};
use logrelay_core::pipeline::{HealthStatus, Pipeline};

use crate::config::PipelineConfig;
use crate::delivery::DeliveryStream;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::error::RelayPipelineError;
use crate::notifier::{LandingWatcher, Notifier};
use crate::parser::ParserRegistry;
use crate::queue::{IngestionQueue, QueueSettings, QueueSnapshot, QueueStats};
use crate::resolver::ResourceTypeMap;
use crate::store::ObjectStore;

/// 큐 깊이가 이 비율을 넘으면 Degraded
const DEPTH_DEGRADED_RATIO: f64 = 0.9;

/// 보존 기간 정리 주기 상한
const MAX_JANITOR_INTERVAL: Duration = Duration::from_secs(60);

/// 재시작 사이에 유지되는 상태
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RelaySnapshot {
    /// 큐 상태
    pub queue: QueueSnapshot,
    /// 랜딩 워처가 이미 enqueue한 키
    #[serde(default)]
    pub seen_keys: Vec<String>,
}

impl RelaySnapshot {
    /// 스냅샷 파일을 읽습니다. 파일이 없으면 `None`입니다.
    pub async fn load(path: &Path) -> Result<Option<Self>, RelayPipelineError> {
        match tokio::fs::read(path).await {
            Ok(data) => Ok(Some(serde_json::from_slice(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 임시 파일에 쓴 뒤 rename 하여 스냅샷을 저장합니다.
    pub async fn save(&self, path: &Path) -> Result<(), RelayPipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(self)?).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

/// 파이프라인 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RelayState {
    /// 초기화됨, 아직 시작하지 않음
    Initialized,
    /// 실행 중
    Running,
    /// 정지됨
    Stopped,
}

/// 로그 릴레이 파이프라인
///
/// # 사용 예시
/// ```ignore
/// use logrelay_pipeline::{FsObjectStore, LogRelayBuilder};
///
/// let mut relay = LogRelayBuilder::new()
///     .config(config)
///     .landing(FsObjectStore::new("/var/lib/logrelay/landing"))
///     .sink(FsObjectStore::new("/var/lib/logrelay/sink"))
///     .build()
///     .await?;
///
/// relay.start().await?;
/// ```
pub struct LogRelay<S: ObjectStore> {
    config: PipelineConfig,
    state: RelayState,
    queue: Arc<IngestionQueue>,
    notifier: Notifier,
    stream: Arc<DeliveryStream<S>>,
    dispatcher: Arc<Dispatcher<S>>,
    /// 정지 상태에서 보관하는 워처 (실행 중에는 태스크가 소유)
    watcher: Option<LandingWatcher<S>>,
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    flusher: Option<JoinHandle<()>>,
    janitor: Option<JoinHandle<()>>,
    watcher_task: Option<JoinHandle<LandingWatcher<S>>>,
}

impl<S: ObjectStore> LogRelay<S> {
    /// 현재 상태 이름
    pub fn state_name(&self) -> &'static str {
        match self.state {
            RelayState::Initialized => "initialized",
            RelayState::Running => "running",
            RelayState::Stopped => "stopped",
        }
    }

    /// 인제스천 큐
    pub fn queue(&self) -> &Arc<IngestionQueue> {
        &self.queue
    }

    /// 외부 알림 진입점
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// 딜리버리 스트림
    pub fn stream(&self) -> &Arc<DeliveryStream<S>> {
        &self.stream
    }

    /// 디스패처 (누적 카운터 조회용)
    pub fn dispatcher(&self) -> &Arc<Dispatcher<S>> {
        &self.dispatcher
    }

    /// 파이프라인 설정
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 큐 통계
    pub async fn queue_stats(&self) -> QueueStats {
        self.queue.stats().await
    }

    /// 데드레터를 다시 큐에 넣습니다 (운영자 수동 재처리).
    pub async fn replay_dead_letters(&self) -> usize {
        self.queue.replay_dead_letters().await
    }

    /// 현재 상태의 스냅샷을 만듭니다.
    ///
    /// 실행 중에는 워처가 태스크에 있으므로 본 키 목록은 비어 있습니다.
    pub async fn snapshot(&self) -> RelaySnapshot {
        let mut seen_keys: Vec<String> = self
            .watcher
            .as_ref()
            .map(|w| w.seen_keys().iter().cloned().collect())
            .unwrap_or_default();
        seen_keys.sort();
        RelaySnapshot {
            queue: self.queue.snapshot().await,
            seen_keys,
        }
    }

    async fn persist_snapshot(&self) -> Result<(), RelayPipelineError> {
        let Some(path) = &self.config.snapshot_path else {
            return Ok(());
        };
        let snapshot = self.snapshot().await;
        snapshot.save(path).await?;
        info!(
            path = %path.display(),
            pending = snapshot.queue.pending.len(),
            dead_letters = snapshot.queue.dead_letters.len(),
            "relay snapshot saved"
        );
        Ok(())
    }

    fn spawn_janitor(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let queue = Arc::clone(&self.queue);
        let period = self
            .config
            .visibility_timeout
            .min(MAX_JANITOR_INTERVAL)
            .max(Duration::from_millis(10));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = queue.purge_expired().await;
                        if purged > 0 {
                            warn!(purged, "messages purged after retention period");
                        }
                    }
                }
            }
        })
    }
}

impl<S: ObjectStore> Pipeline for LogRelay<S> {
    async fn start(&mut self) -> Result<(), RelayError> {
        if self.state == RelayState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            workers = self.config.workers,
            batch_size = self.config.batch_size,
            resources = self.config.resources.len(),
            "starting log relay"
        );

        self.cancel = CancellationToken::new();
        self.workers = self.dispatcher.spawn_workers(&self.cancel);
        self.flusher = Some(self.stream.spawn_flusher(self.cancel.child_token()));
        self.janitor = Some(self.spawn_janitor(self.cancel.child_token()));
        if let Some(watcher) = self.watcher.take() {
            self.watcher_task = Some(tokio::spawn(watcher.run(self.cancel.child_token())));
        }

        self.state = RelayState::Running;
        info!("log relay started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), RelayError> {
        if self.state != RelayState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping log relay");

        // 1. 워커: 처리 중인 배치를 마칠 때까지 대기
        self.cancel.cancel();
        for worker in self.workers.drain(..) {
            if let Err(e) = worker.await {
                warn!(error = %e, "dispatcher worker ended abnormally");
            }
        }
        if let Some(task) = self.watcher_task.take() {
            match task.await {
                Ok(watcher) => self.watcher = Some(watcher),
                Err(e) => warn!(error = %e, "landing watcher ended abnormally"),
            }
        }
        for task in [self.flusher.take(), self.janitor.take()].into_iter().flatten() {
            if let Err(e) = task.await {
                warn!(error = %e, "background task ended abnormally");
            }
        }

        // 2. 열린 배치 플러시
        let flush_result = self.stream.flush_all().await;
        match &flush_result {
            Ok(flushed) => info!(batches = flushed, "open batches flushed"),
            Err(e) => warn!(error = %e, "some batches could not be flushed"),
        }

        // 3. 스냅샷 저장
        self.persist_snapshot().await?;

        self.state = RelayState::Stopped;
        info!("log relay stopped");
        flush_result.map(|_| ()).map_err(RelayError::from)
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            RelayState::Running => {
                let stats = self.queue.stats().await;
                let max_depth = self.config.max_depth;
                if stats.dead_letters > 0 {
                    HealthStatus::Degraded(format!("{} dead-lettered messages", stats.dead_letters))
                } else if stats.depth() as f64 >= max_depth as f64 * DEPTH_DEGRADED_RATIO {
                    HealthStatus::Degraded(format!(
                        "queue depth high: {}/{}",
                        stats.depth(),
                        max_depth
                    ))
                } else {
                    HealthStatus::Healthy
                }
            }
            RelayState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            RelayState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 로그 릴레이 빌더
pub struct LogRelayBuilder<S: ObjectStore> {
    config: PipelineConfig,
    landing: Option<Arc<S>>,
    sink: Option<Arc<S>>,
    parsers: Option<ParserRegistry>,
    watch_landing: bool,
}

impl<S: ObjectStore> LogRelayBuilder<S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: PipelineConfig::default(),
            landing: None,
            sink: None,
            parsers: None,
            watch_landing: true,
        }
    }

    /// 파이프라인 설정을 지정합니다.
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// 원본 로그가 도착하는 랜딩 스토어
    pub fn landing(mut self, store: S) -> Self {
        self.landing = Some(Arc::new(store));
        self
    }

    /// 배치가 기록될 싱크 스토어
    pub fn sink(mut self, store: S) -> Self {
        self.sink = Some(Arc::new(store));
        self
    }

    /// 기본 파서 대신 사용할 레지스트리
    pub fn parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = Some(parsers);
        self
    }

    /// 랜딩 스토어 폴링 여부 (기본값: 켜짐)
    ///
    /// 끄면 [`LogRelay::notifier`]로만 메시지가 들어옵니다.
    pub fn watch_landing(mut self, enabled: bool) -> Self {
        self.watch_landing = enabled;
        self
    }

    /// 파이프라인을 빌드합니다.
    ///
    /// `snapshot_path`에 스냅샷이 있으면 큐와 워처 상태를 복원합니다.
    pub async fn build(self) -> Result<LogRelay<S>, RelayPipelineError> {
        self.config.validate()?;
        let landing = self.landing.ok_or_else(|| missing("landing"))?;
        let sink = self.sink.ok_or_else(|| missing("sink"))?;

        let resolver = Arc::new(ResourceTypeMap::from_entries(&self.config.resources)?);
        let parsers = Arc::new(match self.parsers {
            Some(parsers) => parsers,
            None => ParserRegistry::with_defaults()?,
        });

        let snapshot = match &self.config.snapshot_path {
            Some(path) => load_snapshot(path).await,
            None => None,
        };
        let settings = QueueSettings::from(&self.config);
        let (queue, seen_keys) = match snapshot {
            Some(snapshot) => (
                IngestionQueue::restore(settings, snapshot.queue),
                snapshot.seen_keys,
            ),
            None => (IngestionQueue::new(settings), Vec::new()),
        };
        let queue = Arc::new(queue);

        let notifier = Notifier::new(
            Arc::clone(&queue),
            self.config.enqueue_max_attempts,
            self.config.enqueue_backoff,
        );
        let stream = Arc::new(DeliveryStream::from_config(sink, &self.config)?);
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&queue),
            Arc::clone(&landing),
            resolver,
            parsers,
            Arc::clone(&stream),
            DispatcherSettings::from(&self.config),
        ));
        let watcher = self.watch_landing.then(|| {
            let mut watcher =
                LandingWatcher::new(landing, notifier.clone(), self.config.watch_interval);
            watcher.mark_seen(seen_keys);
            watcher
        });

        Ok(LogRelay {
            config: self.config,
            state: RelayState::Initialized,
            queue,
            notifier,
            stream,
            dispatcher,
            watcher,
            cancel: CancellationToken::new(),
            workers: Vec::new(),
            flusher: None,
            janitor: None,
            watcher_task: None,
        })
    }
}

impl<S: ObjectStore> Default for LogRelayBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

fn missing(store: &str) -> RelayPipelineError {
    RelayPipelineError::Config {
        field: store.to_owned(),
        reason: format!("{store} store must be set"),
    }
}

/// 손상된 스냅샷은 경고 후 무시하고 빈 상태로 시작합니다.
async fn load_snapshot(path: &Path) -> Option<RelaySnapshot> {
    match RelaySnapshot::load(path).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "ignoring unreadable relay snapshot");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfigBuilder;
    use crate::store::MemoryObjectStore;
    use logrelay_core::types::FormatKind;
    use std::path::PathBuf;

    fn config(snapshot: Option<PathBuf>) -> PipelineConfig {
        PipelineConfigBuilder::new()
            .workers(2)
            .receive_wait(Duration::from_millis(20))
            .watch_interval(Duration::from_millis(20))
            .time_threshold(Duration::from_secs(60))
            .snapshot_path(snapshot)
            .resource("web-instance", FormatKind::Clf)
            .build()
            .unwrap()
    }

    async fn relay(
        landing: &MemoryObjectStore,
        sink: &MemoryObjectStore,
        snapshot: Option<PathBuf>,
    ) -> LogRelay<MemoryObjectStore> {
        LogRelayBuilder::new()
            .config(config(snapshot))
            .landing(landing.clone())
            .sink(sink.clone())
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn builder_requires_stores() {
        let result = LogRelayBuilder::<MemoryObjectStore>::new()
            .config(config(None))
            .build()
            .await;
        assert!(matches!(result, Err(RelayPipelineError::Config { .. })));
    }

    #[tokio::test]
    async fn builder_with_invalid_config_fails() {
        let mut config = config(None);
        config.batch_size = 0;
        let result = LogRelayBuilder::new()
            .config(config)
            .landing(MemoryObjectStore::new())
            .sink(MemoryObjectStore::new())
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn lifecycle_and_health() {
        let (landing, sink) = (MemoryObjectStore::new(), MemoryObjectStore::new());
        let mut relay = relay(&landing, &sink, None).await;
        assert_eq!(relay.state_name(), "initialized");
        assert!(relay.health_check().await.is_unhealthy());
        assert!(relay.stop().await.is_err());

        relay.start().await.unwrap();
        assert!(relay.start().await.is_err());
        assert!(relay.health_check().await.is_healthy());

        relay.stop().await.unwrap();
        assert_eq!(relay.state_name(), "stopped");
        assert!(relay.health_check().await.is_unhealthy());
    }

    #[tokio::test]
    async fn stop_flushes_open_batches() {
        let (landing, sink) = (MemoryObjectStore::new(), MemoryObjectStore::new());
        landing
            .insert(
                "web-instance/2024/03/02/access.log",
                r#"10.0.0.1 - - [02/Mar/2024:10:00:00 +0000] "GET / HTTP/1.1" 200 5"#,
            )
            .await;
        let mut relay = relay(&landing, &sink, None).await;
        relay.start().await.unwrap();

        while relay.dispatcher().stats().objects_acked() < 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sink.keys().await.is_empty());

        relay.stop().await.unwrap();
        let keys = sink.keys().await;
        assert_eq!(keys.len(), 1);
        assert!(keys[0].starts_with("clf/2024/03/02/"));
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("snapshot.json");
        let (landing, sink) = (MemoryObjectStore::new(), MemoryObjectStore::new());

        let mut first = relay(&landing, &sink, Some(path.clone())).await;
        first
            .notifier()
            .notify(logrelay_core::event::CreationEvent {
                source_id: "web-instance".to_owned(),
                object_key: "web-instance/missing.log".to_owned(),
                size: 1,
                event_time: chrono::Utc::now(),
            })
            .await
            .unwrap();
        first.persist_snapshot().await.unwrap();

        let saved = RelaySnapshot::load(&path).await.unwrap().unwrap();
        assert_eq!(saved.queue.pending.len(), 1);

        let second = relay(&landing, &sink, Some(path)).await;
        assert_eq!(second.queue_stats().await.visible, 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        tokio::fs::write(&path, b"{ not json").await.unwrap();
        let (landing, sink) = (MemoryObjectStore::new(), MemoryObjectStore::new());
        let relay = relay(&landing, &sink, Some(path)).await;
        assert_eq!(relay.queue_stats().await.depth(), 0);
    }
}
