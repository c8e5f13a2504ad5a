//! 파티션 딜리버리 스트림
//!
//! [`DeliveryStream`]은 레코드를 `(형식, 날짜)` 파티션별 [`DeliveryBatch`]에
//! 모으고, 크기 또는 나이 임계값에 도달하면 gzip NDJSON 오브젝트로 싱크에 씁니다.
//!
//! # 플러시 규칙
//! - 크기 트리거는 `submit` 안에서 동기적으로 검사합니다. 제출한 워커가 직접
//!   플러시하므로 싱크가 느리면 워커가 대기합니다 (백프레셔).
//! - 나이 트리거는 `submit`과 백그라운드 플러셔가 함께 검사합니다.
//! - 파티션마다 한 번에 한 writer만 씁니다. 서로 다른 파티션은 동시에 씁니다.
//!
//! # 실패 처리
//! 일시 장애는 지수 백오프로 재시도하고, 재시도가 소진되면 배치 전체를
//! `delivery-failed` 에러 파티션에 주석을 달아 기록합니다. 그것마저 실패하면
//! 배치를 버퍼로 되돌리고 [`RelayPipelineError::DeliveryFailure`]를 반환합니다.

pub mod batch;
pub mod encode;
pub mod path;

pub use batch::{DeliveryBatch, FlushTrigger, PartitionKey};
pub use path::PartitionTemplate;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use logrelay_core::error::StorageError;
use logrelay_core::metrics as m;
use logrelay_core::types::{ErrorKind, ParsedRecord};

use crate::config::PipelineConfig;
use crate::error::RelayPipelineError;
use crate::store::ObjectStore;

/// 딜리버리 스트림 설정
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// 크기 트리거 (바이트)
    pub size_threshold: usize,
    /// 나이 트리거
    pub time_threshold: Duration,
    /// 싱크 쓰기 최대 시도 횟수
    pub retry_max_attempts: u32,
    /// 첫 재시도 대기
    pub retry_backoff_base: Duration,
    /// 재시도 대기 상한
    pub retry_backoff_max: Duration,
    /// 백그라운드 플러셔 틱
    pub flush_tick: Duration,
}

impl From<&PipelineConfig> for DeliverySettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            size_threshold: config.size_threshold_bytes,
            time_threshold: config.time_threshold,
            retry_max_attempts: config.retry_max_attempts.max(1),
            retry_backoff_base: config.retry_backoff_base,
            retry_backoff_max: config.retry_backoff_max,
            flush_tick: config.flush_tick(),
        }
    }
}

type Slot = Arc<Mutex<DeliveryBatch>>;

/// 파티션 딜리버리 스트림
pub struct DeliveryStream<S: ObjectStore> {
    sink: Arc<S>,
    settings: DeliverySettings,
    data_path: PartitionTemplate,
    error_path: PartitionTemplate,
    partitions: Mutex<HashMap<PartitionKey, Slot>>,
}

impl<S: ObjectStore> DeliveryStream<S> {
    /// 새 딜리버리 스트림을 생성합니다.
    pub fn new(
        sink: Arc<S>,
        settings: DeliverySettings,
        data_path: PartitionTemplate,
        error_path: PartitionTemplate,
    ) -> Self {
        Self {
            sink,
            settings,
            data_path,
            error_path,
            partitions: Mutex::new(HashMap::new()),
        }
    }

    /// 파이프라인 설정으로 스트림을 생성합니다.
    pub fn from_config(sink: Arc<S>, config: &PipelineConfig) -> Result<Self, RelayPipelineError> {
        Ok(Self::new(
            sink,
            DeliverySettings::from(config),
            PartitionTemplate::data(&config.path_template)?,
            PartitionTemplate::error(&config.error_path_template)?,
        ))
    }

    /// 스트림 설정
    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    async fn slot(&self, key: &PartitionKey) -> Slot {
        let mut partitions = self.partitions.lock().await;
        if let Some(slot) = partitions.get(key) {
            return Arc::clone(slot);
        }
        let slot = Arc::new(Mutex::new(DeliveryBatch::new(key.clone())));
        partitions.insert(key.clone(), Arc::clone(&slot));
        slot
    }

    async fn slots(&self) -> Vec<Slot> {
        self.partitions.lock().await.values().cloned().collect()
    }

    /// 비어 있고 다른 곳에서 참조하지 않는 파티션 슬롯을 제거합니다.
    ///
    /// 맵 락을 쥔 동안에는 새 참조가 생기지 않으므로, 참조 수가 1이면
    /// 진행 중인 `submit`이 없습니다.
    async fn prune_idle_slots(&self) {
        let mut partitions = self.partitions.lock().await;
        let before = partitions.len();
        partitions.retain(|_, slot| {
            Arc::strong_count(slot) > 1
                || match slot.try_lock() {
                    Ok(batch) => !batch.is_empty(),
                    Err(_) => true,
                }
        });
        let released = before - partitions.len();
        if released > 0 {
            debug!(released, remaining = partitions.len(), "idle partitions released");
        }
    }

    /// 레코드 하나를 파티션 배치에 추가합니다.
    ///
    /// 임계값에 도달하면 반환 전에 그 배치를 플러시합니다.
    /// `Ok`는 레코드가 배치나 싱크에 안전하게 수락되었음을 뜻합니다.
    pub async fn submit(&self, record: ParsedRecord) -> Result<(), RelayPipelineError> {
        let key = PartitionKey::for_record(&record);
        let slot = self.slot(&key).await;
        let mut batch = slot.lock().await;
        batch.push(record)?;
        match batch.flush_trigger(self.settings.size_threshold, self.settings.time_threshold) {
            Some(trigger) => self.flush_locked(&mut batch, trigger).await,
            None => Ok(()),
        }
    }

    /// 레코드 묶음을 순서대로 제출합니다.
    pub async fn submit_all(
        &self,
        records: impl IntoIterator<Item = ParsedRecord>,
    ) -> Result<(), RelayPipelineError> {
        for record in records {
            self.submit(record).await?;
        }
        Ok(())
    }

    /// 파티션 락을 쥔 상태에서 배치를 꺼내 씁니다. 실패하면 되돌립니다.
    async fn flush_locked(
        &self,
        batch: &mut DeliveryBatch,
        trigger: FlushTrigger,
    ) -> Result<(), RelayPipelineError> {
        let full = batch.take();
        match self.write_batch(&full, trigger).await {
            Ok(()) => Ok(()),
            Err(e) => {
                batch.restore(full);
                Err(e)
            }
        }
    }

    /// 나이 임계값을 넘긴 배치를 모두 플러시하고 플러시한 배치 수를 반환합니다.
    ///
    /// 실패한 배치는 버퍼에 남아 다음 틱에 다시 시도됩니다.
    pub async fn flush_expired(&self) -> usize {
        let mut flushed = 0;
        let mut open = 0;
        for slot in self.slots().await {
            let mut batch = slot.lock().await;
            if let Some(trigger) =
                batch.flush_trigger(self.settings.size_threshold, self.settings.time_threshold)
            {
                match self.flush_locked(&mut batch, trigger).await {
                    Ok(()) => flushed += 1,
                    Err(e) => {
                        error!(partition = %batch.key(), error = %e, "background flush failed")
                    }
                }
            }
            if !batch.is_empty() {
                open += 1;
            }
        }
        self.prune_idle_slots().await;
        metrics::gauge!(m::DELIVERY_OPEN_BATCHES).set(open as f64);
        flushed
    }

    /// 열린 배치를 모두 플러시합니다 (종료 시).
    ///
    /// 모든 파티션을 시도한 뒤 첫 번째 에러를 반환합니다.
    pub async fn flush_all(&self) -> Result<usize, RelayPipelineError> {
        let mut flushed = 0;
        let mut first_error = None;
        for slot in self.slots().await {
            let mut batch = slot.lock().await;
            if batch.is_empty() {
                continue;
            }
            match self.flush_locked(&mut batch, FlushTrigger::Shutdown).await {
                Ok(()) => flushed += 1,
                Err(e) => {
                    error!(partition = %batch.key(), error = %e, "shutdown flush failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.prune_idle_slots().await;
        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    /// 단일 엔트리를 에러 파티션에 바로 기록합니다.
    pub async fn route_error(
        &self,
        kind: ErrorKind,
        entry: &ParsedRecord,
        reason: &str,
    ) -> Result<(), RelayPipelineError> {
        let mut body = Vec::new();
        encode::encode_line(entry, &mut body)?;
        let annotated = encode::annotate(&body, kind, reason)?;
        let key = self.error_path.render(
            kind.as_str(),
            entry.event_time.date_naive(),
            uuid::Uuid::new_v4(),
        );
        self.put_with_retry(&key, encode::gzip(&annotated)?)
            .await
            .map_err(|e| RelayPipelineError::DeliveryFailure {
                partition: format!("errors/{kind}"),
                reason: e.to_string(),
            })?;
        metrics::counter!(m::DELIVERY_ERROR_ENTRIES_TOTAL, m::LABEL_ERROR_KIND => kind.as_str())
            .increment(1);
        debug!(key = %key, error_kind = %kind, "error entry written");
        Ok(())
    }

    /// 열린(비어 있지 않은) 배치 수
    pub async fn open_batches(&self) -> usize {
        let mut open = 0;
        for slot in self.slots().await {
            if !slot.lock().await.is_empty() {
                open += 1;
            }
        }
        open
    }

    /// 백그라운드 나이 플러셔를 시작합니다.
    ///
    /// 취소되면 마지막으로 한 번 더 만료 배치를 플러시하고 종료합니다.
    pub fn spawn_flusher(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let stream = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(stream.settings.flush_tick);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let flushed = stream.flush_expired().await;
                        if flushed > 0 {
                            debug!(flushed, "age-triggered flush");
                        }
                    }
                }
            }
            info!("delivery flusher stopped");
        })
    }

    async fn write_batch(
        &self,
        batch: &DeliveryBatch,
        trigger: FlushTrigger,
    ) -> Result<(), RelayPipelineError> {
        let started = Instant::now();
        let partition = batch.key();
        let key = self.data_path.render(&partition.label, partition.day, batch.id());

        let last_error = match self.put_with_retry(&key, encode::gzip(batch.body())?).await {
            Ok(()) => {
                metrics::counter!(
                    m::DELIVERY_BATCHES_FLUSHED_TOTAL,
                    m::LABEL_FORMAT => partition.label.clone(),
                    m::LABEL_TRIGGER => trigger.as_str()
                )
                .increment(1);
                metrics::counter!(m::DELIVERY_RECORDS_FLUSHED_TOTAL, m::LABEL_FORMAT => partition.label.clone())
                    .increment(batch.len() as u64);
                metrics::histogram!(m::DELIVERY_FLUSH_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                debug!(
                    key = %key,
                    records = batch.len(),
                    bytes = batch.byte_size(),
                    trigger = trigger.as_str(),
                    "batch flushed"
                );
                return Ok(());
            }
            Err(e) => e,
        };

        warn!(
            partition = %partition,
            batch_id = %batch.id(),
            error = %last_error,
            "sink write retries exhausted, routing batch to error partition"
        );
        let kind = ErrorKind::DeliveryFailed;
        let annotated = encode::annotate(batch.body(), kind, &last_error.to_string())?;
        let error_key = self.error_path.render(kind.as_str(), partition.day, batch.id());
        self.put_with_retry(&error_key, encode::gzip(&annotated)?)
            .await
            .map_err(|e| RelayPipelineError::DeliveryFailure {
                partition: partition.to_string(),
                reason: e.to_string(),
            })?;
        metrics::counter!(m::DELIVERY_ERROR_ENTRIES_TOTAL, m::LABEL_ERROR_KIND => kind.as_str())
            .increment(batch.len() as u64);
        Ok(())
    }

    /// 일시 장애를 지수 백오프로 재시도하며 싱크에 씁니다.
    async fn put_with_retry(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        let mut backoff = self.settings.retry_backoff_base;
        let mut attempt = 1;
        loop {
            match self.sink.put(key, body.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.settings.retry_max_attempts => {
                    debug!(key, attempt, backoff_ms = backoff.as_millis() as u64, error = %e, "sink write failed, retrying");
                    metrics::counter!(m::DELIVERY_RETRIES_TOTAL).increment(1);
                    tokio::time::sleep(backoff.min(self.settings.retry_backoff_max)).await;
                    backoff = backoff.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
