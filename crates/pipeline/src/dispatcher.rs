//! 포맷 디스패처 워커 풀
//!
//! 각 워커는 큐에서 최대 `batch_size`개의 메시지를 받아 순서대로 처리합니다.
//!
//! ```text
//! receive -> resolve(resource) -> get(object) -> gunzip? -> parse lines -> submit -> ack
//!                 |
//!                 +-- FormatUnknown -> route_error(format-unknown) -> ack
//! ```
//!
//! 처리에 실패한 메시지는 ack하지 않습니다. 가시성 타임아웃이 지나면 다시
//! 전달되고, `max_receives`를 넘기면 큐가 데드레터로 옮깁니다.

use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flate2::read::MultiGzDecoder;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use logrelay_core::metrics as m;
use logrelay_core::pipeline::LineParser;
use logrelay_core::types::{ErrorKind, FormatKind, ParsedRecord, RawLogObject};

use crate::config::PipelineConfig;
use crate::delivery::DeliveryStream;
use crate::error::RelayPipelineError;
use crate::parser::ParserRegistry;
use crate::queue::{IngestionQueue, ReceivedMessage};
use crate::resolver::ResourceTypeMap;
use crate::store::ObjectStore;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// 라인 에러 로그를 남기는 최대 개수 (오브젝트당)
const MAX_LOGGED_LINE_ERRORS: usize = 5;

/// 디스패처 설정
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// 워커 수
    pub workers: usize,
    /// 워커당 한 번에 받는 메시지 수
    pub batch_size: usize,
    /// 빈 큐에서 대기하는 최대 시간
    pub receive_wait: Duration,
    /// 실패 라인 비율 임계값 (초과 시 오브젝트 실패)
    pub failure_threshold: f64,
    /// 제출 청크당 최대 레코드 수
    pub submit_max_records: usize,
    /// 제출 청크당 최대 바이트 수
    pub submit_max_bytes: usize,
}

impl From<&PipelineConfig> for DispatcherSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            workers: config.workers,
            batch_size: config.batch_size,
            receive_wait: config.receive_wait,
            failure_threshold: config.failure_threshold,
            submit_max_records: config.submit_max_records,
            submit_max_bytes: config.submit_max_bytes,
        }
    }
}

/// 오브젝트 하나를 파싱한 결과
#[derive(Debug, Default)]
pub struct ParsedObject {
    /// 성공한 레코드 (라인 순서 유지)
    pub records: Vec<ParsedRecord>,
    /// 파싱 실패 라인 수
    pub failed_lines: usize,
    /// 필터로 건너뛴 라인 수 (헤더, 헬스체크)
    pub filtered_lines: usize,
}

impl ParsedObject {
    /// 파싱을 시도한 라인 수 (필터/빈 라인 제외)
    pub fn attempted(&self) -> usize {
        self.records.len() + self.failed_lines
    }

    /// 실패 비율이 임계값을 **초과**하는지 확인합니다.
    pub fn exceeds(&self, threshold: f64) -> bool {
        let attempted = self.attempted();
        attempted > 0 && (self.failed_lines as f64 / attempted as f64) > threshold
    }
}

/// 처리한 오브젝트 요약
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectReport {
    /// 해석된 형식
    pub format: FormatKind,
    /// 제출한 레코드 수
    pub records: usize,
    /// 실패 라인 수
    pub failed_lines: usize,
    /// 필터된 라인 수
    pub filtered_lines: usize,
}

/// 메시지 처리 결과 (모두 ack된 경우)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectOutcome {
    /// 레코드를 스트림에 제출함
    Delivered(ObjectReport),
    /// 필터 후 레코드가 없음
    Empty(ObjectReport),
    /// 리소스 맵에 없어 에러 파티션으로 보냄
    FormatUnknown,
}

impl ObjectOutcome {
    fn result_label(&self) -> &'static str {
        match self {
            Self::Delivered(_) => "delivered",
            Self::Empty(_) => "empty",
            Self::FormatUnknown => "format_unknown",
        }
    }
}

/// 배치 처리 요약
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// ack한 메시지 수
    pub acked: usize,
    /// 실패로 남겨둔 메시지 수
    pub failed: usize,
}

/// 디스패처 누적 카운터
#[derive(Debug, Default)]
pub struct DispatcherStats {
    objects_acked: AtomicU64,
    objects_failed: AtomicU64,
    records: AtomicU64,
    line_errors: AtomicU64,
}

impl DispatcherStats {
    /// ack한 오브젝트 수
    pub fn objects_acked(&self) -> u64 {
        self.objects_acked.load(Ordering::Relaxed)
    }

    /// 실패한 처리 시도 수
    pub fn objects_failed(&self) -> u64 {
        self.objects_failed.load(Ordering::Relaxed)
    }

    /// 제출한 레코드 수
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }

    /// 실패 라인 수
    pub fn line_errors(&self) -> u64 {
        self.line_errors.load(Ordering::Relaxed)
    }
}

/// 포맷 디스패처
pub struct Dispatcher<S: ObjectStore> {
    queue: Arc<IngestionQueue>,
    landing: Arc<S>,
    resolver: Arc<ResourceTypeMap>,
    parsers: Arc<ParserRegistry>,
    stream: Arc<DeliveryStream<S>>,
    settings: DispatcherSettings,
    stats: DispatcherStats,
}

impl<S: ObjectStore> Dispatcher<S> {
    /// 새 디스패처를 생성합니다.
    pub fn new(
        queue: Arc<IngestionQueue>,
        landing: Arc<S>,
        resolver: Arc<ResourceTypeMap>,
        parsers: Arc<ParserRegistry>,
        stream: Arc<DeliveryStream<S>>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            queue,
            landing,
            resolver,
            parsers,
            stream,
            settings,
            stats: DispatcherStats::default(),
        }
    }

    /// 누적 카운터
    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }

    /// 설정
    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// `workers`개의 워커 태스크를 시작합니다.
    ///
    /// 취소되면 각 워커는 처리 중인 배치를 마치고 종료합니다.
    pub fn spawn_workers(self: &Arc<Self>, cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.settings.workers)
            .map(|worker| {
                let dispatcher = Arc::clone(self);
                let cancel = cancel.clone();
                tokio::spawn(async move { dispatcher.run_worker(worker, cancel).await })
            })
            .collect()
    }

    async fn run_worker(&self, worker: usize, cancel: CancellationToken) {
        debug!(worker, "dispatcher worker started");
        loop {
            let batch = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                batch = self.queue.receive_wait(self.settings.batch_size, self.settings.receive_wait) => batch,
            };
            if batch.is_empty() {
                continue;
            }
            let summary = self.process(batch).await;
            debug!(worker, acked = summary.acked, failed = summary.failed, "batch processed");
        }
        debug!(worker, "dispatcher worker stopped");
    }

    /// 받은 메시지 배치를 순서대로 처리합니다.
    ///
    /// 한 메시지의 실패는 나머지 메시지 처리에 영향을 주지 않습니다.
    pub async fn process(&self, batch: Vec<ReceivedMessage>) -> BatchSummary {
        let mut summary = BatchSummary::default();
        for message in batch {
            match self.process_message(message).await {
                Ok(_) => summary.acked += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    /// 메시지 하나를 처리하고 성공하면 ack합니다.
    ///
    /// 실패하면 사유를 큐에 기록하고 ack하지 않은 채 에러를 반환합니다.
    pub async fn process_message(
        &self,
        message: ReceivedMessage,
    ) -> Result<ObjectOutcome, RelayPipelineError> {
        let started = Instant::now();
        let receipt = message.receipt;
        self.queue.start_processing(&receipt).await?;

        match self.handle_object(&message.object).await {
            Ok(outcome) => {
                self.queue.ack(&receipt).await?;
                self.stats.objects_acked.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::DISPATCHER_OBJECTS_TOTAL, m::LABEL_RESULT => outcome.result_label())
                    .increment(1);
                metrics::histogram!(m::DISPATCHER_OBJECT_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                Ok(outcome)
            }
            Err(e) => {
                warn!(
                    object_key = %message.object.object_key,
                    receipt = %receipt,
                    error = %e,
                    "object processing failed, leaving message for redelivery"
                );
                self.stats.objects_failed.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(m::DISPATCHER_OBJECTS_TOTAL, m::LABEL_RESULT => "failed")
                    .increment(1);
                self.queue.record_failure(&receipt, e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn handle_object(&self, object: &RawLogObject) -> Result<ObjectOutcome, RelayPipelineError> {
        let format = match self.resolver.resolve(&object.source_id) {
            Ok(format) => format,
            Err(unknown @ RelayPipelineError::FormatUnknown { .. }) => {
                metrics::counter!(m::DISPATCHER_FORMAT_UNKNOWN_TOTAL).increment(1);
                warn!(
                    resource = %object.source_id,
                    object_key = %object.object_key,
                    "resource not in resource map, routing to error partition"
                );
                let entry = format_unknown_entry(object);
                self.stream
                    .route_error(ErrorKind::FormatUnknown, &entry, &unknown.to_string())
                    .await?;
                return Ok(ObjectOutcome::FormatUnknown);
            }
            Err(e) => return Err(e),
        };
        let parser = self
            .parsers
            .get(format)
            .ok_or_else(|| RelayPipelineError::Config {
                field: "parsers".to_owned(),
                reason: format!("no parser registered for {format}"),
            })?;

        let raw = self.landing.get(&object.object_key).await?;
        let data = decode_object(&raw)?;
        let text = String::from_utf8_lossy(&data);
        let parsed = parse_lines(parser, &object.source_id, &object.object_key, &text);

        let label = format.as_str();
        metrics::counter!(m::DISPATCHER_PARSE_ERRORS_TOTAL, m::LABEL_FORMAT => label)
            .increment(parsed.failed_lines as u64);
        metrics::counter!(m::DISPATCHER_LINES_FILTERED_TOTAL, m::LABEL_FORMAT => label)
            .increment(parsed.filtered_lines as u64);
        self.stats
            .line_errors
            .fetch_add(parsed.failed_lines as u64, Ordering::Relaxed);

        if parsed.exceeds(self.settings.failure_threshold) {
            return Err(RelayPipelineError::ObjectParseFailure {
                object_key: object.object_key.clone(),
                failed: parsed.failed_lines,
                total: parsed.attempted(),
                threshold: self.settings.failure_threshold,
            });
        }

        let report = ObjectReport {
            format,
            records: parsed.records.len(),
            failed_lines: parsed.failed_lines,
            filtered_lines: parsed.filtered_lines,
        };
        if parsed.records.is_empty() {
            warn!(
                object_key = %object.object_key,
                failed = report.failed_lines,
                filtered = report.filtered_lines,
                "object produced no records"
            );
            return Ok(ObjectOutcome::Empty(report));
        }

        let chunks = chunk_records(
            parsed.records,
            self.settings.submit_max_records,
            self.settings.submit_max_bytes,
        );
        let chunk_count = chunks.len();
        for chunk in chunks {
            self.stream.submit_all(chunk).await?;
        }

        self.stats
            .records
            .fetch_add(report.records as u64, Ordering::Relaxed);
        metrics::counter!(m::DISPATCHER_RECORDS_TOTAL, m::LABEL_FORMAT => label)
            .increment(report.records as u64);
        info!(
            object_key = %object.object_key,
            format = label,
            records = report.records,
            failed = report.failed_lines,
            filtered = report.filtered_lines,
            chunks = chunk_count,
            "object dispatched"
        );
        Ok(ObjectOutcome::Delivered(report))
    }
}

/// gzip 매직 바이트가 있으면 압축을 풉니다.
pub fn decode_object(raw: &[u8]) -> Result<Cow<'_, [u8]>, RelayPipelineError> {
    if !raw.starts_with(&GZIP_MAGIC) {
        return Ok(Cow::Borrowed(raw));
    }
    let mut out = Vec::with_capacity(raw.len() * 4);
    MultiGzDecoder::new(raw).read_to_end(&mut out)?;
    Ok(Cow::Owned(out))
}

/// 오브젝트 본문을 라인 단위로 파싱합니다.
///
/// 빈 라인은 무시하고, 파서가 건너뛰라고 한 라인은 필터로 셉니다.
/// 라인 순서는 유지됩니다.
pub fn parse_lines(
    parser: &dyn LineParser,
    resource_name: &str,
    object_key: &str,
    text: &str,
) -> ParsedObject {
    let format = parser.format();
    let mut parsed = ParsedObject::default();
    for (number, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parser.parse_or_skip(line) {
            Ok(None) => parsed.filtered_lines += 1,
            Ok(Some(line_record)) => parsed.records.push(ParsedRecord {
                resource_type: Some(format),
                resource_name: resource_name.to_owned(),
                event_time: line_record.event_time,
                fields: line_record.fields,
            }),
            Err(e) => {
                parsed.failed_lines += 1;
                if parsed.failed_lines <= MAX_LOGGED_LINE_ERRORS {
                    debug!(object_key, line = number + 1, format = %format, error = %e, "line parse failed");
                }
            }
        }
    }
    parsed
}

/// 레코드를 개수/바이트 제한에 맞춰 청크로 나눕니다.
///
/// 한 레코드가 바이트 제한보다 크면 단독 청크가 됩니다.
pub fn chunk_records(
    records: Vec<ParsedRecord>,
    max_records: usize,
    max_bytes: usize,
) -> Vec<Vec<ParsedRecord>> {
    let max_records = max_records.max(1);
    let mut chunks = Vec::new();
    let mut chunk = Vec::new();
    let mut bytes = 0;
    for record in records {
        let size = record.approx_size();
        if !chunk.is_empty() && (chunk.len() >= max_records || bytes + size > max_bytes) {
            chunks.push(std::mem::take(&mut chunk));
            bytes = 0;
        }
        bytes += size;
        chunk.push(record);
    }
    if !chunk.is_empty() {
        chunks.push(chunk);
    }
    chunks
}

fn format_unknown_entry(object: &RawLogObject) -> ParsedRecord {
    ParsedRecord {
        resource_type: None,
        resource_name: object.source_id.clone(),
        event_time: object.created_at,
        fields: vec![
            ("object_key".to_owned(), object.object_key.clone()),
            ("size".to_owned(), object.size.to_string()),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliverySettings, PartitionTemplate};
    use crate::queue::QueueSettings;
    use crate::store::MemoryObjectStore;
    use chrono::{TimeZone, Utc};
    use logrelay_core::config::ResourceEntry;
    use std::io::Write;

    const CLF_LINE: &str =
        r#"10.0.0.1 - - [02/Mar/2024:10:00:00 +0000] "GET /index.html HTTP/1.1" 200 512 "-" "curl/8.0""#;
    const HEALTH_LINE: &str =
        r#"10.0.0.2 - - [02/Mar/2024:10:00:01 +0000] "GET /health HTTP/1.1" 200 2 "-" "ELB-HealthChecker/2.0""#;

    struct Harness {
        queue: Arc<IngestionQueue>,
        store: MemoryObjectStore,
        dispatcher: Dispatcher<MemoryObjectStore>,
    }

    fn harness(threshold: f64) -> Harness {
        let queue = Arc::new(IngestionQueue::new(QueueSettings {
            visibility_timeout: Duration::from_secs(30),
            retention: Duration::from_secs(3600),
            max_receives: 3,
            max_depth: 100,
        }));
        let store = MemoryObjectStore::new();
        let resolver = ResourceTypeMap::from_entries(&[ResourceEntry {
            name: "web-instance".to_owned(),
            kind: FormatKind::Clf,
        }])
        .unwrap();
        let stream = DeliveryStream::new(
            Arc::new(store.clone()),
            DeliverySettings {
                size_threshold: usize::MAX,
                time_threshold: Duration::from_secs(3600),
                retry_max_attempts: 1,
                retry_backoff_base: Duration::from_millis(1),
                retry_backoff_max: Duration::from_millis(1),
                flush_tick: Duration::from_millis(10),
            },
            PartitionTemplate::data("{format_kind}/{yyyy}/{mm}/{dd}").unwrap(),
            PartitionTemplate::error("errors/{error_kind}/{yyyy}/{mm}/{dd}").unwrap(),
        );
        let dispatcher = Dispatcher::new(
            queue.clone(),
            Arc::new(store.clone()),
            Arc::new(resolver),
            Arc::new(ParserRegistry::with_defaults().unwrap()),
            Arc::new(stream),
            DispatcherSettings {
                workers: 1,
                batch_size: 10,
                receive_wait: Duration::from_millis(10),
                failure_threshold: threshold,
                submit_max_records: 400,
                submit_max_bytes: 3 * 1024 * 1024,
            },
        );
        Harness {
            queue,
            store,
            dispatcher,
        }
    }

    fn object(key: &str) -> RawLogObject {
        RawLogObject {
            source_id: RawLogObject::source_from_key(key).to_owned(),
            object_key: key.to_owned(),
            size: 0,
            created_at: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
        }
    }

    async fn receive_one(h: &Harness, key: &str) -> ReceivedMessage {
        h.queue.enqueue(object(key)).await.unwrap();
        h.queue.receive(1).await.remove(0)
    }

    #[test]
    fn threshold_is_strictly_greater() {
        let parsed = ParsedObject {
            records: Vec::new(),
            failed_lines: 1,
            filtered_lines: 0,
        };
        assert!(parsed.exceeds(0.5));
        let half = ParsedObject {
            records: vec![ParsedRecord {
                resource_type: None,
                resource_name: String::new(),
                event_time: Utc::now(),
                fields: Vec::new(),
            }],
            failed_lines: 1,
            filtered_lines: 0,
        };
        assert!(!half.exceeds(0.5));
        assert!(!ParsedObject::default().exceeds(0.0));
    }

    #[test]
    fn decode_detects_gzip() {
        let plain = b"line one\nline two\n";
        assert!(matches!(decode_object(plain).unwrap(), Cow::Borrowed(_)));

        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::fast());
        encoder.write_all(plain).unwrap();
        let compressed = encoder.finish().unwrap();
        assert_eq!(&*decode_object(&compressed).unwrap(), plain);
    }

    #[test]
    fn chunking_respects_both_limits() {
        let record = |n: usize| ParsedRecord {
            resource_type: Some(FormatKind::Alb),
            resource_name: "r".to_owned(),
            event_time: Utc::now(),
            fields: vec![("n".to_owned(), n.to_string())],
        };
        let records: Vec<_> = (0..10).map(record).collect();
        let sizes: Vec<usize> = records.iter().map(ParsedRecord::approx_size).collect();

        let by_count = chunk_records(records.clone(), 4, usize::MAX);
        assert_eq!(by_count.iter().map(Vec::len).collect::<Vec<_>>(), vec![4, 4, 2]);

        let by_bytes = chunk_records(records, 100, sizes[0] * 3);
        assert!(by_bytes.iter().all(|c| c.len() <= 3));
        assert_eq!(by_bytes.iter().map(Vec::len).sum::<usize>(), 10);
    }

    #[test]
    fn parse_lines_counts_filtered_and_failed() {
        let registry = ParserRegistry::with_defaults().unwrap();
        let parser = registry.get(FormatKind::Clf).unwrap();
        let text = format!("{CLF_LINE}\n\n{HEALTH_LINE}\ngarbage\n{CLF_LINE}\r\n");
        let parsed = parse_lines(parser, "web-instance", "k", &text);
        assert_eq!(parsed.records.len(), 2);
        assert_eq!(parsed.filtered_lines, 1);
        assert_eq!(parsed.failed_lines, 1);
        assert_eq!(parsed.records[0].resource_type, Some(FormatKind::Clf));
        assert_eq!(parsed.records[0].resource_name, "web-instance");
    }

    #[tokio::test]
    async fn unmapped_resource_is_routed_without_fetch() {
        let h = harness(0.5);
        h.store.insert("mystery/a.log", CLF_LINE).await;
        let message = receive_one(&h, "mystery/a.log").await;

        let outcome = h.dispatcher.process_message(message).await.unwrap();
        assert_eq!(outcome, ObjectOutcome::FormatUnknown);
        assert_eq!(h.store.get_count(), 0);

        let error_keys: Vec<String> = h
            .store
            .keys()
            .await
            .into_iter()
            .filter(|k| k.starts_with("errors/format-unknown/2024/03/02/"))
            .collect();
        assert_eq!(error_keys.len(), 1);
        assert_eq!(h.queue.stats().await.depth(), 0);
    }

    #[tokio::test]
    async fn mapped_object_is_parsed_and_acked() {
        let h = harness(0.5);
        let body = format!("{CLF_LINE}\n{HEALTH_LINE}\n{CLF_LINE}\n");
        h.store.insert("web-instance/access.log", body).await;
        let message = receive_one(&h, "web-instance/access.log").await;

        let outcome = h.dispatcher.process_message(message).await.unwrap();
        let ObjectOutcome::Delivered(report) = outcome else {
            panic!("expected delivered outcome, got {outcome:?}");
        };
        assert_eq!(report.format, FormatKind::Clf);
        assert_eq!(report.records, 2);
        assert_eq!(report.filtered_lines, 1);
        assert_eq!(h.dispatcher.stats().records(), 2);
        assert_eq!(h.queue.stats().await.depth(), 0);
        assert_eq!(h.dispatcher.stream.flush_all().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failing_object_is_left_unacked() {
        let h = harness(0.5);
        h.store
            .insert("web-instance/bad.log", format!("junk\njunk\n{CLF_LINE}\n"))
            .await;
        let message = receive_one(&h, "web-instance/bad.log").await;

        let err = h.dispatcher.process_message(message).await.unwrap_err();
        assert!(matches!(
            err,
            RelayPipelineError::ObjectParseFailure { failed: 2, total: 3, .. }
        ));
        let stats = h.queue.stats().await;
        assert_eq!(stats.in_flight, 1);
        assert_eq!(h.dispatcher.stats().objects_failed(), 1);
    }

    #[tokio::test]
    async fn health_check_only_object_is_acked_empty() {
        let h = harness(0.5);
        h.store.insert("web-instance/hc.log", HEALTH_LINE).await;
        let message = receive_one(&h, "web-instance/hc.log").await;

        let outcome = h.dispatcher.process_message(message).await.unwrap();
        assert!(matches!(outcome, ObjectOutcome::Empty(r) if r.filtered_lines == 1));
        assert_eq!(h.queue.stats().await.depth(), 0);
    }

    #[tokio::test]
    async fn missing_object_fails_the_message() {
        let h = harness(0.5);
        let message = receive_one(&h, "web-instance/gone.log").await;
        let err = h.dispatcher.process_message(message).await.unwrap_err();
        assert!(matches!(err, RelayPipelineError::Storage(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn workers_drain_queue_and_stop_on_cancel() {
        let h = harness(0.5);
        for i in 0..5 {
            let key = format!("web-instance/{i}.log");
            h.store.insert(key.clone(), CLF_LINE).await;
            h.queue.enqueue(object(&key)).await.unwrap();
        }
        let dispatcher = Arc::new(h.dispatcher);
        let cancel = CancellationToken::new();
        let workers = dispatcher.spawn_workers(&cancel);

        while dispatcher.stats().objects_acked() < 5 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        cancel.cancel();
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(h.queue.stats().await.depth(), 0);
        assert_eq!(dispatcher.stats().records(), 5);
    }
}
