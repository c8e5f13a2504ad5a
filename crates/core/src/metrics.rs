//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `logrelay_`
//! - 컴포넌트: `queue_`, `notifier_`, `dispatcher_`, `delivery_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(logrelay_core::metrics::DISPATCHER_RECORDS_TOTAL).increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 로그 형식 레이블 키 (alb, nlb, clf, cf, unknown)
pub const LABEL_FORMAT: &str = "format";

/// 에러 파티션 종류 레이블 키 (format-unknown, delivery-failed)
pub const LABEL_ERROR_KIND: &str = "error_kind";

/// 결과 레이블 키 (success, failure)
pub const LABEL_RESULT: &str = "result";

/// 플러시 트리거 레이블 키 (size, age, shutdown)
pub const LABEL_TRIGGER: &str = "trigger";

// ─── Queue 메트릭 ──────────────────────────────────────────────────

/// Queue: enqueue된 메시지 수 (counter)
pub const QUEUE_ENQUEUED_TOTAL: &str = "logrelay_queue_enqueued_total";

/// Queue: ack된 메시지 수 (counter)
pub const QUEUE_ACKED_TOTAL: &str = "logrelay_queue_acked_total";

/// Queue: 재전달된 메시지 수 (counter)
pub const QUEUE_REDELIVERED_TOTAL: &str = "logrelay_queue_redelivered_total";

/// Queue: 데드레터로 이동한 메시지 수 (counter)
pub const QUEUE_DEAD_LETTERED_TOTAL: &str = "logrelay_queue_dead_lettered_total";

/// Queue: 보존 기간 초과로 삭제된 메시지 수 (counter)
pub const QUEUE_PURGED_TOTAL: &str = "logrelay_queue_purged_total";

/// Queue: 대기 + 처리 중 메시지 수 (gauge)
pub const QUEUE_DEPTH: &str = "logrelay_queue_depth";

/// Queue: 데드레터 깊이 (gauge)
pub const QUEUE_DEAD_LETTER_DEPTH: &str = "logrelay_queue_dead_letter_depth";

// ─── Notifier 메트릭 ───────────────────────────────────────────────

/// Notifier: 수신한 생성 이벤트 수 (counter)
pub const NOTIFIER_EVENTS_TOTAL: &str = "logrelay_notifier_events_total";

/// Notifier: 잘못된 형식으로 버려진 이벤트 수 (counter)
pub const NOTIFIER_MALFORMED_TOTAL: &str = "logrelay_notifier_malformed_total";

/// Notifier: 재시도 소진으로 버려진 이벤트 수 (counter)
pub const NOTIFIER_DROPPED_TOTAL: &str = "logrelay_notifier_dropped_total";

// ─── Dispatcher 메트릭 ─────────────────────────────────────────────

/// Dispatcher: 처리 완료된 오브젝트 수 (counter, label: result)
pub const DISPATCHER_OBJECTS_TOTAL: &str = "logrelay_dispatcher_objects_total";

/// Dispatcher: 생성된 레코드 수 (counter, label: format)
pub const DISPATCHER_RECORDS_TOTAL: &str = "logrelay_dispatcher_records_total";

/// Dispatcher: 라인 파싱 에러 수 (counter, label: format)
pub const DISPATCHER_PARSE_ERRORS_TOTAL: &str = "logrelay_dispatcher_parse_errors_total";

/// Dispatcher: 필터링된 라인 수 (counter, label: format)
pub const DISPATCHER_LINES_FILTERED_TOTAL: &str = "logrelay_dispatcher_lines_filtered_total";

/// Dispatcher: 맵에 없는 리소스의 오브젝트 수 (counter)
pub const DISPATCHER_FORMAT_UNKNOWN_TOTAL: &str = "logrelay_dispatcher_format_unknown_total";

/// Dispatcher: 오브젝트 하나의 처리 시간 (histogram, 초)
pub const DISPATCHER_OBJECT_DURATION_SECONDS: &str =
    "logrelay_dispatcher_object_duration_seconds";

// ─── Delivery 메트릭 ───────────────────────────────────────────────

/// Delivery: 싱크에 기록된 배치 수 (counter, label: format, trigger)
pub const DELIVERY_BATCHES_FLUSHED_TOTAL: &str = "logrelay_delivery_batches_flushed_total";

/// Delivery: 싱크에 기록된 레코드 수 (counter)
pub const DELIVERY_RECORDS_FLUSHED_TOTAL: &str = "logrelay_delivery_records_flushed_total";

/// Delivery: 싱크 쓰기 재시도 수 (counter)
pub const DELIVERY_RETRIES_TOTAL: &str = "logrelay_delivery_retries_total";

/// Delivery: 에러 파티션에 기록된 엔트리 수 (counter, label: error_kind)
pub const DELIVERY_ERROR_ENTRIES_TOTAL: &str = "logrelay_delivery_error_entries_total";

/// Delivery: 열려 있는 파티션 버퍼 수 (gauge)
pub const DELIVERY_OPEN_BATCHES: &str = "logrelay_delivery_open_batches";

/// Delivery: 플러시 소요 시간 (histogram, 초)
pub const DELIVERY_FLUSH_DURATION_SECONDS: &str = "logrelay_delivery_flush_duration_seconds";

// ─── Daemon 메트릭 ──────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "logrelay_daemon_uptime_seconds";

/// Daemon: 빌드 정보 (gauge, 항상 1, label: version)
pub const DAEMON_BUILD_INFO: &str = "logrelay_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 오브젝트 처리 / 플러시 시간 히스토그램 버킷 (초)
///
/// 1ms ~ 60s 범위 (오브젝트 다운로드와 싱크 쓰기 포함)
pub const DURATION_BUCKETS: [f64; 10] = [0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 60.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Queue
    describe_counter!(QUEUE_ENQUEUED_TOTAL, "Total number of messages enqueued");
    describe_counter!(QUEUE_ACKED_TOTAL, "Total number of messages acknowledged");
    describe_counter!(
        QUEUE_REDELIVERED_TOTAL,
        "Total number of messages made visible again after a visibility timeout"
    );
    describe_counter!(
        QUEUE_DEAD_LETTERED_TOTAL,
        "Total number of messages moved to the dead-letter list"
    );
    describe_counter!(
        QUEUE_PURGED_TOTAL,
        "Total number of messages purged after the retention period"
    );
    describe_gauge!(QUEUE_DEPTH, "Messages currently pending or in flight");
    describe_gauge!(QUEUE_DEAD_LETTER_DEPTH, "Messages currently dead-lettered");

    // Notifier
    describe_counter!(NOTIFIER_EVENTS_TOTAL, "Total number of creation events received");
    describe_counter!(
        NOTIFIER_MALFORMED_TOTAL,
        "Total number of malformed creation events dropped"
    );
    describe_counter!(
        NOTIFIER_DROPPED_TOTAL,
        "Total number of creation events dropped after enqueue retries ran out"
    );

    // Dispatcher
    describe_counter!(DISPATCHER_OBJECTS_TOTAL, "Total number of objects processed");
    describe_counter!(DISPATCHER_RECORDS_TOTAL, "Total number of records emitted");
    describe_counter!(
        DISPATCHER_PARSE_ERRORS_TOTAL,
        "Total number of lines that failed to parse"
    );
    describe_counter!(
        DISPATCHER_LINES_FILTERED_TOTAL,
        "Total number of header or health-check lines filtered out"
    );
    describe_counter!(
        DISPATCHER_FORMAT_UNKNOWN_TOTAL,
        "Total number of objects from resources missing in the resource map"
    );
    describe_histogram!(
        DISPATCHER_OBJECT_DURATION_SECONDS,
        "Time to fetch, parse and submit a single object in seconds"
    );

    // Delivery
    describe_counter!(
        DELIVERY_BATCHES_FLUSHED_TOTAL,
        "Total number of batches written to the sink"
    );
    describe_counter!(
        DELIVERY_RECORDS_FLUSHED_TOTAL,
        "Total number of records written to the sink"
    );
    describe_counter!(DELIVERY_RETRIES_TOTAL, "Total number of sink write retries");
    describe_counter!(
        DELIVERY_ERROR_ENTRIES_TOTAL,
        "Total number of entries written to the error partition"
    );
    describe_gauge!(DELIVERY_OPEN_BATCHES, "Number of partition buffers currently open");
    describe_histogram!(
        DELIVERY_FLUSH_DURATION_SECONDS,
        "Time to encode and write a single batch in seconds"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "logrelay daemon uptime in seconds");
    describe_gauge!(DAEMON_BUILD_INFO, "Build information (always 1, with version label)");
}
