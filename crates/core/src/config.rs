//! 설정 관리 — logrelay.toml 파싱 및 런타임 설정
//!
//! [`RelayConfig`]는 모든 컴포넌트의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`LOGRELAY_QUEUE_MAX_RECEIVES=5` 형식)
//! 3. 설정 파일 (`logrelay.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! 리소스 맵은 `LOGRELAY_RESOURCE_MAP` 환경변수(JSON 오브젝트)로 통째로
//! 교체할 수 있습니다.
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), logrelay_core::error::RelayError> {
//! use logrelay_core::config::RelayConfig;
//!
//! let config = RelayConfig::load("logrelay.toml").await?;
//!
//! let config = RelayConfig::parse("[dispatcher]\nworkers = 4")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RelayError};
use crate::types::FormatKind;

/// 리소스 맵 오버라이드 환경변수
pub const RESOURCE_MAP_ENV: &str = "LOGRELAY_RESOURCE_MAP";

/// 파티션 템플릿 필수 플레이스홀더
pub const PATH_PLACEHOLDERS: [&str; 3] = ["{yyyy}", "{mm}", "{dd}"];

/// logrelay 통합 설정
///
/// `logrelay.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 인제스천 큐 설정
    #[serde(default)]
    pub queue: QueueConfig,
    /// 포맷 디스패처 설정
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// 딜리버리 스트림 설정
    #[serde(default)]
    pub delivery: DeliveryConfig,
    /// 랜딩/싱크 스토리지 설정
    #[serde(default)]
    pub storage: StorageConfig,
    /// 리소스 이름 → 형식 매핑
    #[serde(default)]
    pub resources: Vec<ResourceEntry>,
    /// 배포 토폴로지 (정보 제공용)
    #[serde(default)]
    pub topology: TopologyConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl RelayConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RelayError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RelayError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RelayError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RelayError> {
        toml::from_str(toml_str).map_err(|e| {
            RelayError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `LOGRELAY_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "LOGRELAY_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "LOGRELAY_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "LOGRELAY_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "LOGRELAY_GENERAL_PID_FILE");

        // Queue
        override_u64(
            &mut self.queue.visibility_timeout_secs,
            "LOGRELAY_QUEUE_VISIBILITY_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.queue.retention_secs,
            "LOGRELAY_QUEUE_RETENTION_SECS",
        );
        override_u32(
            &mut self.queue.max_receives,
            "LOGRELAY_QUEUE_MAX_RECEIVES",
        );
        override_usize(&mut self.queue.max_depth, "LOGRELAY_QUEUE_MAX_DEPTH");
        override_u64(
            &mut self.queue.receive_wait_ms,
            "LOGRELAY_QUEUE_RECEIVE_WAIT_MS",
        );

        // Dispatcher
        override_usize(&mut self.dispatcher.workers, "LOGRELAY_DISPATCHER_WORKERS");
        override_usize(
            &mut self.dispatcher.batch_size,
            "LOGRELAY_DISPATCHER_BATCH_SIZE",
        );
        override_f64(
            &mut self.dispatcher.failure_threshold,
            "LOGRELAY_DISPATCHER_FAILURE_THRESHOLD",
        );

        // Delivery
        override_usize(
            &mut self.delivery.size_threshold_bytes,
            "LOGRELAY_DELIVERY_SIZE_THRESHOLD_BYTES",
        );
        override_u64(
            &mut self.delivery.time_threshold_secs,
            "LOGRELAY_DELIVERY_TIME_THRESHOLD_SECS",
        );
        override_u32(
            &mut self.delivery.retry_max_attempts,
            "LOGRELAY_DELIVERY_RETRY_MAX_ATTEMPTS",
        );
        override_string(
            &mut self.delivery.path_template,
            "LOGRELAY_DELIVERY_PATH_TEMPLATE",
        );

        // Storage
        override_string(&mut self.storage.landing_dir, "LOGRELAY_STORAGE_LANDING_DIR");
        override_string(&mut self.storage.sink_dir, "LOGRELAY_STORAGE_SINK_DIR");
        override_u64(
            &mut self.storage.watch_interval_ms,
            "LOGRELAY_STORAGE_WATCH_INTERVAL_MS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "LOGRELAY_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "LOGRELAY_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "LOGRELAY_METRICS_PORT");

        // Resources
        override_resource_map(&mut self.resources, RESOURCE_MAP_ENV);
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RelayError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.queue.validate()?;
        self.dispatcher.validate()?;
        self.delivery.validate()?;
        self.metrics.validate()?;

        let mut seen = HashSet::new();
        for entry in &self.resources {
            if entry.name.trim().is_empty() {
                return Err(invalid("resources.name", "must not be empty"));
            }
            if !seen.insert(entry.name.as_str()) {
                return Err(invalid(
                    "resources.name",
                    format!("duplicate resource '{}'", entry.name),
                ));
            }
        }

        let worst_case_ms = self.delivery.worst_case_retry_ms();
        if self.queue.visibility_timeout_secs.saturating_mul(1000) <= worst_case_ms {
            warn!(
                visibility_timeout_secs = self.queue.visibility_timeout_secs,
                worst_case_retry_ms = worst_case_ms,
                "visibility timeout is shorter than the worst-case sink retry time; duplicate processing is likely"
            );
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리 (큐 스냅샷 저장 위치)
    pub data_dir: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/logrelay".to_owned(),
            pid_file: "/var/run/logrelay.pid".to_owned(),
        }
    }
}

/// 인제스천 큐 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// 수신 후 메시지가 숨겨지는 시간 (초)
    pub visibility_timeout_secs: u64,
    /// 메시지 보존 기간 (초)
    pub retention_secs: u64,
    /// 데드레터로 이동하기 전 최대 수신 횟수
    pub max_receives: u32,
    /// 큐 최대 깊이
    pub max_depth: usize,
    /// 빈 큐에서 수신 대기 시간 (밀리초)
    pub receive_wait_ms: u64,
    /// 노티파이어 enqueue 최대 시도 횟수
    pub enqueue_max_attempts: u32,
    /// 노티파이어 enqueue 재시도 기본 백오프 (밀리초)
    pub enqueue_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: 300,
            retention_secs: 7 * 24 * 60 * 60,
            max_receives: 3,
            max_depth: 100_000,
            receive_wait_ms: 10_000,
            enqueue_max_attempts: 5,
            enqueue_backoff_ms: 50,
        }
    }
}

impl QueueConfig {
    fn validate(&self) -> Result<(), RelayError> {
        if self.visibility_timeout_secs == 0 {
            return Err(invalid("queue.visibility_timeout_secs", "must be greater than 0"));
        }
        if self.retention_secs < self.visibility_timeout_secs {
            return Err(invalid(
                "queue.retention_secs",
                "must not be shorter than visibility_timeout_secs",
            ));
        }
        if self.max_receives == 0 {
            return Err(invalid("queue.max_receives", "must be greater than 0"));
        }
        if self.max_depth == 0 {
            return Err(invalid("queue.max_depth", "must be greater than 0"));
        }
        if self.enqueue_max_attempts == 0 {
            return Err(invalid("queue.enqueue_max_attempts", "must be greater than 0"));
        }
        Ok(())
    }
}

/// 포맷 디스패처 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 워커 수 (W)
    pub workers: usize,
    /// 워커당 한 번에 수신하는 메시지 수 (B)
    pub batch_size: usize,
    /// 오브젝트 실패 판정 라인 실패 비율 (초과 시 실패)
    pub failure_threshold: f64,
    /// 스트림 제출 청크당 최대 레코드 수
    pub submit_max_records: usize,
    /// 스트림 제출 청크당 최대 바이트 수
    pub submit_max_bytes: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            batch_size: 10,
            failure_threshold: 0.5,
            submit_max_records: 400,
            submit_max_bytes: 3 * 1024 * 1024,
        }
    }
}

impl DispatcherConfig {
    fn validate(&self) -> Result<(), RelayError> {
        if self.workers == 0 || self.workers > 256 {
            return Err(invalid("dispatcher.workers", "must be between 1 and 256"));
        }
        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(invalid("dispatcher.batch_size", "must be between 1 and 1000"));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(invalid(
                "dispatcher.failure_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.submit_max_records == 0 {
            return Err(invalid("dispatcher.submit_max_records", "must be greater than 0"));
        }
        if self.submit_max_bytes == 0 {
            return Err(invalid("dispatcher.submit_max_bytes", "must be greater than 0"));
        }
        Ok(())
    }
}

/// 딜리버리 스트림 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// 크기 기반 플러시 임계값 (바이트)
    pub size_threshold_bytes: usize,
    /// 시간 기반 플러시 임계값 (초)
    pub time_threshold_secs: u64,
    /// 싱크 쓰기 최대 시도 횟수
    pub retry_max_attempts: u32,
    /// 재시도 기본 백오프 (밀리초, 시도마다 2배)
    pub retry_backoff_base_ms: u64,
    /// 재시도 백오프 상한 (밀리초)
    pub retry_backoff_max_ms: u64,
    /// 정상 배치 경로 템플릿 (`{batch_id}.gz`가 뒤에 붙음)
    pub path_template: String,
    /// 에러 배치 경로 템플릿
    pub error_path_template: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            size_threshold_bytes: 128 * 1024 * 1024,
            time_threshold_secs: 300,
            retry_max_attempts: 3,
            retry_backoff_base_ms: 200,
            retry_backoff_max_ms: 10_000,
            path_template: "{format_kind}/{yyyy}/{mm}/{dd}".to_owned(),
            error_path_template: "errors/{error_kind}/{yyyy}/{mm}/{dd}".to_owned(),
        }
    }
}

impl DeliveryConfig {
    /// 싱크 쓰기 한 번이 재시도를 모두 소진하는 데 걸리는 최악의 시간 (밀리초)
    pub fn worst_case_retry_ms(&self) -> u64 {
        let mut backoff = self.retry_backoff_base_ms;
        let mut total = 0u64;
        for _ in 1..self.retry_max_attempts {
            total = total.saturating_add(backoff.min(self.retry_backoff_max_ms));
            backoff = backoff.saturating_mul(2);
        }
        total
    }

    fn validate(&self) -> Result<(), RelayError> {
        if self.size_threshold_bytes == 0 {
            return Err(invalid("delivery.size_threshold_bytes", "must be greater than 0"));
        }
        if self.time_threshold_secs == 0 {
            return Err(invalid("delivery.time_threshold_secs", "must be greater than 0"));
        }
        if self.retry_max_attempts == 0 {
            return Err(invalid("delivery.retry_max_attempts", "must be greater than 0"));
        }
        if !self.path_template.contains("{format_kind}") {
            return Err(invalid(
                "delivery.path_template",
                "must contain {format_kind}",
            ));
        }
        if !self.error_path_template.contains("{error_kind}") {
            return Err(invalid(
                "delivery.error_path_template",
                "must contain {error_kind}",
            ));
        }
        for placeholder in PATH_PLACEHOLDERS {
            if !self.path_template.contains(placeholder) {
                return Err(invalid(
                    "delivery.path_template",
                    format!("must contain {placeholder}"),
                ));
            }
            if !self.error_path_template.contains(placeholder) {
                return Err(invalid(
                    "delivery.error_path_template",
                    format!("must contain {placeholder}"),
                ));
            }
        }
        Ok(())
    }
}

/// 스토리지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// 랜딩 스토어 루트 디렉토리
    pub landing_dir: String,
    /// 싱크 루트 디렉토리
    pub sink_dir: String,
    /// 랜딩 워처 폴링 간격 (밀리초)
    pub watch_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            landing_dir: "/var/lib/logrelay/landing".to_owned(),
            sink_dir: "/var/lib/logrelay/sink".to_owned(),
            watch_interval_ms: 1000,
        }
    }
}

/// 리소스 이름과 형식의 쌍
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// 리소스 이름 (오브젝트 키의 첫 세그먼트)
    pub name: String,
    /// 로그 형식
    pub kind: FormatKind,
}

/// 배포 토폴로지
///
/// 네트워크, 인증서, DNS 같은 정적 구성은 런타임 동작이 없으므로
/// 시작 시 로그로만 남깁니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// 배포 환경 이름
    pub environment: String,
    /// 리전
    pub region: String,
    /// 공개 도메인
    pub domain: String,
    /// 외부 엔드포인트 목록
    pub endpoints: Vec<String>,
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인딩 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

impl MetricsConfig {
    fn validate(&self) -> Result<(), RelayError> {
        if self.enabled && self.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0"));
        }
        if !self.endpoint.starts_with('/') {
            return Err(invalid("metrics.endpoint", "must start with '/'"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> RelayError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str, type_name: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.trim().parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = type_name,
                "failed to parse env var, ignoring"
            ),
        }
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key, "bool");
}

fn override_usize(target: &mut usize, env_key: &str) {
    override_parsed(target, env_key, "usize");
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key, "u16");
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key, "u32");
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key, "u64");
}

fn override_f64(target: &mut f64, env_key: &str) {
    override_parsed(target, env_key, "f64");
}

/// `{"name": "kind", ...}` 형식의 JSON으로 리소스 맵을 교체합니다.
///
/// 잘못된 JSON이나 알 수 없는 형식이 하나라도 있으면 전체를 무시합니다.
fn override_resource_map(target: &mut Vec<ResourceEntry>, env_key: &str) {
    let Ok(val) = std::env::var(env_key) else {
        return;
    };
    let parsed: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&val) {
        Ok(map) => map,
        Err(e) => {
            warn!(env_key, error = %e, "resource map env var is not a JSON object, ignoring");
            return;
        }
    };

    let mut entries = Vec::with_capacity(parsed.len());
    for (name, kind) in parsed {
        let kind = match kind.as_str().map(str::parse::<FormatKind>) {
            Some(Ok(kind)) => kind,
            _ => {
                warn!(env_key, resource = %name, "invalid format kind in resource map env var, ignoring");
                return;
            }
        };
        entries.push(ResourceEntry { name, kind });
    }
    *target = entries;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn default_config_has_sane_values() {
        let config = RelayConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.queue.visibility_timeout_secs, 300);
        assert_eq!(config.queue.retention_secs, 604_800);
        assert_eq!(config.dispatcher.workers, 2);
        assert_eq!(config.dispatcher.batch_size, 10);
        assert_eq!(config.delivery.size_threshold_bytes, 128 * 1024 * 1024);
        assert!(config.resources.is_empty());
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        RelayConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_empty_toml_uses_defaults() {
        let config = RelayConfig::parse("").unwrap();
        assert_eq!(config.dispatcher.failure_threshold, 0.5);
        assert_eq!(config.delivery.path_template, "{format_kind}/{yyyy}/{mm}/{dd}");
    }

    #[test]
    fn from_str_full_toml() {
        let toml = r#"
[general]
log_level = "debug"
log_format = "pretty"
data_dir = "/opt/logrelay"

[queue]
visibility_timeout_secs = 120
max_receives = 5

[dispatcher]
workers = 4
batch_size = 20
failure_threshold = 0.25

[delivery]
size_threshold_bytes = 1048576
time_threshold_secs = 60

[storage]
landing_dir = "/data/landing"
sink_dir = "/data/sink"

[[resources]]
name = "web-alb"
kind = "alb"

[[resources]]
name = "web-cdn"
kind = "cf"

[topology]
environment = "prod"
endpoints = ["https://example.com"]
"#;
        let config = RelayConfig::parse(toml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.general.log_format, "pretty");
        assert_eq!(config.queue.max_receives, 5);
        // 명시하지 않은 필드는 기본값 유지
        assert_eq!(config.queue.max_depth, 100_000);
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.resources.len(), 2);
        assert_eq!(config.resources[1].kind, FormatKind::Cf);
        assert_eq!(config.topology.environment, "prod");
    }

    #[test]
    fn from_str_unknown_kind_is_parse_error() {
        let toml = "[[resources]]\nname = \"x\"\nkind = \"s3\"\n";
        let err = RelayConfig::parse(toml).unwrap_err();
        assert!(matches!(err, RelayError::Config(ConfigError::ParseFailed { .. })));
    }

    #[test]
    fn validate_rejects_duplicate_resources() {
        let mut config = RelayConfig::default();
        config.resources = vec![
            ResourceEntry {
                name: "a".to_owned(),
                kind: FormatKind::Alb,
            },
            ResourceEntry {
                name: "a".to_owned(),
                kind: FormatKind::Nlb,
            },
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate resource"));
    }

    #[test]
    fn validate_rejects_out_of_range_threshold() {
        let mut config = RelayConfig::default();
        config.dispatcher.failure_threshold = 1.5;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn validate_rejects_template_without_date() {
        let mut config = RelayConfig::default();
        config.delivery.path_template = "{format_kind}/{yyyy}".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("{mm}"));
    }

    #[test]
    fn validate_rejects_zero_max_receives() {
        let mut config = RelayConfig::default();
        config.queue.max_receives = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn worst_case_retry_is_capped() {
        let delivery = DeliveryConfig {
            retry_max_attempts: 4,
            retry_backoff_base_ms: 100,
            retry_backoff_max_ms: 250,
            ..Default::default()
        };
        // 100 + 200 + 250(cap)
        assert_eq!(delivery.worst_case_retry_ms(), 550);
    }

    #[test]
    #[serial]
    fn env_override_queue_fields() {
        let mut config = RelayConfig::default();
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var("LOGRELAY_QUEUE_MAX_RECEIVES", "7") };
        unsafe { std::env::set_var("LOGRELAY_DISPATCHER_WORKERS", "not-a-number") };
        config.apply_env_overrides();
        assert_eq!(config.queue.max_receives, 7);
        assert_eq!(config.dispatcher.workers, 2);
        unsafe { std::env::remove_var("LOGRELAY_QUEUE_MAX_RECEIVES") };
        unsafe { std::env::remove_var("LOGRELAY_DISPATCHER_WORKERS") };
    }

    #[test]
    #[serial]
    fn env_override_resource_map() {
        let mut config = RelayConfig::default();
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var(RESOURCE_MAP_ENV, r#"{"web-alb":"alb","tcp-nlb":"NLB"}"#) };
        config.apply_env_overrides();
        unsafe { std::env::remove_var(RESOURCE_MAP_ENV) };

        assert_eq!(config.resources.len(), 2);
        let nlb = config.resources.iter().find(|e| e.name == "tcp-nlb").unwrap();
        assert_eq!(nlb.kind, FormatKind::Nlb);
    }

    #[test]
    #[serial]
    fn env_override_resource_map_invalid_kind_keeps_original() {
        let mut config = RelayConfig::default();
        config.resources.push(ResourceEntry {
            name: "keep".to_owned(),
            kind: FormatKind::Clf,
        });
        // SAFETY: serial 테스트에서만 환경변수를 조작합니다.
        unsafe { std::env::set_var(RESOURCE_MAP_ENV, r#"{"a":"alb","b":"s3"}"#) };
        config.apply_env_overrides();
        unsafe { std::env::remove_var(RESOURCE_MAP_ENV) };

        assert_eq!(config.resources.len(), 1);
        assert_eq!(config.resources[0].name, "keep");
    }

    #[test]
    fn config_serialize_roundtrip() {
        let mut config = RelayConfig::default();
        config.resources.push(ResourceEntry {
            name: "web-cdn".to_owned(),
            kind: FormatKind::Cf,
        });
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = RelayConfig::parse(&toml_str).unwrap();
        assert_eq!(parsed.resources, config.resources);
        assert_eq!(parsed.queue.max_receives, config.queue.max_receives);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = RelayConfig::from_file("/nonexistent/path/logrelay.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RelayError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
