//! 파이프라인 설정
//!
//! [`PipelineConfig`]는 core의 [`RelayConfig`](logrelay_core::config::RelayConfig)에서
//! 파생되며, 초 단위 설정을 [`Duration`]으로 바꿔 런타임에서 바로 쓸 수 있게 합니다.
//!
//! # 사용 예시
//! ```ignore
//! use logrelay_core::config::RelayConfig;
//! use logrelay_pipeline::config::PipelineConfig;
//!
//! let core_config = RelayConfig::default();
//! let config = PipelineConfig::from_core(&core_config);
//! ```

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use logrelay_core::config::{PATH_PLACEHOLDERS, RelayConfig, ResourceEntry};

use crate::error::RelayPipelineError;

/// 파이프라인 런타임 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    // --- 큐 ---
    /// 수신 후 메시지가 숨겨지는 시간
    pub visibility_timeout: Duration,
    /// 메시지 보존 기간
    pub retention: Duration,
    /// 데드레터로 이동하기 전 최대 수신 횟수
    pub max_receives: u32,
    /// 큐 최대 깊이
    pub max_depth: usize,
    /// 빈 큐에서 수신 대기 시간
    pub receive_wait: Duration,
    /// 노티파이어 enqueue 최대 시도 횟수
    pub enqueue_max_attempts: u32,
    /// 노티파이어 enqueue 기본 백오프
    pub enqueue_backoff: Duration,

    // --- 디스패처 ---
    /// 워커 수 (W)
    pub workers: usize,
    /// 워커당 수신 메시지 수 (B)
    pub batch_size: usize,
    /// 실패 라인 비율 임계값 (초과 시 오브젝트 실패)
    pub failure_threshold: f64,
    /// 제출 청크당 최대 레코드 수
    pub submit_max_records: usize,
    /// 제출 청크당 최대 바이트 수
    pub submit_max_bytes: usize,

    // --- 딜리버리 ---
    /// 크기 기반 플러시 임계값 (바이트)
    pub size_threshold_bytes: usize,
    /// 시간 기반 플러시 임계값
    pub time_threshold: Duration,
    /// 싱크 쓰기 최대 시도 횟수
    pub retry_max_attempts: u32,
    /// 재시도 기본 백오프
    pub retry_backoff_base: Duration,
    /// 재시도 백오프 상한
    pub retry_backoff_max: Duration,
    /// 정상 배치 경로 템플릿
    pub path_template: String,
    /// 에러 배치 경로 템플릿
    pub error_path_template: String,

    // --- 스토리지 ---
    /// 랜딩 스토어 루트
    pub landing_dir: PathBuf,
    /// 싱크 루트
    pub sink_dir: PathBuf,
    /// 랜딩 워처 폴링 간격
    pub watch_interval: Duration,
    /// 큐 스냅샷 파일 (없으면 영속화하지 않음)
    pub snapshot_path: Option<PathBuf>,

    // --- 리소스 맵 ---
    /// 리소스 이름 → 형식
    pub resources: Vec<ResourceEntry>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_core(&RelayConfig::default())
    }
}

/// 큐 스냅샷 파일 이름
pub const SNAPSHOT_FILE: &str = "queue-snapshot.json";

impl PipelineConfig {
    /// core 설정에서 파이프라인 설정을 생성합니다.
    ///
    /// 스냅샷은 `general.data_dir` 아래에 저장됩니다.
    pub fn from_core(core: &RelayConfig) -> Self {
        Self {
            visibility_timeout: Duration::from_secs(core.queue.visibility_timeout_secs),
            retention: Duration::from_secs(core.queue.retention_secs),
            max_receives: core.queue.max_receives,
            max_depth: core.queue.max_depth,
            receive_wait: Duration::from_millis(core.queue.receive_wait_ms),
            enqueue_max_attempts: core.queue.enqueue_max_attempts,
            enqueue_backoff: Duration::from_millis(core.queue.enqueue_backoff_ms),
            workers: core.dispatcher.workers,
            batch_size: core.dispatcher.batch_size,
            failure_threshold: core.dispatcher.failure_threshold,
            submit_max_records: core.dispatcher.submit_max_records,
            submit_max_bytes: core.dispatcher.submit_max_bytes,
            size_threshold_bytes: core.delivery.size_threshold_bytes,
            time_threshold: Duration::from_secs(core.delivery.time_threshold_secs),
            retry_max_attempts: core.delivery.retry_max_attempts,
            retry_backoff_base: Duration::from_millis(core.delivery.retry_backoff_base_ms),
            retry_backoff_max: Duration::from_millis(core.delivery.retry_backoff_max_ms),
            path_template: core.delivery.path_template.clone(),
            error_path_template: core.delivery.error_path_template.clone(),
            landing_dir: PathBuf::from(&core.storage.landing_dir),
            sink_dir: PathBuf::from(&core.storage.sink_dir),
            watch_interval: Duration::from_millis(core.storage.watch_interval_ms),
            snapshot_path: Some(Path::new(&core.general.data_dir).join(SNAPSHOT_FILE)),
            resources: core.resources.clone(),
        }
    }

    /// 백그라운드 플러셔의 틱 간격: `time_threshold / 4`, 10ms~1s로 제한
    pub fn flush_tick(&self) -> Duration {
        (self.time_threshold / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
    }

    /// 스토리지 디렉토리가 안전한지 검증합니다 (path traversal 방지).
    fn validate_dir(field: &str, path: &Path) -> Result<(), RelayPipelineError> {
        if path.as_os_str().is_empty() {
            return Err(config_err(field, "must not be empty"));
        }
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(config_err(
                field,
                format!("'{}' contains path traversal pattern '..'", path.display()),
            ));
        }
        Ok(())
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RelayPipelineError> {
        const MAX_WORKERS: usize = 256;
        const MAX_BATCH_SIZE: usize = 1000;

        if self.visibility_timeout.is_zero() {
            return Err(config_err("visibility_timeout", "must be greater than 0"));
        }
        if self.max_receives == 0 {
            return Err(config_err("max_receives", "must be greater than 0"));
        }
        if self.max_depth == 0 {
            return Err(config_err("max_depth", "must be greater than 0"));
        }
        if self.enqueue_max_attempts == 0 {
            return Err(config_err("enqueue_max_attempts", "must be greater than 0"));
        }
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(config_err("workers", format!("must be 1-{MAX_WORKERS}")));
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(config_err("batch_size", format!("must be 1-{MAX_BATCH_SIZE}")));
        }
        if !(0.0..=1.0).contains(&self.failure_threshold) {
            return Err(config_err("failure_threshold", "must be between 0.0 and 1.0"));
        }
        if self.submit_max_records == 0 || self.submit_max_bytes == 0 {
            return Err(config_err("submit_max_records", "chunk limits must be greater than 0"));
        }
        if self.size_threshold_bytes == 0 {
            return Err(config_err("size_threshold_bytes", "must be greater than 0"));
        }
        if self.time_threshold.is_zero() {
            return Err(config_err("time_threshold", "must be greater than 0"));
        }
        if self.retry_max_attempts == 0 {
            return Err(config_err("retry_max_attempts", "must be greater than 0"));
        }
        if !self.path_template.contains("{format_kind}") {
            return Err(config_err("path_template", "must contain {format_kind}"));
        }
        if !self.error_path_template.contains("{error_kind}") {
            return Err(config_err("error_path_template", "must contain {error_kind}"));
        }
        for placeholder in PATH_PLACEHOLDERS {
            if !self.path_template.contains(placeholder) {
                return Err(config_err("path_template", format!("must contain {placeholder}")));
            }
            if !self.error_path_template.contains(placeholder) {
                return Err(config_err(
                    "error_path_template",
                    format!("must contain {placeholder}"),
                ));
            }
        }

        Self::validate_dir("landing_dir", &self.landing_dir)?;
        Self::validate_dir("sink_dir", &self.sink_dir)?;

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> RelayPipelineError {
    RelayPipelineError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 파이프라인 설정 빌더
///
/// 테스트와 임베딩 용도로 밀리초 단위 설정을 지정할 수 있습니다.
#[derive(Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 가시성 타임아웃을 설정합니다.
    pub fn visibility_timeout(mut self, timeout: Duration) -> Self {
        self.config.visibility_timeout = timeout;
        self
    }

    /// 보존 기간을 설정합니다.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.config.retention = retention;
        self
    }

    /// 최대 수신 횟수를 설정합니다.
    pub fn max_receives(mut self, max: u32) -> Self {
        self.config.max_receives = max;
        self
    }

    /// 큐 최대 깊이를 설정합니다.
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.config.max_depth = depth;
        self
    }

    /// 빈 큐 수신 대기 시간을 설정합니다.
    pub fn receive_wait(mut self, wait: Duration) -> Self {
        self.config.receive_wait = wait;
        self
    }

    /// 워커 수를 설정합니다.
    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers;
        self
    }

    /// 워커당 배치 크기를 설정합니다.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// 실패 라인 비율 임계값을 설정합니다.
    pub fn failure_threshold(mut self, threshold: f64) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// 크기 기반 플러시 임계값을 설정합니다.
    pub fn size_threshold_bytes(mut self, bytes: usize) -> Self {
        self.config.size_threshold_bytes = bytes;
        self
    }

    /// 시간 기반 플러시 임계값을 설정합니다.
    pub fn time_threshold(mut self, threshold: Duration) -> Self {
        self.config.time_threshold = threshold;
        self
    }

    /// 싱크 쓰기 재시도 정책을 설정합니다.
    pub fn retry(mut self, max_attempts: u32, backoff_base: Duration) -> Self {
        self.config.retry_max_attempts = max_attempts;
        self.config.retry_backoff_base = backoff_base;
        self
    }

    /// 랜딩/싱크 디렉토리를 설정합니다.
    pub fn storage_dirs(mut self, landing: impl Into<PathBuf>, sink: impl Into<PathBuf>) -> Self {
        self.config.landing_dir = landing.into();
        self.config.sink_dir = sink.into();
        self
    }

    /// 랜딩 워처 폴링 간격을 설정합니다.
    pub fn watch_interval(mut self, interval: Duration) -> Self {
        self.config.watch_interval = interval;
        self
    }

    /// 큐 스냅샷 경로를 설정합니다.
    pub fn snapshot_path(mut self, path: Option<PathBuf>) -> Self {
        self.config.snapshot_path = path;
        self
    }

    /// 리소스 하나를 추가합니다.
    pub fn resource(mut self, name: impl Into<String>, kind: logrelay_core::FormatKind) -> Self {
        self.config.resources.push(ResourceEntry {
            name: name.into(),
            kind,
        });
        self
    }

    /// 설정을 검증하고 `PipelineConfig`를 생성합니다.
    pub fn build(self) -> Result<PipelineConfig, RelayPipelineError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logrelay_core::FormatKind;

    #[test]
    fn default_config_is_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn from_core_converts_units() {
        let mut core = RelayConfig::default();
        core.queue.visibility_timeout_secs = 30;
        core.queue.receive_wait_ms = 250;
        core.general.data_dir = "/data/relay".to_owned();
        let config = PipelineConfig::from_core(&core);
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
        assert_eq!(config.receive_wait, Duration::from_millis(250));
        assert_eq!(
            config.snapshot_path,
            Some(PathBuf::from("/data/relay/queue-snapshot.json"))
        );
    }

    #[test]
    fn flush_tick_is_clamped() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.flush_tick(), Duration::from_secs(1));
        config.time_threshold = Duration::from_millis(20);
        assert_eq!(config.flush_tick(), Duration::from_millis(10));
        config.time_threshold = Duration::from_millis(200);
        assert_eq!(config.flush_tick(), Duration::from_millis(50));
    }

    #[test]
    fn validate_rejects_traversal_in_sink_dir() {
        let result = PipelineConfigBuilder::new()
            .storage_dirs("/data/landing", "/data/../etc")
            .build();
        assert!(matches!(result, Err(RelayPipelineError::Config { .. })));
    }

    #[test]
    fn builder_creates_valid_config() {
        let config = PipelineConfigBuilder::new()
            .workers(4)
            .batch_size(5)
            .time_threshold(Duration::from_millis(100))
            .resource("web-alb", FormatKind::Alb)
            .build()
            .unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.resources.len(), 1);
    }

    #[test]
    fn builder_rejects_zero_workers() {
        assert!(PipelineConfigBuilder::new().workers(0).build().is_err());
    }
}
