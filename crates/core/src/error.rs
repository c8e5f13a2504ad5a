//! 에러 타입 — 도메인별 에러 정의

/// logrelay 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 파이프라인 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 라인 파싱 에러
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// 오브젝트 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 파이프라인 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 파이프라인 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 메시지/배치 처리 실패
    #[error("processing failed: {0}")]
    Processing(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// 단일 라인 파싱 에러
///
/// 라인 단위 에러는 디스패처에서 집계만 되고 오브젝트 처리를 중단시키지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// 필드 수가 형식에 맞지 않음
    #[error("expected at least {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },

    /// 라인 구조가 형식 문법과 일치하지 않음
    #[error("line does not match {format} grammar")]
    Mismatch { format: String },

    /// 타임스탬프 해석 실패
    #[error("invalid timestamp '{value}': {reason}")]
    Timestamp { value: String, reason: String },

    /// 닫히지 않은 따옴표 필드
    #[error("unterminated quoted field at offset {offset}")]
    Unterminated { offset: usize },
}

/// 스토리지 에러
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// 일시적으로 사용 불가 (재시도 가능)
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// 오브젝트 없음
    #[error("object not found: {0}")]
    NotFound(String),

    /// 쓰기 거부
    #[error("write rejected for '{key}': {reason}")]
    Rejected { key: String, reason: String },
}

impl StorageError {
    /// 재시도로 회복 가능한 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Rejected { .. })
    }
}
