//! 파이프라인 에러 타입
//!
//! [`RelayPipelineError`]는 큐, 디스패처, 딜리버리 스트림 내부에서 발생하는
//! 모든 에러를 표현합니다. `From<RelayPipelineError> for RelayError` 변환이
//! 구현되어 있어 상위 레이어에서 `?` 연산자로 전파할 수 있습니다.

use logrelay_core::error::{ConfigError, PipelineError, RelayError, StorageError};

/// 파이프라인 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RelayPipelineError {
    /// 스토어/싱크 일시 장애 (재시도 대상)
    #[error("transient io error: {0}")]
    TransientIo(String),

    /// 리소스 맵에 없는 리소스
    #[error("format unknown for resource '{resource}'")]
    FormatUnknown {
        /// 리소스 이름
        resource: String,
    },

    /// 오브젝트의 실패 라인 비율이 임계값 초과
    #[error(
        "object parse failure: {object_key}: {failed}/{total} lines failed (threshold {threshold})"
    )]
    ObjectParseFailure {
        /// 오브젝트 키
        object_key: String,
        /// 실패한 라인 수
        failed: usize,
        /// 파싱 대상 라인 수
        total: usize,
        /// 실패 비율 임계값
        threshold: f64,
    },

    /// 싱크와 에러 파티션 모두에 쓰기 실패
    #[error("delivery failure: {partition}: {reason}")]
    DeliveryFailure {
        /// 파티션 레이블
        partition: String,
        /// 마지막 에러
        reason: String,
    },

    /// 큐 깊이 초과 (재시도 대상)
    #[error("queue full: capacity {capacity}")]
    QueueFull {
        /// 최대 깊이
        capacity: usize,
    },

    /// 재전달 이후의 오래된 receipt로 ack 시도
    #[error("stale receipt for message {message_id}: receive_count {receive_count}")]
    StaleReceipt {
        /// 메시지 ID
        message_id: u64,
        /// receipt의 수신 횟수
        receive_count: u32,
    },

    /// 기타 큐 에러 (잘못된 상태 전이, 없는 메시지 등)
    #[error("queue error: {0}")]
    Queue(String),

    /// 잘못된 생성 이벤트
    #[error("malformed creation event: {0}")]
    MalformedEvent(String),

    /// 스토리지 에러
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 직렬화/압축 에러
    #[error("encode error: {0}")]
    Encode(String),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayPipelineError {
    /// 같은 작업을 재시도하면 성공할 수 있는 에러인지 확인합니다.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TransientIo(_) | Self::QueueFull { .. } | Self::Io(_) => true,
            Self::Storage(e) => e.is_transient(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for RelayPipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<RelayPipelineError> for RelayError {
    fn from(err: RelayPipelineError) -> Self {
        match err {
            RelayPipelineError::Config { field, reason } => {
                RelayError::Config(ConfigError::InvalidValue { field, reason })
            }
            RelayPipelineError::Storage(e) => RelayError::Storage(e),
            RelayPipelineError::Io(e) => RelayError::Io(e),
            other => RelayError::Pipeline(PipelineError::Processing(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_parse_failure_display() {
        let err = RelayPipelineError::ObjectParseFailure {
            object_key: "web-alb/a.log".to_owned(),
            failed: 6,
            total: 10,
            threshold: 0.5,
        };
        let msg = err.to_string();
        assert!(msg.contains("web-alb/a.log"));
        assert!(msg.contains("6/10"));
    }

    #[test]
    fn transient_classification() {
        assert!(RelayPipelineError::TransientIo("timeout".to_owned()).is_transient());
        assert!(RelayPipelineError::QueueFull { capacity: 1 }.is_transient());
        assert!(
            RelayPipelineError::Storage(StorageError::Unavailable("down".to_owned())).is_transient()
        );
        assert!(
            !RelayPipelineError::Storage(StorageError::NotFound("a".to_owned())).is_transient()
        );
        assert!(
            !RelayPipelineError::FormatUnknown {
                resource: "x".to_owned()
            }
            .is_transient()
        );
        assert!(!RelayPipelineError::MalformedEvent("bad".to_owned()).is_transient());
    }

    #[test]
    fn converts_to_relay_error() {
        let err: RelayError = RelayPipelineError::Config {
            field: "workers".to_owned(),
            reason: "must be greater than 0".to_owned(),
        }
        .into();
        assert!(matches!(err, RelayError::Config(_)));

        let err: RelayError = RelayPipelineError::StaleReceipt {
            message_id: 1,
            receive_count: 2,
        }
        .into();
        assert!(matches!(err, RelayError::Pipeline(PipelineError::Processing(_))));
    }
}
