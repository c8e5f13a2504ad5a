//! 파이프라인 trait — 모듈 확장 포인트 정의
//!
//! - [`LineParser`]: 로그 형식 하나를 담당하는 라인 파서
//! - [`Pipeline`]: 데몬이 관리하는 장기 실행 모듈의 생명주기

use std::fmt;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{ParseError, RelayError};
use crate::types::FormatKind;

/// 한 줄을 파싱한 결과
///
/// 리소스 정보는 디스패처가 덧붙이므로 파서는 필드와 시각만 반환합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedLine {
    /// 이벤트 발생 시각
    pub event_time: DateTime<Utc>,
    /// 필드 목록 (형식 정의 순서)
    pub fields: Vec<(String, String)>,
}

/// 로그 라인 파서 trait
///
/// 새로운 로그 형식을 지원하려면 이 trait을 구현합니다.
/// 파서는 상태를 갖지 않으며 여러 워커가 동시에 사용할 수 있어야 합니다.
pub trait LineParser: Send + Sync {
    /// 담당하는 형식
    fn format(&self) -> FormatKind;

    /// 건너뛸 라인인지 판단합니다 (주석, 헬스체크 등).
    ///
    /// 건너뛴 라인은 성공도 실패도 아닙니다.
    fn should_skip(&self, _line: &str) -> bool {
        false
    }

    /// 라인 하나를 파싱합니다.
    fn parse_line(&self, line: &str) -> Result<ParsedLine, ParseError>;

    /// 건너뛸 라인이면 `Ok(None)`, 아니면 파싱 결과를 반환합니다.
    ///
    /// 판별과 파싱이 같은 매칭을 공유하는 파서는 이 메서드를 재정의해
    /// 라인을 한 번만 검사합니다.
    fn parse_or_skip(&self, line: &str) -> Result<Option<ParsedLine>, ParseError> {
        if self.should_skip(line) {
            return Ok(None);
        }
        self.parse_line(line).map(Some)
    }
}

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작하지만 성능 저하
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 장기 실행 모듈의 생명주기 trait
///
/// ```text
/// Created → start() → Running → stop() → Stopped
/// ```
pub trait Pipeline: Send + Sync {
    /// 모듈을 시작합니다. 이미 실행 중이면 에러를 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// 모듈을 정지합니다. 버퍼에 남은 데이터는 모두 내보낸 뒤 반환합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), RelayError>> + Send;

    /// 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}
