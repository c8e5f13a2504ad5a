//! 도메인 타입 — 시스템 전역에서 사용되는 공통 타입
//!
//! 랜딩 스토어의 원본 오브젝트, 로그 형식 종류, 파싱된 레코드 등
//! 모든 모듈이 공유하는 데이터 구조를 정의합니다.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// 로그 형식 종류
///
/// 리소스 이름은 시작 시점에 정적 맵을 통해 이 중 하나로 분류됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatKind {
    /// HTTP 로드밸런서 액세스 로그
    Alb,
    /// TCP 로드밸런서 액세스 로그
    Nlb,
    /// 인스턴스 웹서버 Common/Combined Log Format
    Clf,
    /// CDN 액세스 로그 (탭 구분)
    Cf,
}

impl FormatKind {
    /// 지원하는 모든 형식
    pub const ALL: [FormatKind; 4] = [Self::Alb, Self::Nlb, Self::Clf, Self::Cf];

    /// 파티션 경로와 메트릭 레이블에 쓰이는 이름을 반환합니다.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alb => "alb",
            Self::Nlb => "nlb",
            Self::Clf => "clf",
            Self::Cf => "cf",
        }
    }
}

impl fmt::Display for FormatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "alb" => Ok(Self::Alb),
            "nlb" => Ok(Self::Nlb),
            "clf" => Ok(Self::Clf),
            "cf" => Ok(Self::Cf),
            other => Err(format!(
                "unknown format kind '{other}', expected one of: alb, nlb, clf, cf"
            )),
        }
    }
}

/// 랜딩 스토어에 도착한 원본 로그 오브젝트 참조
///
/// 파이프라인은 원본 오브젝트를 읽기만 하고 절대 삭제하지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLogObject {
    /// 로그를 생성한 리소스 이름
    pub source_id: String,
    /// 랜딩 스토어 내 오브젝트 키
    pub object_key: String,
    /// 오브젝트 크기 (바이트)
    pub size: u64,
    /// 오브젝트 생성 시각
    pub created_at: DateTime<Utc>,
}

impl RawLogObject {
    /// 오브젝트 키의 첫 번째 경로 세그먼트를 리소스 이름으로 사용합니다.
    ///
    /// `my-alb/2024/03/02/file.log.gz` → `my-alb`
    pub fn source_from_key(object_key: &str) -> &str {
        object_key
            .trim_start_matches('/')
            .split('/')
            .next()
            .unwrap_or_default()
    }
}

impl fmt::Display for RawLogObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes, source={})", self.object_key, self.size, self.source_id)
    }
}

/// 파싱된 로그 레코드
///
/// 디스패처가 소유하다가 딜리버리 스트림이 수락하면 소유권이 넘어갑니다.
/// 직렬화 시 `resource_type`, `resource_name`이 먼저 오고 그 뒤에
/// 파서가 추출한 필드가 원래 순서대로 이어집니다.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRecord {
    /// 분류된 형식 (스트림 경계에서는 없을 수 있음)
    pub resource_type: Option<FormatKind>,
    /// 원본 리소스 이름
    pub resource_name: String,
    /// 이벤트 발생 시각 (파티션 날짜 결정)
    pub event_time: DateTime<Utc>,
    /// 필드 목록 (순서 유지)
    ///
    /// 원본 라인은 파싱 후 보관하지 않습니다.
    pub fields: Vec<(String, String)>,
}

impl ParsedRecord {
    /// 파티션 레이블을 반환합니다. 형식이 없으면 `unknown`입니다.
    pub fn partition_label(&self) -> &'static str {
        self.resource_type
            .as_ref()
            .map(FormatKind::as_str)
            .unwrap_or(UNKNOWN_PARTITION)
    }

    /// 필드 이름으로 값을 조회합니다.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// NDJSON 한 줄로 인코딩했을 때의 근사 바이트 수
    ///
    /// 이스케이프가 없고 초 단위 시각이면 정확히 일치합니다.
    pub fn approx_size(&self) -> usize {
        let fields: usize = self.fields.iter().map(|(k, v)| k.len() + v.len() + 6).sum();
        fields + self.partition_label().len() + self.resource_name.len() + ENCODED_LINE_OVERHEAD
    }
}

impl Serialize for ParsedRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + 3))?;
        map.serialize_entry("resource_type", self.partition_label())?;
        map.serialize_entry("resource_name", &self.resource_name)?;
        map.serialize_entry("event_time", &self.event_time.to_rfc3339())?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// 고정 키, RFC 3339 시각(25자), 괄호와 줄바꿈이 차지하는 바이트 수
const ENCODED_LINE_OVERHEAD: usize = 81;

/// 형식이 없는 레코드가 사용하는 범용 파티션 레이블
pub const UNKNOWN_PARTITION: &str = "unknown";

/// 에러 파티션 종류
///
/// 에러 배치는 `errors/{error_kind}/...` 경로에 기록됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// 리소스 맵에 없는 리소스
    FormatUnknown,
    /// 싱크 쓰기 재시도 소진
    DeliveryFailed,
}

impl ErrorKind {
    /// 경로와 레이블에 쓰이는 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FormatUnknown => "format-unknown",
            Self::DeliveryFailed => "delivery-failed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_record() -> ParsedRecord {
        ParsedRecord {
            resource_type: Some(FormatKind::Cf),
            resource_name: "web-cdn".to_owned(),
            event_time: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
            fields: vec![
                ("status".to_owned(), "200".to_owned()),
                ("method".to_owned(), "GET".to_owned()),
            ],
        }
    }

    #[test]
    fn format_kind_parses_case_insensitively() {
        assert_eq!("ALB".parse::<FormatKind>().unwrap(), FormatKind::Alb);
        assert_eq!(" cf ".parse::<FormatKind>().unwrap(), FormatKind::Cf);
        assert!("s3".parse::<FormatKind>().is_err());
    }

    #[test]
    fn source_from_key_uses_first_segment() {
        assert_eq!(RawLogObject::source_from_key("my-alb/2024/03/02/a.gz"), "my-alb");
        assert_eq!(RawLogObject::source_from_key("/inst/a.log"), "inst");
        assert_eq!(RawLogObject::source_from_key("flat.log"), "flat.log");
    }

    #[test]
    fn record_serializes_with_resource_fields_first() {
        let json = serde_json::to_string(&sample_record()).unwrap();
        assert!(json.starts_with(r#"{"resource_type":"cf","resource_name":"web-cdn""#));
        // 필드 순서 유지
        let status = json.find("\"status\"").unwrap();
        let method = json.find("\"method\"").unwrap();
        assert!(status < method);
    }

    #[test]
    fn approx_size_matches_encoded_line() {
        let record = sample_record();
        let mut line = serde_json::to_vec(&record).unwrap();
        line.push(b'\n');
        assert_eq!(record.approx_size(), line.len());

        let mut unknown = sample_record();
        unknown.resource_type = None;
        let mut line = serde_json::to_vec(&unknown).unwrap();
        line.push(b'\n');
        assert_eq!(unknown.approx_size(), line.len());
    }

    #[test]
    fn missing_resource_type_maps_to_unknown_partition() {
        let mut record = sample_record();
        record.resource_type = None;
        assert_eq!(record.partition_label(), "unknown");
    }

    #[test]
    fn error_kind_names_are_kebab_case() {
        assert_eq!(ErrorKind::FormatUnknown.to_string(), "format-unknown");
        assert_eq!(
            serde_json::to_string(&ErrorKind::DeliveryFailed).unwrap(),
            "\"delivery-failed\""
        );
    }
}
