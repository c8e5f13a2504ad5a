//! Apache Common/Combined Log Format 파서
//!
//! 인스턴스 웹 서버 로그용입니다. referer와 user agent는 선택 필드이며,
//! 로드밸런서 헬스체크 요청(`ELB-HealthChecker`)은 건너뜁니다.

use chrono::{DateTime, Utc};
use regex::{Captures, Regex};

use logrelay_core::error::ParseError;
use logrelay_core::pipeline::{LineParser, ParsedLine};
use logrelay_core::types::FormatKind;

use super::fields::split_request_line;

const CLF_PATTERN: &str = r#"^(\S+) (\S+) (\S+) \[([^\]]+)\] "((?:[^"\\]|\\.)*)" (\d{3}|-) (\d+|-)(?: "((?:[^"\\]|\\.)*)" "((?:[^"\\]|\\.)*)")?"#;

const CLF_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

const HEALTH_CHECK_PREFIX: &str = "elb-healthchecker";

/// CLF 라인 파서
#[derive(Debug, Clone)]
pub struct ClfParser {
    pattern: Regex,
}

impl ClfParser {
    /// 라인 정규식을 컴파일하여 파서를 생성합니다.
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(CLF_PATTERN)?,
        })
    }

    fn is_health_check(caps: &Captures<'_>) -> bool {
        caps.get(9).is_some_and(|ua| {
            ua.as_str()
                .get(..HEALTH_CHECK_PREFIX.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(HEALTH_CHECK_PREFIX))
        })
    }

    fn captures<'a>(&self, line: &'a str) -> Result<Captures<'a>, ParseError> {
        self.pattern.captures(line).ok_or_else(|| ParseError::Mismatch {
            format: FormatKind::Clf.to_string(),
        })
    }

    fn fields(caps: &Captures<'_>) -> Result<ParsedLine, ParseError> {
        let group = |i: usize| caps.get(i).map_or("-", |m| m.as_str()).to_owned();

        let datetime = group(4);
        let event_time = DateTime::parse_from_str(&datetime, CLF_TIME_FORMAT)
            .map_err(|e| ParseError::Timestamp {
                value: datetime.clone(),
                reason: e.to_string(),
            })?
            .with_timezone(&Utc);
        let [method, request_uri, protocol] = split_request_line(&group(5));

        let mut fields = vec![
            ("remote_host".to_owned(), group(1)),
            ("remote_logname".to_owned(), group(2)),
            ("remote_user".to_owned(), group(3)),
            ("datetime".to_owned(), datetime),
            ("method".to_owned(), method),
            ("request_uri".to_owned(), request_uri),
            ("protocol".to_owned(), protocol),
            ("status".to_owned(), group(6)),
            ("size".to_owned(), group(7)),
        ];
        if caps.get(8).is_some() {
            fields.push(("referer".to_owned(), group(8)));
            fields.push(("user_agent".to_owned(), group(9)));
        }

        Ok(ParsedLine { event_time, fields })
    }
}

impl LineParser for ClfParser {
    fn format(&self) -> FormatKind {
        FormatKind::Clf
    }

    fn should_skip(&self, line: &str) -> bool {
        self.pattern
            .captures(line)
            .is_some_and(|caps| Self::is_health_check(&caps))
    }

    fn parse_line(&self, line: &str) -> Result<ParsedLine, ParseError> {
        Self::fields(&self.captures(line)?)
    }

    fn parse_or_skip(&self, line: &str) -> Result<Option<ParsedLine>, ParseError> {
        let caps = self.captures(line)?;
        if Self::is_health_check(&caps) {
            return Ok(None);
        }
        Self::fields(&caps).map(Some)
    }
}
