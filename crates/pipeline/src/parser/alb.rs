//! Application Load Balancer 액세스 로그 파서
//!
//! 공백 구분, 일부 필드는 큰따옴표로 감싸인 형식입니다.
//! 요청 필드(`"GET https://host/path HTTP/1.1"`)는 메서드/URI/프로토콜로 나눕니다.

use logrelay_core::error::ParseError;
use logrelay_core::pipeline::{LineParser, ParsedLine};
use logrelay_core::types::FormatKind;

use super::fields::{label_fields, parse_iso8601, split_quoted, split_request_line};

/// 필수 필드 수 (`conn_trace_id`는 선택)
pub const ALB_MIN_FIELDS: usize = 29;

/// 요청 필드 위치
const REQUEST_INDEX: usize = 12;
/// 타임스탬프 필드 위치
const TIME_INDEX: usize = 1;

/// 요청 필드를 분해한 뒤의 필드 이름
const ALB_LABELS: &[&str] = &[
    "type",
    "time",
    "elb",
    "client_port",
    "target_port",
    "request_processing_time",
    "target_processing_time",
    "response_processing_time",
    "elb_status_code",
    "target_status_code",
    "received_bytes",
    "sent_bytes",
    "request_method",
    "request_uri",
    "request_protocol",
    "user_agent",
    "ssl_cipher",
    "ssl_protocol",
    "target_group_arn",
    "trace_id",
    "domain_name",
    "chosen_cert_arn",
    "matched_rule_priority",
    "request_creation_time",
    "actions_executed",
    "redirect_url",
    "error_reason",
    "target_port_list",
    "target_status_code_list",
    "classification",
    "classification_reason",
    "conn_trace_id",
];

/// ALB 라인 파서
#[derive(Debug, Default, Clone, Copy)]
pub struct AlbParser;

impl LineParser for AlbParser {
    fn format(&self) -> FormatKind {
        FormatKind::Alb
    }

    fn parse_line(&self, line: &str) -> Result<ParsedLine, ParseError> {
        let mut values = split_quoted(line)?;
        if values.len() < ALB_MIN_FIELDS {
            return Err(ParseError::FieldCount {
                expected: ALB_MIN_FIELDS,
                actual: values.len(),
            });
        }

        let event_time = parse_iso8601(&values[TIME_INDEX])?;
        let [method, uri, protocol] = split_request_line(&values[REQUEST_INDEX]);
        values[REQUEST_INDEX] = method;
        values.insert(REQUEST_INDEX + 1, uri);
        values.insert(REQUEST_INDEX + 2, protocol);

        Ok(ParsedLine {
            event_time,
            fields: label_fields(ALB_LABELS, values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const SAMPLE: &str = r#"https 2018-07-02T22:23:00.186641Z app/my-loadbalancer/50dc6c495c0c9188 192.168.131.39:2817 10.0.0.1:80 0.086 0.048 0.037 200 200 0 57 "GET https://www.example.com:443/ HTTP/1.1" "curl/7.46.0" ECDHE-RSA-AES128-GCM-SHA256 TLSv1.2 arn:aws:elasticloadbalancing:us-east-2:123456789012:targetgroup/my-targets/73e2d6bc24d8a067 "Root=1-58337281-1d84f3d73c47ec4e58577259" "www.example.com" "arn:aws:acm:us-east-2:123456789012:certificate/12345678-1234-1234-1234-123456789012" 1 2018-07-02T22:22:48.364000Z "authenticate,forward" "-" "-" "10.0.0.1:80" "200" "-" "-""#;

    fn field<'a>(parsed: &'a ParsedLine, name: &str) -> Option<&'a str> {
        parsed
            .fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn parses_documented_sample() {
        let parsed = AlbParser.parse_line(SAMPLE).unwrap();
        assert_eq!(
            parsed.event_time,
            Utc.with_ymd_and_hms(2018, 7, 2, 22, 23, 0).unwrap()
                + chrono::Duration::microseconds(186_641)
        );
        assert_eq!(field(&parsed, "type"), Some("https"));
        assert_eq!(field(&parsed, "request_method"), Some("GET"));
        assert_eq!(
            field(&parsed, "request_uri"),
            Some("https://www.example.com:443/")
        );
        assert_eq!(field(&parsed, "request_protocol"), Some("HTTP/1.1"));
        assert_eq!(field(&parsed, "user_agent"), Some("curl/7.46.0"));
        assert_eq!(field(&parsed, "actions_executed"), Some("authenticate,forward"));
        assert_eq!(field(&parsed, "classification_reason"), Some("-"));
        assert_eq!(field(&parsed, "conn_trace_id"), None);
        assert_eq!(parsed.fields.len(), ALB_MIN_FIELDS + 2);
    }

    #[test]
    fn optional_trailing_field_is_kept() {
        let line = format!(r#"{SAMPLE} "TID_1234""#);
        let parsed = AlbParser.parse_line(&line).unwrap();
        assert_eq!(field(&parsed, "conn_trace_id"), Some("TID_1234"));
    }

    #[test]
    fn truncated_line_reports_field_count() {
        let err = AlbParser
            .parse_line("https 2018-07-02T22:23:00Z app/lb 1.2.3.4:1")
            .unwrap_err();
        assert_eq!(
            err,
            ParseError::FieldCount {
                expected: ALB_MIN_FIELDS,
                actual: 4
            }
        );
    }

    #[test]
    fn bad_timestamp_is_rejected() {
        let line = SAMPLE.replacen("2018-07-02T22:23:00.186641Z", "not-a-time", 1);
        assert!(matches!(
            AlbParser.parse_line(&line),
            Err(ParseError::Timestamp { .. })
        ));
    }

    #[test]
    fn malformed_request_field_yields_dashes() {
        let line = SAMPLE.replacen(r#""GET https://www.example.com:443/ HTTP/1.1""#, r#""-""#, 1);
        let parsed = AlbParser.parse_line(&line).unwrap();
        assert_eq!(field(&parsed, "request_method"), Some("-"));
        assert_eq!(field(&parsed, "request_uri"), Some("-"));
    }
}
