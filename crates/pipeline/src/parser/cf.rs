//! CloudFront 표준 액세스 로그 파서
//!
//! 탭 구분 형식입니다. 파일 앞부분의 `#Version`, `#Fields` 헤더 라인은 건너뜁니다.
//! 배포 설정에 따라 뒤쪽 필드가 빠질 수 있어 최소 필드 수만 검사합니다.

use chrono::NaiveDateTime;

use logrelay_core::error::ParseError;
use logrelay_core::pipeline::{LineParser, ParsedLine};
use logrelay_core::types::FormatKind;

use super::fields::label_fields;

/// 최소 필드 수 (`fle_encrypted_fields`까지)
pub const CF_MIN_FIELDS: usize = 26;

const CF_LABELS: &[&str] = &[
    "date",
    "time",
    "x_edge_location",
    "sc_bytes",
    "c_ip",
    "cs_method",
    "cs_host",
    "cs_uri_stem",
    "sc_status",
    "cs_referer",
    "cs_user_agent",
    "cs_uri_query",
    "cs_cookie",
    "x_edge_result_type",
    "x_edge_request_id",
    "x_host_header",
    "cs_protocol",
    "cs_bytes",
    "time_taken",
    "x_forwarded_for",
    "ssl_protocol",
    "ssl_cipher",
    "x_edge_response_result_type",
    "cs_protocol_version",
    "fle_status",
    "fle_encrypted_fields",
    "c_port",
    "time_to_first_byte",
    "x_edge_detailed_result_type",
    "sc_content_type",
    "sc_content_len",
    "sc_range_start",
    "sc_range_end",
];

/// CloudFront 라인 파서
#[derive(Debug, Default, Clone, Copy)]
pub struct CfParser;

impl LineParser for CfParser {
    fn format(&self) -> FormatKind {
        FormatKind::Cf
    }

    fn should_skip(&self, line: &str) -> bool {
        line.starts_with('#')
    }

    fn parse_line(&self, line: &str) -> Result<ParsedLine, ParseError> {
        let values: Vec<String> = line.split('\t').map(str::to_owned).collect();
        if values.len() < CF_MIN_FIELDS {
            return Err(ParseError::FieldCount {
                expected: CF_MIN_FIELDS,
                actual: values.len(),
            });
        }

        let stamp = format!("{} {}", values[0], values[1]);
        let event_time = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S")
            .map_err(|e| ParseError::Timestamp {
                value: stamp.clone(),
                reason: e.to_string(),
            })?
            .and_utc();

        Ok(ParsedLine {
            event_time,
            fields: label_fields(CF_LABELS, values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample_line() -> String {
        [
            "2024-03-02", "10:00:00", "SFO5-C1", "3260", "203.0.113.5", "GET",
            "d111111abcdef8.cloudfront.net", "/index.html", "200", "-",
            "Mozilla/5.0%20(Macintosh)", "-", "-", "Hit",
            "SOX4xwn4XV6Q4rgb7XiVGOHms_BGlTAC4KyHmureZmBNrjGdRLiNIQ==",
            "d111111abcdef8.cloudfront.net", "https", "23", "0.001", "-", "TLSv1.3",
            "TLS_AES_128_GCM_SHA256", "Hit", "HTTP/2.0", "-", "-", "11040", "0.001",
            "Hit", "text/html", "78", "-", "-",
        ]
        .join("\t")
    }

    #[test]
    fn parses_full_line() {
        let parsed = CfParser.parse_line(&sample_line()).unwrap();
        assert_eq!(
            parsed.event_time,
            Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap()
        );
        assert_eq!(parsed.fields.len(), CF_LABELS.len());
        assert_eq!(parsed.fields[2], ("x_edge_location".to_owned(), "SFO5-C1".to_owned()));
        assert_eq!(parsed.fields[32].0, "sc_range_end");
    }

    #[test]
    fn older_layout_with_fewer_fields_parses() {
        let line: Vec<String> = sample_line()
            .split('\t')
            .take(CF_MIN_FIELDS)
            .map(str::to_owned)
            .collect();
        let parsed = CfParser.parse_line(&line.join("\t")).unwrap();
        assert_eq!(parsed.fields.len(), CF_MIN_FIELDS);
    }

    #[test]
    fn header_lines_are_skipped() {
        assert!(CfParser.should_skip("#Version: 1.0"));
        assert!(CfParser.should_skip("#Fields: date time x-edge-location"));
        assert!(!CfParser.should_skip(&sample_line()));
    }

    #[test]
    fn space_separated_line_is_rejected() {
        let err = CfParser.parse_line("2024-03-02 10:00:00 SFO5-C1").unwrap_err();
        assert!(matches!(err, ParseError::FieldCount { actual: 1, .. }));
    }
}
