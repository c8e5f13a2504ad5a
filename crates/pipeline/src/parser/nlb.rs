//! Network Load Balancer(TLS 리스너) 액세스 로그 파서

use logrelay_core::error::ParseError;
use logrelay_core::pipeline::{LineParser, ParsedLine};
use logrelay_core::types::FormatKind;

use super::fields::{label_fields, parse_iso8601, split_quoted};

/// NLB 라인 필드 수
pub const NLB_MIN_FIELDS: usize = 22;

const TIME_INDEX: usize = 2;

const NLB_LABELS: &[&str] = &[
    "type",
    "version",
    "time",
    "elb",
    "listener",
    "client_port",
    "destination_port",
    "connection_time",
    "tls_handshake_time",
    "received_bytes",
    "sent_bytes",
    "incoming_tls_alert",
    "chosen_cert_arn",
    "chosen_cert_serial",
    "tls_cipher",
    "tls_protocol_version",
    "tls_named_group",
    "domain_name",
    "alpn_fe_protocol",
    "alpn_be_protocol",
    "alpn_client_preference_list",
    "tls_connection_creation_time",
];

/// NLB 라인 파서
#[derive(Debug, Default, Clone, Copy)]
pub struct NlbParser;

impl LineParser for NlbParser {
    fn format(&self) -> FormatKind {
        FormatKind::Nlb
    }

    fn parse_line(&self, line: &str) -> Result<ParsedLine, ParseError> {
        let values = split_quoted(line)?;
        if values.len() < NLB_MIN_FIELDS {
            return Err(ParseError::FieldCount {
                expected: NLB_MIN_FIELDS,
                actual: values.len(),
            });
        }
        let event_time = parse_iso8601(&values[TIME_INDEX])?;
        Ok(ParsedLine {
            event_time,
            fields: label_fields(NLB_LABELS, values),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    const SAMPLE: &str = r#"tls 2.0 2018-12-20T02:59:40 net/my-network-loadbalancer/c6e77e28c25b2234 g3d4b5e8bb8464cd 72.21.218.154:51341 172.100.100.185:443 5 2 98 246 - arn:aws:acm:us-east-2:671290407336:certificate/2a108f19-aded-46b0-8493-c63eb1ef4a99 - ECDHE-RSA-AES128-SHA tlsv12 - my-network-loadbalancer-c6e77e28c25b2234.elb.us-east-2.amazonaws.com h2 h2 "h2","http/1.1" 2020-04-01T08:51:42"#;

    #[test]
    fn parses_documented_sample() {
        let parsed = NlbParser.parse_line(SAMPLE).unwrap();
        assert_eq!(parsed.event_time.year(), 2018);
        assert_eq!(parsed.event_time.hour(), 2);
        assert_eq!(parsed.fields.len(), NLB_MIN_FIELDS);
        assert_eq!(parsed.fields[4], ("listener".to_owned(), "g3d4b5e8bb8464cd".to_owned()));
        assert_eq!(parsed.fields[15].1, "tlsv12");
        assert_eq!(
            parsed.fields[21],
            (
                "tls_connection_creation_time".to_owned(),
                "2020-04-01T08:51:42".to_owned()
            )
        );
    }

    #[test]
    fn short_line_is_rejected() {
        let err = NlbParser.parse_line("tls 2.0 2018-12-20T02:59:40").unwrap_err();
        assert_eq!(
            err,
            ParseError::FieldCount {
                expected: NLB_MIN_FIELDS,
                actual: 3
            }
        );
    }
}
