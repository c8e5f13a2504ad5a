//! 배치 인코딩: NDJSON 라인 + gzip 압축

use std::io::Write;

use bytes::Bytes;
use flate2::Compression;
use flate2::write::GzEncoder;

use logrelay_core::types::{ErrorKind, ParsedRecord};

use crate::error::RelayPipelineError;

/// 레코드 하나를 JSON 라인으로 `out`에 덧붙이고 추가된 바이트 수를 반환합니다.
pub fn encode_line(record: &ParsedRecord, out: &mut Vec<u8>) -> Result<usize, RelayPipelineError> {
    let before = out.len();
    serde_json::to_writer(&mut *out, record)?;
    out.push(b'\n');
    Ok(out.len() - before)
}

/// NDJSON 본문을 gzip으로 압축합니다.
pub fn gzip(body: &[u8]) -> Result<Bytes, RelayPipelineError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
    encoder.write_all(body)?;
    Ok(Bytes::from(encoder.finish()?))
}

/// 각 JSON 라인의 앞쪽에 `error_kind`와 `error` 필드를 추가합니다.
///
/// 객체가 아닌 라인은 `{"error_kind":..,"error":..,"raw":<line>}`으로 감쌉니다.
pub fn annotate(body: &[u8], kind: ErrorKind, error: &str) -> Result<Vec<u8>, RelayPipelineError> {
    let prefix = format!(
        "{{\"error_kind\":{},\"error\":{}",
        serde_json::to_string(kind.as_str())?,
        serde_json::to_string(error)?
    );
    let mut out = Vec::with_capacity(body.len() + prefix.len() * 8);
    for line in body.split(|b| *b == b'\n').filter(|l| !l.is_empty()) {
        out.extend_from_slice(prefix.as_bytes());
        match line.strip_prefix(b"{") {
            Some(b"}") => out.push(b'}'),
            Some(rest) => {
                out.push(b',');
                out.extend_from_slice(rest);
            }
            None => {
                out.extend_from_slice(b",\"raw\":");
                serde_json::to_writer(&mut out, &String::from_utf8_lossy(line))?;
                out.push(b'}');
            }
        }
        out.push(b'\n');
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use flate2::read::GzDecoder;
    use logrelay_core::types::FormatKind;
    use std::io::Read;

    fn record() -> ParsedRecord {
        ParsedRecord {
            resource_type: Some(FormatKind::Alb),
            resource_name: "web-alb".to_owned(),
            event_time: Utc.with_ymd_and_hms(2024, 3, 2, 10, 0, 0).unwrap(),
            fields: vec![("elb_status_code".to_owned(), "200".to_owned())],
        }
    }

    #[test]
    fn lines_keep_enrichment_first() {
        let mut out = Vec::new();
        let written = encode_line(&record(), &mut out).unwrap();
        assert_eq!(written, out.len());
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(r#"{"resource_type":"alb","resource_name":"web-alb","event_time":"#));
        assert!(text.ends_with("\"elb_status_code\":\"200\"}\n"));
    }

    #[test]
    fn gzip_output_decompresses_to_input() {
        let mut body = Vec::new();
        encode_line(&record(), &mut body).unwrap();
        encode_line(&record(), &mut body).unwrap();
        let compressed = gzip(&body).unwrap();
        assert_eq!(&compressed[..2], &[0x1f, 0x8b]);

        let mut decoded = Vec::new();
        GzDecoder::new(&compressed[..]).read_to_end(&mut decoded).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn annotation_is_valid_json_per_line() {
        let mut body = Vec::new();
        encode_line(&record(), &mut body).unwrap();
        body.extend_from_slice(b"{}\nnot json\n");

        let annotated = annotate(&body, ErrorKind::DeliveryFailed, "sink said \"no\"").unwrap();
        let lines: Vec<serde_json::Value> = annotated
            .split(|b| *b == b'\n')
            .filter(|l| !l.is_empty())
            .map(|l| serde_json::from_slice(l).unwrap())
            .collect();

        assert_eq!(lines.len(), 3);
        for line in &lines {
            assert_eq!(line["error_kind"], "delivery-failed");
            assert_eq!(line["error"], "sink said \"no\"");
        }
        assert_eq!(lines[0]["resource_type"], "alb");
        assert_eq!(lines[2]["raw"], "not json");
    }
}
