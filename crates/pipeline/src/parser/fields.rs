//! 공통 필드 유틸리티
//!
//! 로드밸런서 로그는 공백으로 구분되고 일부 필드가 큰따옴표로 감싸여 있습니다.
//! [`split_quoted`]는 따옴표 안의 공백을 보존하며 필드를 나눕니다.

use chrono::{DateTime, NaiveDateTime, Utc};

use logrelay_core::error::ParseError;

/// 공백 구분 + 큰따옴표 인식 토크나이저
///
/// - 따옴표 밖의 연속된 공백은 하나의 구분자로 취급합니다.
/// - 따옴표 구간은 따옴표를 제거하고, `\"`와 `\\` 이스케이프를 풉니다.
/// - 따옴표 구간 뒤에 공백 없이 이어지는 문자는 같은 필드에 붙습니다
///   (`"h2","http/1.1"` → `h2,http/1.1`).
/// - 닫히지 않은 따옴표는 [`ParseError::Unterminated`]입니다.
pub fn split_quoted(line: &str) -> Result<Vec<String>, ParseError> {
    let mut fields = Vec::new();
    let mut chars = line.char_indices().peekable();

    loop {
        while chars.next_if(|&(_, c)| c == ' ').is_some() {}
        if chars.peek().is_none() {
            break;
        }

        let mut field = String::new();
        while let Some(&(offset, c)) = chars.peek() {
            match c {
                ' ' => break,
                '"' => {
                    chars.next();
                    read_quoted(&mut chars, &mut field, offset)?;
                }
                other => {
                    field.push(other);
                    chars.next();
                }
            }
        }
        fields.push(field);
    }

    Ok(fields)
}

/// 여는 따옴표 다음부터 닫는 따옴표까지 읽습니다.
fn read_quoted(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    field: &mut String,
    offset: usize,
) -> Result<(), ParseError> {
    while let Some((_, c)) = chars.next() {
        match c {
            '\\' => match chars.next_if(|&(_, n)| n == '"' || n == '\\') {
                Some((_, escaped)) => field.push(escaped),
                None => field.push('\\'),
            },
            '"' => return Ok(()),
            other => field.push(other),
        }
    }
    Err(ParseError::Unterminated { offset })
}

/// ISO 8601 타임스탬프를 UTC로 해석합니다.
///
/// 오프셋이 없는 값(`2018-12-20T02:59:40`)은 UTC로 간주합니다.
pub fn parse_iso8601(value: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| ParseError::Timestamp {
            value: value.to_owned(),
            reason: e.to_string(),
        })
}

/// 라벨 목록과 값 목록을 필드 쌍으로 묶습니다.
///
/// 라벨보다 값이 많으면 남는 값은 `extra_{n}` 이름을 받습니다.
pub fn label_fields(labels: &[&str], values: Vec<String>) -> Vec<(String, String)> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, value)| {
            let name = labels
                .get(i)
                .map(|l| (*l).to_owned())
                .unwrap_or_else(|| format!("extra_{}", i - labels.len() + 1));
            (name, value)
        })
        .collect()
}

/// `"METHOD URI PROTOCOL"` 형식의 요청 라인을 세 부분으로 나눕니다.
///
/// 형식이 다르면 모두 빈 문자열이 아닌 `-`로 채웁니다.
pub fn split_request_line(request: &str) -> [String; 3] {
    let mut parts = request.splitn(3, ' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(uri), Some(proto)) if !method.is_empty() => {
            [method.to_owned(), uri.to_owned(), proto.to_owned()]
        }
        _ => ["-".to_owned(), "-".to_owned(), "-".to_owned()],
    }
}
