//! 이벤트 — 랜딩 스토어가 발행하는 오브젝트 생성 알림
//!
//! [`CreationEvent`]는 오브젝트 하나당 한 번 발행되며, 인제스천 노티파이어가
//! 이를 큐 메시지로 변환합니다. 전송 형식은 JSON입니다.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::RawLogObject;

/// 오브젝트 생성 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreationEvent {
    /// 리소스 이름
    pub source_id: String,
    /// 오브젝트 키
    pub object_key: String,
    /// 오브젝트 크기 (바이트)
    pub size: u64,
    /// 생성 시각
    pub event_time: DateTime<Utc>,
}

impl CreationEvent {
    /// JSON 페이로드를 디코딩하고 필수 필드를 검증합니다.
    pub fn from_json(payload: &[u8]) -> Result<Self, String> {
        let event: Self = serde_json::from_slice(payload).map_err(|e| e.to_string())?;
        if event.object_key.trim().is_empty() {
            return Err("object_key must not be empty".to_owned());
        }
        if event.source_id.trim().is_empty() {
            return Err("source_id must not be empty".to_owned());
        }
        Ok(event)
    }

    /// 큐 메시지가 참조할 원본 오브젝트로 변환합니다.
    pub fn into_object(self) -> RawLogObject {
        RawLogObject {
            source_id: self.source_id,
            object_key: self.object_key,
            size: self.size,
            created_at: self.event_time,
        }
    }
}
