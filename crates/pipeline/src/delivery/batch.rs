//! 파티션별 딜리버리 배치

use std::fmt;
use std::time::Duration;

use chrono::NaiveDate;
use tokio::time::Instant;
use uuid::Uuid;

use logrelay_core::types::ParsedRecord;

use super::encode::encode_line;
use crate::error::RelayPipelineError;

/// 파티션 키: (레이블, 이벤트 날짜)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    /// 형식 레이블 (`alb`, `cf`, ..., `unknown`)
    pub label: String,
    /// UTC 기준 이벤트 날짜
    pub day: NaiveDate,
}

impl PartitionKey {
    /// 레코드가 속할 파티션을 계산합니다.
    pub fn for_record(record: &ParsedRecord) -> Self {
        Self {
            label: record.partition_label().to_owned(),
            day: record.event_time.date_naive(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.label, self.day)
    }
}

/// 플러시 원인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// 누적 바이트가 임계값 도달
    Size,
    /// 배치 나이가 임계값 도달
    Age,
    /// 종료 시 강제 플러시
    Shutdown,
}

impl FlushTrigger {
    /// 메트릭 레이블 값
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Size => "size",
            Self::Age => "age",
            Self::Shutdown => "shutdown",
        }
    }
}

/// 하나의 파티션에 누적 중인 레코드 묶음
///
/// 레코드는 수락 시점에 NDJSON으로 인코딩되어 `body`에 쌓입니다.
#[derive(Debug)]
pub struct DeliveryBatch {
    id: Uuid,
    key: PartitionKey,
    body: Vec<u8>,
    records: usize,
    /// 첫 레코드가 들어온 시각
    opened_at: Option<Instant>,
}

impl DeliveryBatch {
    /// 빈 배치를 생성합니다.
    pub fn new(key: PartitionKey) -> Self {
        Self {
            id: Uuid::new_v4(),
            key,
            body: Vec::new(),
            records: 0,
            opened_at: None,
        }
    }

    /// 레코드를 추가합니다. 레코드의 소유권은 배치로 넘어옵니다.
    pub fn push(&mut self, record: ParsedRecord) -> Result<(), RelayPipelineError> {
        encode_line(&record, &mut self.body)?;
        self.records += 1;
        self.opened_at.get_or_insert_with(Instant::now);
        Ok(())
    }

    /// 크기/나이 임계값 중 하나라도 도달했으면 플러시 원인을 반환합니다.
    pub fn flush_trigger(&self, size_threshold: usize, time_threshold: Duration) -> Option<FlushTrigger> {
        if self.is_empty() {
            return None;
        }
        if self.body.len() >= size_threshold {
            Some(FlushTrigger::Size)
        } else if self.age() >= time_threshold {
            Some(FlushTrigger::Age)
        } else {
            None
        }
    }

    /// 내용을 꺼내고 이 자리를 새 ID의 빈 배치로 바꿉니다.
    pub fn take(&mut self) -> DeliveryBatch {
        let fresh = DeliveryBatch::new(self.key.clone());
        std::mem::replace(self, fresh)
    }

    /// 쓰기에 실패한 배치를 다시 합칩니다.
    ///
    /// 기존 배치의 ID와 개시 시각을 유지하고 레코드는 앞쪽에 둡니다.
    pub fn restore(&mut self, mut failed: DeliveryBatch) {
        failed.body.append(&mut self.body);
        self.body = failed.body;
        self.records += failed.records;
        self.id = failed.id;
        self.opened_at = match (failed.opened_at, self.opened_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    /// 배치 ID (싱크 오브젝트 이름)
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 파티션 키
    pub fn key(&self) -> &PartitionKey {
        &self.key
    }

    /// 인코딩된 NDJSON 본문
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// 누적 바이트 수
    pub fn byte_size(&self) -> usize {
        self.body.len()
    }

    /// 레코드 수
    pub fn len(&self) -> usize {
        self.records
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.records == 0
    }

    /// 첫 레코드 이후 경과 시간 (빈 배치는 0)
    pub fn age(&self) -> Duration {
        self.opened_at.map(|t| t.elapsed()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use logrelay_core::types::FormatKind;

    fn record(day: u32) -> ParsedRecord {
        ParsedRecord {
            resource_type: Some(FormatKind::Cf),
            resource_name: "web-cdn".to_owned(),
            event_time: Utc.with_ymd_and_hms(2024, 3, day, 23, 59, 59).unwrap(),
            fields: vec![("sc_status".to_owned(), "200".to_owned())],
        }
    }

    #[test]
    fn partition_key_uses_utc_day_and_label() {
        let key = PartitionKey::for_record(&record(2));
        assert_eq!(key.label, "cf");
        assert_eq!(key.to_string(), "cf/2024-03-02");

        let mut unknown = record(2);
        unknown.resource_type = None;
        assert_eq!(PartitionKey::for_record(&unknown).label, "unknown");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batch_never_triggers() {
        let batch = DeliveryBatch::new(PartitionKey::for_record(&record(2)));
        tokio::time::advance(Duration::from_secs(3600)).await;
        assert_eq!(batch.flush_trigger(1, Duration::from_secs(1)), None);
    }

    #[tokio::test(start_paused = true)]
    async fn size_and_age_triggers_are_independent() {
        let mut batch = DeliveryBatch::new(PartitionKey::for_record(&record(2)));
        batch.push(record(2)).unwrap();
        let size = batch.byte_size();

        assert_eq!(batch.flush_trigger(size + 1, Duration::from_secs(10)), None);
        assert_eq!(
            batch.flush_trigger(size, Duration::from_secs(10)),
            Some(FlushTrigger::Size)
        );

        tokio::time::advance(Duration::from_millis(9_999)).await;
        assert_eq!(batch.flush_trigger(size + 1, Duration::from_secs(10)), None);
        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(
            batch.flush_trigger(size + 1, Duration::from_secs(10)),
            Some(FlushTrigger::Age)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn take_resets_and_restore_merges() {
        let mut batch = DeliveryBatch::new(PartitionKey::for_record(&record(2)));
        batch.push(record(2)).unwrap();
        let first_id = batch.id();

        let taken = batch.take();
        assert!(batch.is_empty());
        assert_ne!(batch.id(), first_id);
        assert_eq!(batch.age(), Duration::ZERO);

        batch.push(record(2)).unwrap();
        let taken_bytes = taken.byte_size();
        batch.restore(taken);
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.id(), first_id);
        assert_eq!(batch.byte_size(), taken_bytes * 2);
    }
}
