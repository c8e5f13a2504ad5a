//! 인제스천 큐 — 가시성 타임아웃, 수신 횟수, 데드레터
//!
//! [`IngestionQueue`]는 오브젝트 참조를 담은 메시지를 보관합니다.
//! 수신된 메시지는 가시성 타임아웃 동안 숨겨지고, 그 안에 ack되지 않으면
//! 다시 보이게 됩니다. 수신 횟수가 `max_receives`를 넘게 되는 메시지는
//! 재전달되지 않고 데드레터로 이동합니다.
//!
//! # 메시지 생명주기
//! ```text
//! Enqueued → Received → Processing → Acked
//!               ▲           │
//!               │           ├──→ Redelivered ──┐
//!               └───────────┼──────────────────┘
//!                           └──→ DeadLettered
//! ```
//!
//! ack는 `(message id, receive_count)` receipt로 수행하며, 재전달 이후의
//! 오래된 receipt는 [`RelayPipelineError::StaleReceipt`]로 거부됩니다.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use logrelay_core::metrics as m;
use logrelay_core::types::RawLogObject;

use crate::config::PipelineConfig;
use crate::error::RelayPipelineError;

/// 메시지 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    /// 큐에 들어왔고 아직 수신되지 않음
    Enqueued,
    /// 워커에게 전달됨 (숨김)
    Received,
    /// 워커가 처리 중 (숨김)
    Processing,
    /// 처리 완료, 삭제됨
    Acked,
    /// 가시성 타임아웃 만료로 다시 보임
    Redelivered,
    /// 최대 수신 횟수 초과
    DeadLettered,
}

impl MessageState {
    /// 허용된 상태 전이인지 확인합니다.
    pub fn can_transition_to(self, next: Self) -> bool {
        use MessageState::*;
        matches!(
            (self, next),
            (Enqueued, Received)
                | (Received, Processing)
                | (Received, Acked)
                | (Received, Redelivered)
                | (Received, DeadLettered)
                | (Processing, Acked)
                | (Processing, Redelivered)
                | (Processing, DeadLettered)
                | (Redelivered, Received)
                | (Redelivered, DeadLettered)
        )
    }

    /// 워커가 보유 중인 상태인지 (숨김 상태)
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Received | Self::Processing)
    }

    /// 수신 가능한 상태인지
    pub fn is_visible(self) -> bool {
        matches!(self, Self::Enqueued | Self::Redelivered)
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Enqueued => "enqueued",
            Self::Received => "received",
            Self::Processing => "processing",
            Self::Acked => "acked",
            Self::Redelivered => "redelivered",
            Self::DeadLettered => "dead_lettered",
        };
        f.write_str(name)
    }
}

/// 메시지 본문 — enqueue 시점에 고정되는 부분
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// 메시지 ID (큐 내에서 단조 증가)
    pub id: u64,
    /// 원본 오브젝트 참조
    pub object_ref: RawLogObject,
    /// enqueue 시각
    pub enqueued_at: DateTime<Utc>,
}

/// 큐 내부 메시지
#[derive(Debug, Clone)]
pub struct IngestionMessage {
    /// 메시지 본문
    pub envelope: MessageEnvelope,
    /// 누적 수신 횟수
    pub receive_count: u32,
    /// 숨김 해제 시각 (in-flight일 때만)
    pub visibility_deadline: Option<Instant>,
    /// 현재 상태
    pub state: MessageState,
    /// 마지막 처리 실패 사유
    pub last_error: Option<String>,
    enqueued_instant: Instant,
}

impl IngestionMessage {
    fn transition(&mut self, next: MessageState) -> Result<(), RelayPipelineError> {
        if !self.state.can_transition_to(next) {
            return Err(RelayPipelineError::Queue(format!(
                "invalid transition for message {}: {} -> {}",
                self.envelope.id, self.state, next
            )));
        }
        self.state = next;
        Ok(())
    }
}

/// ack/상태 변경에 사용하는 receipt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Receipt {
    /// 메시지 ID
    pub message_id: u64,
    /// 이 receipt를 발급한 수신의 횟수
    pub receive_count: u32,
}

impl fmt::Display for Receipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.message_id, self.receive_count)
    }
}

/// 워커에게 전달된 메시지
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    /// ack용 receipt
    pub receipt: Receipt,
    /// 원본 오브젝트 참조
    pub object: RawLogObject,
}

/// 데드레터 엔트리
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    /// 원래 메시지
    pub original_message: MessageEnvelope,
    /// 데드레터 사유
    pub failure_reason: String,
    /// 최종 수신 횟수
    pub receive_count: u32,
    /// 마지막 처리 에러
    pub last_error: Option<String>,
    /// 데드레터 이동 시각
    pub dead_lettered_at: DateTime<Utc>,
}

/// 스냅샷 내 대기 메시지
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMessage {
    /// 메시지 본문
    pub envelope: MessageEnvelope,
    /// 누적 수신 횟수
    pub receive_count: u32,
    /// 마지막 처리 에러
    pub last_error: Option<String>,
}

/// 큐 영속화 스냅샷
///
/// in-flight 메시지는 복원 시 즉시 다시 보이는 상태가 됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    /// 다음 메시지 ID
    pub next_id: u64,
    /// 미완료 메시지 (대기 + in-flight)
    pub pending: Vec<PendingMessage>,
    /// 데드레터
    pub dead_letters: Vec<DeadLetterEntry>,
}

/// 큐 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// 수신 가능한 메시지 수
    pub visible: usize,
    /// 워커가 보유 중인 메시지 수
    pub in_flight: usize,
    /// 데드레터 수
    pub dead_letters: usize,
}

impl QueueStats {
    /// 큐 깊이 (보임 + in-flight)
    pub fn depth(&self) -> usize {
        self.visible + self.in_flight
    }
}

/// 큐 설정
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// 가시성 타임아웃
    pub visibility_timeout: Duration,
    /// 보존 기간
    pub retention: Duration,
    /// 최대 수신 횟수
    pub max_receives: u32,
    /// 최대 깊이
    pub max_depth: usize,
}

impl From<&PipelineConfig> for QueueSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            visibility_timeout: config.visibility_timeout,
            retention: config.retention,
            max_receives: config.max_receives,
            max_depth: config.max_depth,
        }
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: BTreeMap<u64, IngestionMessage>,
    dead_letters: Vec<DeadLetterEntry>,
    next_id: u64,
}

/// 인제스천 큐
///
/// 여러 워커가 `Arc<IngestionQueue>`로 공유합니다. 모든 상태 변경은
/// 내부 뮤텍스 아래 짧은 임계 구역에서 일어납니다.
#[derive(Debug)]
pub struct IngestionQueue {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl IngestionQueue {
    /// 빈 큐를 생성합니다.
    pub fn new(settings: QueueSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState {
                next_id: 1,
                ..Default::default()
            }),
            notify: Notify::new(),
        }
    }

    /// 큐 설정
    pub fn settings(&self) -> &QueueSettings {
        &self.settings
    }

    /// 오브젝트 참조를 담은 메시지를 추가합니다.
    ///
    /// 큐가 가득 차면 [`RelayPipelineError::QueueFull`]을 반환합니다.
    pub async fn enqueue(&self, object_ref: RawLogObject) -> Result<u64, RelayPipelineError> {
        let mut state = self.state.lock().await;
        if state.messages.len() >= self.settings.max_depth {
            return Err(RelayPipelineError::QueueFull {
                capacity: self.settings.max_depth,
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        debug!(message_id = id, object_key = %object_ref.object_key, "message enqueued");
        state.messages.insert(
            id,
            IngestionMessage {
                envelope: MessageEnvelope {
                    id,
                    object_ref,
                    enqueued_at: Utc::now(),
                },
                receive_count: 0,
                visibility_deadline: None,
                state: MessageState::Enqueued,
                last_error: None,
                enqueued_instant: Instant::now(),
            },
        );
        metrics::counter!(m::QUEUE_ENQUEUED_TOTAL).increment(1);
        Self::publish_gauges(&state);
        drop(state);

        self.notify.notify_waiters();
        Ok(id)
    }

    /// 보이는 메시지를 최대 `max`개 수신합니다. 대기하지 않습니다.
    ///
    /// 수신 전에 보존 기간 만료와 가시성 타임아웃 만료를 처리합니다.
    pub async fn receive(&self, max: usize) -> Vec<ReceivedMessage> {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        self.purge_locked(&mut state, now);
        self.expire_locked(&mut state, now);

        let deadline = now + self.settings.visibility_timeout;
        let mut received = Vec::new();
        for msg in state.messages.values_mut() {
            if received.len() >= max {
                break;
            }
            if !msg.state.is_visible() {
                continue;
            }
            msg.receive_count += 1;
            msg.visibility_deadline = Some(deadline);
            msg.state = MessageState::Received;
            received.push(ReceivedMessage {
                receipt: Receipt {
                    message_id: msg.envelope.id,
                    receive_count: msg.receive_count,
                },
                object: msg.envelope.object_ref.clone(),
            });
        }
        Self::publish_gauges(&state);
        received
    }

    /// 메시지가 생기거나 `wait`가 지날 때까지 대기하며 수신합니다.
    pub async fn receive_wait(&self, max: usize, wait: Duration) -> Vec<ReceivedMessage> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.receive(max).await;
            if !batch.is_empty() {
                return batch;
            }
            let now = Instant::now();
            if now >= deadline {
                return batch;
            }

            // in-flight 메시지의 타임아웃이 먼저 오면 그때 다시 확인
            let wake_at = self
                .next_visibility_deadline()
                .await
                .map_or(deadline, |d| d.min(deadline));
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }

    /// 수신한 메시지의 처리를 시작합니다 (Received → Processing).
    pub async fn start_processing(&self, receipt: &Receipt) -> Result<(), RelayPipelineError> {
        let mut state = self.state.lock().await;
        let msg = Self::current_locked(&mut state, receipt)?;
        msg.transition(MessageState::Processing)
    }

    /// 처리 실패 사유를 기록합니다. 메시지는 타임아웃까지 숨겨진 채로 남습니다.
    pub async fn record_failure(
        &self,
        receipt: &Receipt,
        reason: impl Into<String>,
    ) -> Result<(), RelayPipelineError> {
        let mut state = self.state.lock().await;
        let msg = Self::current_locked(&mut state, receipt)?;
        msg.last_error = Some(reason.into());
        Ok(())
    }

    /// 메시지를 ack하고 큐에서 삭제합니다.
    pub async fn ack(&self, receipt: &Receipt) -> Result<(), RelayPipelineError> {
        let mut state = self.state.lock().await;
        let msg = Self::current_locked(&mut state, receipt)?;
        msg.transition(MessageState::Acked)?;
        state.messages.remove(&receipt.message_id);
        metrics::counter!(m::QUEUE_ACKED_TOTAL).increment(1);
        Self::publish_gauges(&state);
        debug!(receipt = %receipt, "message acked");
        Ok(())
    }

    /// 보존 기간이 지난 메시지를 삭제하고 삭제 수를 반환합니다.
    pub async fn purge_expired(&self) -> usize {
        let mut state = self.state.lock().await;
        let purged = self.purge_locked(&mut state, Instant::now());
        Self::publish_gauges(&state);
        purged
    }

    /// 데드레터 목록
    pub async fn dead_letters(&self) -> Vec<DeadLetterEntry> {
        self.state.lock().await.dead_letters.clone()
    }

    /// 데드레터를 수신 횟수를 초기화해 다시 큐에 넣습니다.
    ///
    /// 큐 깊이가 허용하는 만큼만 옮기고, 나머지는 데드레터에 남습니다.
    pub async fn replay_dead_letters(&self) -> usize {
        let mut state = self.state.lock().await;
        let capacity = self.settings.max_depth.saturating_sub(state.messages.len());
        let take = capacity.min(state.dead_letters.len());
        let replayed: Vec<DeadLetterEntry> = state.dead_letters.drain(..take).collect();

        let now = Instant::now();
        for entry in &replayed {
            let id = state.next_id;
            state.next_id += 1;
            state.messages.insert(
                id,
                IngestionMessage {
                    envelope: MessageEnvelope {
                        id,
                        object_ref: entry.original_message.object_ref.clone(),
                        enqueued_at: Utc::now(),
                    },
                    receive_count: 0,
                    visibility_deadline: None,
                    state: MessageState::Enqueued,
                    last_error: None,
                    enqueued_instant: now,
                },
            );
        }
        Self::publish_gauges(&state);
        drop(state);

        if !replayed.is_empty() {
            info!(count = replayed.len(), "dead letters replayed");
            self.notify.notify_waiters();
        }
        replayed.len()
    }

    /// 현재 통계
    pub async fn stats(&self) -> QueueStats {
        let state = self.state.lock().await;
        Self::stats_locked(&state)
    }

    /// 영속화 스냅샷을 만듭니다.
    pub async fn snapshot(&self) -> QueueSnapshot {
        let mut state = self.state.lock().await;
        self.expire_locked(&mut state, Instant::now());
        QueueSnapshot {
            next_id: state.next_id,
            pending: state
                .messages
                .values()
                .map(|msg| PendingMessage {
                    envelope: msg.envelope.clone(),
                    receive_count: msg.receive_count,
                    last_error: msg.last_error.clone(),
                })
                .collect(),
            dead_letters: state.dead_letters.clone(),
        }
    }

    /// 스냅샷에서 큐를 복원합니다.
    ///
    /// 보존 기간 계산은 원래 enqueue 시각을 기준으로 이어집니다.
    /// 수신 횟수가 이미 `max_receives`에 도달한 메시지는 다시 보이지 않고
    /// 데드레터로 옮겨집니다.
    pub fn restore(settings: QueueSettings, snapshot: QueueSnapshot) -> Self {
        let now = Instant::now();
        let wall_now = Utc::now();
        let max_receives = settings.max_receives;
        let mut messages = BTreeMap::new();
        let mut dead_letters = snapshot.dead_letters;
        let mut max_id = 0;

        for pending in snapshot.pending {
            max_id = max_id.max(pending.envelope.id);
            if pending.receive_count >= max_receives {
                warn!(
                    message_id = pending.envelope.id,
                    object_key = %pending.envelope.object_ref.object_key,
                    receive_count = pending.receive_count,
                    "restored message already at max receives, dead-lettered"
                );
                metrics::counter!(m::QUEUE_DEAD_LETTERED_TOTAL).increment(1);
                dead_letters.push(DeadLetterEntry {
                    original_message: pending.envelope,
                    failure_reason: format!("exceeded max receives ({max_receives})"),
                    receive_count: pending.receive_count,
                    last_error: pending.last_error,
                    dead_lettered_at: wall_now,
                });
                continue;
            }

            let age = (wall_now - pending.envelope.enqueued_at)
                .to_std()
                .unwrap_or_default();
            let enqueued_instant = now.checked_sub(age).unwrap_or(now);
            let state = if pending.receive_count == 0 {
                MessageState::Enqueued
            } else {
                MessageState::Redelivered
            };
            messages.insert(
                pending.envelope.id,
                IngestionMessage {
                    envelope: pending.envelope,
                    receive_count: pending.receive_count,
                    visibility_deadline: None,
                    state,
                    last_error: pending.last_error,
                    enqueued_instant,
                },
            );
        }

        let queue = Self::new(settings);
        let restored = QueueState {
            messages,
            dead_letters,
            next_id: snapshot.next_id.max(max_id + 1),
        };
        info!(
            pending = restored.messages.len(),
            dead_letters = restored.dead_letters.len(),
            "queue restored from snapshot"
        );
        Self {
            state: Mutex::new(restored),
            ..queue
        }
    }

    // --- 내부 헬퍼 ---

    /// receipt가 현재 수신에 해당하는 메시지를 찾습니다.
    fn current_locked<'a>(
        state: &'a mut QueueState,
        receipt: &Receipt,
    ) -> Result<&'a mut IngestionMessage, RelayPipelineError> {
        let msg = state.messages.get_mut(&receipt.message_id).ok_or_else(|| {
            RelayPipelineError::Queue(format!("message {} not found", receipt.message_id))
        })?;
        if msg.receive_count != receipt.receive_count || !msg.state.is_in_flight() {
            return Err(RelayPipelineError::StaleReceipt {
                message_id: receipt.message_id,
                receive_count: receipt.receive_count,
            });
        }
        Ok(msg)
    }

    fn purge_locked(&self, state: &mut QueueState, now: Instant) -> usize {
        let retention = self.settings.retention;
        let expired: Vec<u64> = state
            .messages
            .values()
            .filter(|msg| now.saturating_duration_since(msg.enqueued_instant) >= retention)
            .map(|msg| msg.envelope.id)
            .collect();

        for id in &expired {
            if let Some(msg) = state.messages.remove(id) {
                warn!(
                    message_id = id,
                    object_key = %msg.envelope.object_ref.object_key,
                    receive_count = msg.receive_count,
                    "message purged after retention period"
                );
            }
        }
        if !expired.is_empty() {
            metrics::counter!(m::QUEUE_PURGED_TOTAL).increment(expired.len() as u64);
        }
        expired.len()
    }

    /// 가시성 타임아웃이 지난 in-flight 메시지를 재전달 또는 데드레터로 보냅니다.
    fn expire_locked(&self, state: &mut QueueState, now: Instant) {
        let max_receives = self.settings.max_receives;
        let mut dead = Vec::new();

        for msg in state.messages.values_mut() {
            let expired = msg.state.is_in_flight()
                && msg.visibility_deadline.is_some_and(|deadline| deadline <= now);
            if !expired {
                continue;
            }
            msg.visibility_deadline = None;
            if msg.receive_count >= max_receives {
                msg.state = MessageState::DeadLettered;
                dead.push(msg.envelope.id);
            } else {
                msg.state = MessageState::Redelivered;
                metrics::counter!(m::QUEUE_REDELIVERED_TOTAL).increment(1);
                debug!(
                    message_id = msg.envelope.id,
                    receive_count = msg.receive_count,
                    "visibility timeout expired, message visible again"
                );
            }
        }

        for id in dead {
            if let Some(msg) = state.messages.remove(&id) {
                warn!(
                    message_id = id,
                    object_key = %msg.envelope.object_ref.object_key,
                    receive_count = msg.receive_count,
                    last_error = msg.last_error.as_deref().unwrap_or(""),
                    "message dead-lettered"
                );
                metrics::counter!(m::QUEUE_DEAD_LETTERED_TOTAL).increment(1);
                state.dead_letters.push(DeadLetterEntry {
                    original_message: msg.envelope,
                    failure_reason: format!("exceeded max receives ({max_receives})"),
                    receive_count: msg.receive_count,
                    last_error: msg.last_error,
                    dead_lettered_at: Utc::now(),
                });
            }
        }
    }

    async fn next_visibility_deadline(&self) -> Option<Instant> {
        self.state
            .lock()
            .await
            .messages
            .values()
            .filter_map(|msg| msg.visibility_deadline)
            .min()
    }

    fn stats_locked(state: &QueueState) -> QueueStats {
        let mut stats = QueueStats {
            dead_letters: state.dead_letters.len(),
            ..Default::default()
        };
        for msg in state.messages.values() {
            if msg.state.is_in_flight() {
                stats.in_flight += 1;
            } else {
                stats.visible += 1;
            }
        }
        stats
    }

    fn publish_gauges(state: &QueueState) {
        let stats = Self::stats_locked(state);
        metrics::gauge!(m::QUEUE_DEPTH).set(stats.depth() as f64);
        metrics::gauge!(m::QUEUE_DEAD_LETTER_DEPTH).set(stats.dead_letters as f64);
    }
}
