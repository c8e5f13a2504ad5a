#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`queue`]: 가시성 타임아웃/재전달/데드레터를 갖는 인제스천 큐
//! - [`notifier`]: 생성 알림 → 큐 메시지 변환, 랜딩 스토어 폴링 워처
//! - [`resolver`]: 리소스 이름 → 로그 형식 정적 맵
//! - [`parser`]: ALB, NLB, CLF, CloudFront 라인 파서
//! - [`dispatcher`]: 형식별 파싱 워커 풀
//! - [`delivery`]: 파티션별 배치, gzip NDJSON 싱크 기록
//! - [`store`]: 랜딩/싱크 오브젝트 스토어 추상화
//! - [`pipeline`]: 전체 생명주기 오케스트레이션 (Pipeline trait 구현)
//! - [`config`]: 파이프라인 설정 (core 설정 확장)
//! - [`error`]: 도메인 에러 타입
//!
//! # 아키텍처
//!
//! ```text
//! landing store -> Notifier -> IngestionQueue -> Dispatcher (W workers) -> DeliveryStream -> sink store
//!                                   |                 |                         |
//!                              dead letters    ResourceTypeMap +         {format_kind}/{yyyy}/{mm}/{dd}
//!                                              ParserRegistry            errors/{error_kind}/...
//! ```

pub mod config;
pub mod delivery;
pub mod dispatcher;
pub mod error;
pub mod notifier;
pub mod parser;
pub mod pipeline;
pub mod queue;
pub mod resolver;
pub mod store;

// --- 주요 타입 re-export ---

// 파이프라인
pub use pipeline::{LogRelay, LogRelayBuilder, RelaySnapshot};

// 설정
pub use config::{PipelineConfig, PipelineConfigBuilder};

// 에러
pub use error::RelayPipelineError;

// 큐
pub use queue::{DeadLetterEntry, IngestionQueue, MessageState, QueueSettings, QueueStats, Receipt};

// 인제스천
pub use notifier::{LandingWatcher, Notifier};

// 리졸버 / 파서
pub use parser::{AlbParser, CfParser, ClfParser, NlbParser, ParserRegistry};
pub use resolver::ResourceTypeMap;

// 디스패처
pub use dispatcher::{Dispatcher, ObjectOutcome, ObjectReport};

// 딜리버리
pub use delivery::{DeliveryStream, PartitionKey, PartitionTemplate};

// 스토어
pub use store::{FsObjectStore, MemoryObjectStore, ObjectMeta, ObjectStore};
