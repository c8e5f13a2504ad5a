#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ParseError, PipelineError, RelayError, StorageError};

// 설정
pub use config::RelayConfig;

// 이벤트
pub use event::CreationEvent;

// 파이프라인 trait
pub use pipeline::{HealthStatus, LineParser, ParsedLine, Pipeline};

// 도메인 타입
pub use types::{ErrorKind, FormatKind, ParsedRecord, RawLogObject};
