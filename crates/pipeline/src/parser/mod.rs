//! 형식별 라인 파서
//!
//! 각 파서는 core의 [`LineParser`] trait을 구현하며 상태를 갖지 않습니다.
//! [`ParserRegistry`]는 [`FormatKind`]로 파서를 찾아 디스패처 워커들이 공유합니다.
//!
//! # 지원 형식
//! - Application Load Balancer ([`AlbParser`])
//! - Network Load Balancer ([`NlbParser`])
//! - Apache Common/Combined Log Format ([`ClfParser`])
//! - CloudFront 표준 로그 ([`CfParser`])

pub mod alb;
pub mod cf;
pub mod clf;
pub mod fields;
pub mod nlb;

pub use alb::AlbParser;
pub use cf::CfParser;
pub use clf::ClfParser;
pub use nlb::NlbParser;

use std::collections::HashMap;

use logrelay_core::pipeline::LineParser;
use logrelay_core::types::FormatKind;

use crate::error::RelayPipelineError;

/// 형식 → 파서 레지스트리
pub struct ParserRegistry {
    parsers: HashMap<FormatKind, Box<dyn LineParser>>,
}

impl ParserRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            parsers: HashMap::new(),
        }
    }

    /// 지원하는 모든 형식의 파서를 등록한 레지스트리를 생성합니다.
    pub fn with_defaults() -> Result<Self, RelayPipelineError> {
        let clf = ClfParser::new().map_err(|e| RelayPipelineError::Config {
            field: "parser.clf".to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Self::new()
            .register(Box::new(AlbParser))
            .register(Box::new(NlbParser))
            .register(Box::new(clf))
            .register(Box::new(CfParser)))
    }

    /// 파서를 등록합니다. 같은 형식의 기존 파서는 교체됩니다.
    pub fn register(mut self, parser: Box<dyn LineParser>) -> Self {
        self.parsers.insert(parser.format(), parser);
        self
    }

    /// 형식에 맞는 파서를 찾습니다.
    pub fn get(&self, format: FormatKind) -> Option<&dyn LineParser> {
        self.parsers.get(&format).map(|p| p.as_ref())
    }

    /// 등록된 파서 수
    pub fn len(&self) -> usize {
        self.parsers.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.parsers.is_empty()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}
