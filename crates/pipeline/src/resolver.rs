//! 리소스 타입 리졸버
//!
//! [`ResourceTypeMap`]은 시작 시 한 번 만들어지는 `resource_name → format`
//! 정적 매핑입니다. 생성 후에는 변경되지 않으며 `Arc`로 워커들과 공유합니다.

use std::collections::HashMap;

use logrelay_core::config::ResourceEntry;
use logrelay_core::types::FormatKind;

use crate::error::RelayPipelineError;

/// 리소스 이름 → 형식 정적 맵
#[derive(Debug, Clone, Default)]
pub struct ResourceTypeMap {
    /// 설정에 적힌 순서
    entries: Vec<ResourceEntry>,
    index: HashMap<String, FormatKind>,
}

impl ResourceTypeMap {
    /// 리소스 목록으로 맵을 만듭니다. 이름이 중복되면 에러입니다.
    pub fn from_entries(entries: &[ResourceEntry]) -> Result<Self, RelayPipelineError> {
        let mut index = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.name.trim().is_empty() {
                return Err(RelayPipelineError::Config {
                    field: "resources.name".to_owned(),
                    reason: "must not be empty".to_owned(),
                });
            }
            if index.insert(entry.name.clone(), entry.kind).is_some() {
                return Err(RelayPipelineError::Config {
                    field: "resources.name".to_owned(),
                    reason: format!("duplicate resource '{}'", entry.name),
                });
            }
        }
        Ok(Self {
            entries: entries.to_vec(),
            index,
        })
    }

    /// 리소스 이름의 형식을 조회합니다.
    ///
    /// 맵에 없으면 [`RelayPipelineError::FormatUnknown`]을 반환합니다.
    pub fn resolve(&self, resource_name: &str) -> Result<FormatKind, RelayPipelineError> {
        self.index
            .get(resource_name)
            .copied()
            .ok_or_else(|| RelayPipelineError::FormatUnknown {
                resource: resource_name.to_owned(),
            })
    }

    /// 등록된 리소스 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 설정 순서대로 엔트리를 순회합니다.
    pub fn entries(&self) -> impl Iterator<Item = &ResourceEntry> {
        self.entries.iter()
    }
}
