//! 파티션 경로 템플릿
//!
//! `{format_kind}/{yyyy}/{mm}/{dd}` 같은 템플릿을 렌더링하고
//! 끝에 `/{batch-id}.gz`를 붙여 싱크 오브젝트 키를 만듭니다.

use chrono::{Datelike, NaiveDate};
use uuid::Uuid;

use logrelay_core::config::PATH_PLACEHOLDERS;

use crate::error::RelayPipelineError;

/// 데이터 파티션의 레이블 자리표시자
pub const FORMAT_KIND_PLACEHOLDER: &str = "{format_kind}";
/// 에러 파티션의 레이블 자리표시자
pub const ERROR_KIND_PLACEHOLDER: &str = "{error_kind}";

/// 검증된 파티션 경로 템플릿
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionTemplate {
    template: String,
    label_placeholder: &'static str,
}

impl PartitionTemplate {
    /// 데이터 파티션 템플릿 (`{format_kind}` 필수)
    pub fn data(template: &str) -> Result<Self, RelayPipelineError> {
        Self::new(template, FORMAT_KIND_PLACEHOLDER)
    }

    /// 에러 파티션 템플릿 (`{error_kind}` 필수)
    pub fn error(template: &str) -> Result<Self, RelayPipelineError> {
        Self::new(template, ERROR_KIND_PLACEHOLDER)
    }

    fn new(template: &str, label_placeholder: &'static str) -> Result<Self, RelayPipelineError> {
        let template = template.trim_matches('/');
        for required in std::iter::once(label_placeholder).chain(PATH_PLACEHOLDERS) {
            if !template.contains(required) {
                return Err(RelayPipelineError::Config {
                    field: "path_template".to_owned(),
                    reason: format!("'{template}' must contain {required}"),
                });
            }
        }
        Ok(Self {
            template: template.to_owned(),
            label_placeholder,
        })
    }

    /// 원본 템플릿 문자열
    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// 파티션 디렉토리 부분만 렌더링합니다.
    pub fn render_prefix(&self, label: &str, day: NaiveDate) -> String {
        self.template
            .replace(self.label_placeholder, label)
            .replace("{yyyy}", &format!("{:04}", day.year()))
            .replace("{mm}", &format!("{:02}", day.month()))
            .replace("{dd}", &format!("{:02}", day.day()))
    }

    /// 배치 오브젝트 키를 렌더링합니다.
    pub fn render(&self, label: &str, day: NaiveDate, batch_id: Uuid) -> String {
        format!("{}/{batch_id}.gz", self.render_prefix(label, day))
    }
}
