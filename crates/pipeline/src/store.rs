//! 오브젝트 스토어 추상화
//!
//! 랜딩 스토어(원본 로그)와 싱크(압축 배치)는 모두 [`ObjectStore`] trait 뒤에
//! 있습니다. 운영 환경은 [`FsObjectStore`], 테스트와 임베딩은
//! [`MemoryObjectStore`]를 사용합니다.
//!
//! ```text
//!   ┌────────────┐        ┌────────────┐
//!   │ Dispatcher │        │  Delivery  │
//!   └─────┬──────┘        └─────┬──────┘
//!         │ get                 │ put
//!         ▼                     ▼
//!   ┌─────────────┐      ┌─────────────┐
//!   │ ObjectStore │      │ ObjectStore │  (trait)
//!   └─────────────┘      └─────────────┘
//!      │       │
//!      ▼       ▼
//!     Fs    Memory
//! ```

use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use logrelay_core::error::StorageError;

/// 임시 파일 접미어 (원자적 쓰기 중인 파일은 목록에서 제외)
const TMP_MARKER: &str = ".tmp-";

/// 오브젝트 메타데이터
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// 스토어 내 키 (`/` 구분)
    pub key: String,
    /// 크기 (바이트)
    pub size: u64,
    /// 마지막 수정 시각
    pub modified: DateTime<Utc>,
}

/// 오브젝트 스토어 trait
///
/// `put`은 all-or-nothing이어야 합니다. 실패한 쓰기가 일부만 기록된
/// 오브젝트를 남기면 안 됩니다.
pub trait ObjectStore: Send + Sync + 'static {
    /// 오브젝트 전체를 읽습니다.
    fn get(&self, key: &str) -> impl Future<Output = Result<Bytes, StorageError>> + Send;

    /// 오브젝트를 원자적으로 기록합니다.
    fn put(&self, key: &str, body: Bytes) -> impl Future<Output = Result<(), StorageError>> + Send;

    /// 모든 오브젝트를 키 순서로 나열합니다.
    fn list(&self) -> impl Future<Output = Result<Vec<ObjectMeta>, StorageError>> + Send;
}

/// 키가 스토어 루트를 벗어나지 않는지 검증합니다.
fn validate_key(key: &str) -> Result<(), StorageError> {
    let rejected = |reason: &str| StorageError::Rejected {
        key: key.to_owned(),
        reason: reason.to_owned(),
    };
    if key.is_empty() {
        return Err(rejected("empty key"));
    }
    let path = Path::new(key);
    if path.is_absolute() {
        return Err(rejected("absolute key"));
    }
    if path.components().any(|c| !matches!(c, Component::Normal(_))) {
        return Err(rejected("key must not contain '.' or '..' segments"));
    }
    Ok(())
}

// ─── FsObjectStore ───────────────────────────────────────────────────

/// 파일시스템 기반 오브젝트 스토어
///
/// 키는 루트 디렉토리 아래 상대 경로로 매핑됩니다. 쓰기는 임시 파일에
/// 기록한 뒤 rename 하므로 독자는 완성된 파일만 봅니다.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// 루트 디렉토리를 지정해 스토어를 생성합니다.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 루트 디렉토리
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn map_io(key: &str, e: std::io::Error) -> StorageError {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(key.to_owned())
        } else {
            StorageError::Unavailable(format!("{key}: {e}"))
        }
    }
}

impl ObjectStore for FsObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        validate_key(key)?;
        let data = tokio::fs::read(self.root.join(key))
            .await
            .map_err(|e| Self::map_io(key, e))?;
        Ok(Bytes::from(data))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        validate_key(key)?;
        let path = self.root.join(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Self::map_io(key, e))?;
        }

        let tmp = path.with_file_name(format!(
            "{}{}{}",
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            TMP_MARKER,
            uuid::Uuid::new_v4().simple()
        ));
        if let Err(e) = tokio::fs::write(&tmp, &body).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::map_io(key, e));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::map_io(key, e));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectMeta>, StorageError> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound && dir == self.root => {
                    return Ok(objects);
                }
                Err(e) => return Err(StorageError::Unavailable(format!("{}: {e}", dir.display()))),
            };

            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| StorageError::Unavailable(e.to_string()))?
            {
                let meta = entry
                    .metadata()
                    .await
                    .map_err(|e| StorageError::Unavailable(e.to_string()))?;
                let path = entry.path();
                if meta.is_dir() {
                    pending.push(path);
                    continue;
                }

                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.contains(TMP_MARKER) {
                    continue;
                }
                let modified = meta
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                objects.push(ObjectMeta {
                    key,
                    size: meta.len(),
                    modified,
                });
            }
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }
}

// ─── MemoryObjectStore ───────────────────────────────────────────────

#[derive(Debug, Default)]
struct MemoryInner {
    objects: Mutex<BTreeMap<String, (Bytes, DateTime<Utc>)>>,
    rejected_prefixes: Mutex<Vec<String>>,
    fail_next_puts: AtomicU32,
    gets: AtomicU64,
    puts: AtomicU64,
}

/// 인메모리 오브젝트 스토어
///
/// 복제본은 같은 저장소를 공유합니다. 장애 주입 기능이 있어
/// 재시도와 에러 파티션 경로를 검증할 수 있습니다.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<MemoryInner>,
}

impl MemoryObjectStore {
    /// 빈 스토어를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 오브젝트를 직접 기록합니다 (장애 주입 무시).
    pub async fn insert(&self, key: impl Into<String>, body: impl Into<Bytes>) {
        self.inner
            .objects
            .lock()
            .await
            .insert(key.into(), (body.into(), Utc::now()));
    }

    /// 저장된 오브젝트를 조회합니다 (카운터에 반영되지 않음).
    pub async fn object(&self, key: &str) -> Option<Bytes> {
        self.inner
            .objects
            .lock()
            .await
            .get(key)
            .map(|(body, _)| body.clone())
    }

    /// 저장된 모든 키
    pub async fn keys(&self) -> Vec<String> {
        self.inner.objects.lock().await.keys().cloned().collect()
    }

    /// 다음 `n`번의 `put`을 일시 장애로 실패시킵니다.
    pub fn fail_next_puts(&self, n: u32) {
        self.inner.fail_next_puts.store(n, Ordering::SeqCst);
    }

    /// 해당 접두어로 시작하는 키의 `put`을 항상 거부합니다.
    pub async fn reject_prefix(&self, prefix: impl Into<String>) {
        self.inner.rejected_prefixes.lock().await.push(prefix.into());
    }

    /// 거부 규칙을 모두 제거합니다.
    pub async fn clear_rejections(&self) {
        self.inner.rejected_prefixes.lock().await.clear();
        self.inner.fail_next_puts.store(0, Ordering::SeqCst);
    }

    /// 지금까지의 `get` 호출 수
    pub fn get_count(&self) -> u64 {
        self.inner.gets.load(Ordering::Relaxed)
    }

    /// 지금까지의 `put` 호출 수 (실패 포함)
    pub fn put_count(&self) -> u64 {
        self.inner.puts.load(Ordering::Relaxed)
    }
}

impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        self.inner.gets.fetch_add(1, Ordering::Relaxed);
        self.object(key)
            .await
            .ok_or_else(|| StorageError::NotFound(key.to_owned()))
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<(), StorageError> {
        self.inner.puts.fetch_add(1, Ordering::Relaxed);
        validate_key(key)?;

        let injected = self
            .inner
            .fail_next_puts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Unavailable(format!("injected failure for {key}")));
        }

        let rejected = self
            .inner
            .rejected_prefixes
            .lock()
            .await
            .iter()
            .any(|p| key.starts_with(p.as_str()));
        if rejected {
            return Err(StorageError::Rejected {
                key: key.to_owned(),
                reason: "prefix rejected".to_owned(),
            });
        }

        self.insert(key, body).await;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ObjectMeta>, StorageError> {
        Ok(self
            .inner
            .objects
            .lock()
            .await
            .iter()
            .map(|(key, (body, modified))| ObjectMeta {
                key: key.clone(),
                size: body.len() as u64,
                modified: *modified,
            })
            .collect())
    }
}
