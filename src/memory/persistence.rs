//! 文件检查点存储
//!
//! 每个线程一个 JSON 文件（`<root>/<thread>.json`），写入先落临时文件再 rename，
//! 保证读者只看到完整的旧检查点或完整的新检查点，可跨进程重启恢复。
//! 版本检查与 rename 之间持有独占创建的锁文件（`<thread>.json.lock`），
//! 共享同一目录的多个进程之间版本比较同样有效；崩溃遗留的锁超过时限后视为失效。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::core::checkpoint::{check_version, CheckpointStore, ThreadGuard, ThreadLocks};
use crate::core::{CheckpointError, ThreadCheckpoint};

/// 目录下按线程分文件的检查点存储
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    locks: ThreadLocks,
    stale_lock_after: Duration,
}

/// 锁文件存在超过该时长视为持有者已崩溃
const DEFAULT_STALE_LOCK: Duration = Duration::from_secs(30);

impl FileCheckpointStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            locks: ThreadLocks::new(),
            stale_lock_after: DEFAULT_STALE_LOCK,
        }
    }

    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", encode_file_stem(thread_id)))
    }

    async fn read(&self, path: &Path) -> Result<Option<ThreadCheckpoint>, CheckpointError> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 独占创建锁文件；已存在且未过期时返回 Backend 错误
    async fn acquire_write_lock(&self, path: &Path) -> Result<PathBuf, CheckpointError> {
        let lock = path.with_extension("json.lock");
        for _ in 0..2 {
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock)
                .await
            {
                Ok(_) => return Ok(lock),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if !self.is_stale(&lock).await {
                        break;
                    }
                    tracing::warn!(lock = %lock.display(), "removing stale checkpoint lock");
                    match tokio::fs::remove_file(&lock).await {
                        Ok(()) => {}
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(CheckpointError::Backend(format!(
            "{} is held by another writer",
            lock.display()
        )))
    }

    async fn is_stale(&self, lock: &Path) -> bool {
        match tokio::fs::metadata(lock).await.and_then(|m| m.modified()) {
            Ok(modified) => modified
                .elapsed()
                .map(|age| age >= self.stale_lock_after)
                .unwrap_or(false),
            // 刚被持有者删除，下一轮重试即可
            Err(e) => e.kind() == ErrorKind::NotFound,
        }
    }

    async fn write_checked(
        &self,
        checkpoint: &ThreadCheckpoint,
        path: &Path,
    ) -> Result<u64, CheckpointError> {
        let found = self.read(path).await?.map(|c| c.version).unwrap_or(0);
        check_version(&checkpoint.thread_id, checkpoint.version, found)?;

        let mut stored = checkpoint.clone();
        stored.version = found + 1;
        stored.updated_at = Utc::now();
        let data = serde_json::to_string_pretty(&stored)?;

        let tmp = path.with_extension(format!("json.{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tracing::debug!(thread_id = %stored.thread_id, version = stored.version, "checkpoint written");
        Ok(stored.version)
    }
}

/// 线程 id 转为安全文件名：字母数字、`-`、`_` 原样保留，其余字节写成 `%XX`
fn encode_file_stem(thread_id: &str) -> String {
    let mut out = String::with_capacity(thread_id.len());
    for b in thread_id.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>, CheckpointError> {
        self.read(&self.path_for(thread_id)).await
    }

    async fn save(&self, checkpoint: &ThreadCheckpoint) -> Result<u64, CheckpointError> {
        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.path_for(&checkpoint.thread_id);
        let lock = self.acquire_write_lock(&path).await?;
        let result = self.write_checked(checkpoint, &path).await;
        if let Err(e) = tokio::fs::remove_file(&lock).await {
            tracing::warn!(lock = %lock.display(), error = %e, "failed to release checkpoint lock");
        }
        result
    }

    fn try_lock(&self, thread_id: &str) -> Option<ThreadGuard> {
        self.locks.try_lock(thread_id)
    }
}
