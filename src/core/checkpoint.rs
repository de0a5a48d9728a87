//! 检查点存储抽象
//!
//! 按线程 id 持久化 ThreadCheckpoint（状态 + 挂起标记）。
//! save 为 compare-and-swap：写入者必须基于它读到的版本写，版本不一致即 VersionConflict，
//! 新消息与新的挂起标记总是一起写入或都不写入。
//! 同一线程同一时刻至多一个写入者：try_lock 返回 ThreadGuard，不同线程互不阻塞。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};

use crate::core::error::CheckpointError;
use crate::core::state::ThreadCheckpoint;

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 读取线程检查点；不存在时返回 None
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>, CheckpointError>;

    /// 写入检查点：`checkpoint.version` 必须等于当前存储版本（新线程为 0），
    /// 成功后返回写入的新版本号（version + 1）
    async fn save(&self, checkpoint: &ThreadCheckpoint) -> Result<u64, CheckpointError>;

    /// 线程级互斥；已被占用时返回 None
    fn try_lock(&self, thread_id: &str) -> Option<ThreadGuard>;
}

/// 持有期间独占某个线程；drop 时释放
#[derive(Debug)]
pub struct ThreadGuard {
    thread_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl ThreadGuard {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }
}

/// 按 key 分片的进程内互斥表
#[derive(Debug, Default)]
pub struct ThreadLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl ThreadLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_lock(&self, thread_id: &str) -> Option<ThreadGuard> {
        let lock = {
            let mut map = match self.locks.lock() {
                Ok(m) => m,
                Err(poisoned) => poisoned.into_inner(),
            };
            // 顺带清理无人持有的锁，防止表无限增长
            map.retain(|_, l| Arc::strong_count(l) > 1);
            map.entry(thread_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.try_lock_owned().ok().map(|guard| ThreadGuard {
            thread_id: thread_id.to_string(),
            _guard: guard,
        })
    }
}

/// 版本检查：写入者基于 expected 版本写，存储中实际为 found
pub(crate) fn check_version(
    thread_id: &str,
    expected: u64,
    found: u64,
) -> Result<(), CheckpointError> {
    if expected != found {
        return Err(CheckpointError::VersionConflict {
            thread_id: thread_id.to_string(),
            expected,
            found,
        });
    }
    Ok(())
}

/// 内存检查点存储（测试与单进程场景）
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, ThreadCheckpoint>>,
    locks: ThreadLocks,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn thread_count(&self) -> usize {
        self.threads.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>, CheckpointError> {
        Ok(self.threads.read().await.get(thread_id).cloned())
    }

    async fn save(&self, checkpoint: &ThreadCheckpoint) -> Result<u64, CheckpointError> {
        let mut threads = self.threads.write().await;
        let found = threads
            .get(&checkpoint.thread_id)
            .map(|c| c.version)
            .unwrap_or(0);
        check_version(&checkpoint.thread_id, checkpoint.version, found)?;
        let mut stored = checkpoint.clone();
        stored.version = found + 1;
        stored.updated_at = Utc::now();
        threads.insert(stored.thread_id.clone(), stored);
        Ok(found + 1)
    }

    fn try_lock(&self, thread_id: &str) -> Option<ThreadGuard> {
        self.locks.try_lock(thread_id)
    }
}
