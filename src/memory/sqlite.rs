//! SQLite 检查点存储
//!
//! 单表 `thread_checkpoints`，状态与挂起标记以 JSON 列存储；
//! 写入用 `UPDATE ... WHERE version = ?` 实现 compare-and-swap，多进程共享同一数据库文件也安全。

#![cfg(feature = "async-sqlite")]

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::core::checkpoint::{CheckpointStore, ThreadGuard, ThreadLocks};
use crate::core::{CheckpointError, ThreadCheckpoint};

fn backend(e: sqlx::Error) -> CheckpointError {
    CheckpointError::Backend(e.to_string())
}

/// 基于 sqlx 连接池的检查点存储
pub struct SqliteCheckpointStore {
    pool: sqlx::sqlite::SqlitePool,
    locks: ThreadLocks,
}

impl SqliteCheckpointStore {
    /// 打开（必要时创建）数据库并建表
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await
            .map_err(backend)?;

        let store = Self {
            pool,
            locks: ThreadLocks::new(),
        };
        store.init_tables().await?;
        Ok(store)
    }

    async fn init_tables(&self) -> Result<(), CheckpointError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS thread_checkpoints (
                thread_id TEXT PRIMARY KEY,
                version INTEGER NOT NULL,
                state TEXT NOT NULL,
                suspension TEXT,
                turn_steps INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn current_version(&self, thread_id: &str) -> Result<u64, CheckpointError> {
        let row = sqlx::query("SELECT version FROM thread_checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        Ok(row.map(|r| r.get::<i64, _>("version") as u64).unwrap_or(0))
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn load(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>, CheckpointError> {
        let row = sqlx::query(
            "SELECT version, state, suspension, turn_steps, updated_at FROM thread_checkpoints WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let version: i64 = row.get("version");
        let state: String = row.get("state");
        let suspension: Option<String> = row.get("suspension");
        let turn_steps: i64 = row.get("turn_steps");
        let updated_at: String = row.get("updated_at");

        Ok(Some(ThreadCheckpoint {
            thread_id: thread_id.to_string(),
            version: version as u64,
            state: serde_json::from_str(&state)?,
            suspension: suspension.map(|s| serde_json::from_str(&s)).transpose()?,
            turn_steps: turn_steps as usize,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    async fn save(&self, checkpoint: &ThreadCheckpoint) -> Result<u64, CheckpointError> {
        let state = serde_json::to_string(&checkpoint.state)?;
        let suspension = checkpoint
            .suspension
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let now = Utc::now().to_rfc3339();
        let next = checkpoint.version + 1;

        let result = if checkpoint.version == 0 {
            sqlx::query(
                "INSERT OR IGNORE INTO thread_checkpoints (thread_id, version, state, suspension, turn_steps, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&checkpoint.thread_id)
            .bind(next as i64)
            .bind(&state)
            .bind(&suspension)
            .bind(checkpoint.turn_steps as i64)
            .bind(&now)
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                "UPDATE thread_checkpoints SET version = ?, state = ?, suspension = ?, turn_steps = ?, updated_at = ?
                 WHERE thread_id = ? AND version = ?",
            )
            .bind(next as i64)
            .bind(&state)
            .bind(&suspension)
            .bind(checkpoint.turn_steps as i64)
            .bind(&now)
            .bind(&checkpoint.thread_id)
            .bind(checkpoint.version as i64)
            .execute(&self.pool)
            .await
        };
        let result = result.map_err(backend)?;

        if result.rows_affected() == 0 {
            let found = self.current_version(&checkpoint.thread_id).await?;
            return Err(CheckpointError::VersionConflict {
                thread_id: checkpoint.thread_id.clone(),
                expected: checkpoint.version,
                found,
            });
        }
        Ok(next)
    }

    fn try_lock(&self, thread_id: &str) -> Option<ThreadGuard> {
        self.locks.try_lock(thread_id)
    }
}
