//! LLM 客户端抽象
//!
//! 模型能力：给定消息历史与工具目录，返回下一条 assistant 消息（可含零或多个工具调用）。
//! 工具目录为空时即普通文本生成。

use async_trait::async_trait;
use thiserror::Error;

use crate::memory::Message;
use crate::tools::ToolSpec;

/// 模型后端错误
#[derive(Error, Debug)]
pub enum LlmError {
    /// 后端不可达（连接失败、5xx 等）
    #[error("LLM backend unavailable: {0}")]
    Unavailable(String),

    #[error("LLM request timed out")]
    Timeout,

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// 返回内容无法解析（缺字段、参数不是 JSON 对象等）
    #[error("Malformed LLM response: {0}")]
    Protocol(String),
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 基于完整历史生成下一条 assistant 消息
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError>;

    /// 后端存活探测；默认认为可用
    async fn health(&self) -> bool {
        true
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
