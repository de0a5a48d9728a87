//! 错误类型
//!
//! AgentError 是 start_turn / resume_turn 返回给宿主的类型化失败；
//! 工具失败（ToolError）不在其中，由执行器转成 tool 消息交还给模型。

use thiserror::Error;

use crate::llm::LlmError;

/// 中止当前步骤序列、返回给宿主的错误；线程最后一次持久化的检查点保持不变
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Model protocol error: {0}")]
    ModelProtocolError(String),

    #[error("No pending review for thread {0}")]
    NoPendingReview(String),

    #[error("Thread {0} is awaiting review; resume it before starting a new turn")]
    ReviewPending(String),

    #[error("Thread {0} already has an operation in flight")]
    ThreadBusy(String),

    #[error("Malformed disposition: {0}")]
    MalformedDisposition(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] CheckpointError),

    #[error("Step limit exceeded ({0} model calls in one turn)")]
    StepLimitExceeded(usize),

    #[error("Invalid conversation state: {0}")]
    InvalidState(#[from] StateError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Protocol(msg) => AgentError::ModelProtocolError(msg),
            other => AgentError::ModelUnavailable(other.to_string()),
        }
    }
}

/// CheckpointStore 的错误
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// 写入时发现存储中的版本已被他人推进
    #[error("Version conflict on thread {thread_id}: expected {expected}, found {found}")]
    VersionConflict {
        thread_id: String,
        expected: u64,
        found: u64,
    },

    #[error("Backend error: {0}")]
    Backend(String),
}

/// 违反 ConversationState 不变量的追加或改写
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StateError {
    #[error("tool message references unknown tool_call_id {0}")]
    UnknownToolCall(String),

    #[error("tool_call_id {0} already has a result")]
    DuplicateToolResult(String),

    #[error("an assistant message with unresolved tool calls is still outstanding")]
    OutstandingToolCalls,

    #[error("tool_call_id {0} was already used by an earlier assistant message")]
    DuplicateToolCallId(String),

    #[error("message {0} not found or not an assistant message")]
    MessageNotFound(String),

    #[error("tool call {0} not found in message")]
    ToolCallNotFound(String),
}

/// 单次工具调用失败；由执行器渲染成 `Error: ...` 内容，不会中止回合
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),
}
