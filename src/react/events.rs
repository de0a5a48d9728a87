//! 回合事件：start_turn / resume_turn 的流按顺序产出的内容

use serde::Serialize;

use crate::core::review::ReviewRequest;
use crate::memory::Message;

/// 单个回合事件（可序列化为 JSON 供宿主展示）
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// 已持久化的新消息（assistant 回复或 tool 结果）
    Message(Message),
    /// 线程已挂起，等待审阅；之后流结束
    Review(ReviewRequest),
}

impl TurnEvent {
    pub fn as_message(&self) -> Option<&Message> {
        match self {
            TurnEvent::Message(m) => Some(m),
            TurnEvent::Review(_) => None,
        }
    }

    pub fn as_review(&self) -> Option<&ReviewRequest> {
        match self {
            TurnEvent::Review(r) => Some(r),
            TurnEvent::Message(_) => None,
        }
    }

    pub fn is_review(&self) -> bool {
        matches!(self, TurnEvent::Review(_))
    }
}
