//! 线程状态：ConversationState 与 ThreadCheckpoint
//!
//! ConversationState 是只追加的消息序列（插入顺序即对话顺序，也就是给模型的 prompt）；
//! 唯一的非追加操作是 update 审阅时替换 assistant 消息中的一个 ToolCall。
//! ThreadCheckpoint 在此之上加版本号与挂起标记，是 CheckpointStore 持久化的单位。

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::error::StateError;
use crate::memory::{Message, MessageKind, ToolCall};

/// 单线程对话历史
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// 追加一条消息，检查：
    /// - tool 消息必须引用之前 assistant 发出的 tool_call_id，且该 id 尚无结果
    /// - 存在未解决调用时不能再追加带调用的 assistant 消息
    /// - 新 assistant 消息的调用 id 不能与历史中已发出的 id 重复
    pub fn push(&mut self, msg: Message) -> Result<(), StateError> {
        match &msg.kind {
            MessageKind::Tool { tool_call_id, .. } => {
                if !self.emitted_call_ids().contains(tool_call_id.as_str()) {
                    return Err(StateError::UnknownToolCall(tool_call_id.clone()));
                }
                if self.resolved_call_ids().contains(tool_call_id.as_str()) {
                    return Err(StateError::DuplicateToolResult(tool_call_id.clone()));
                }
            }
            MessageKind::Assistant { tool_calls } if !tool_calls.is_empty() => {
                if !self.is_clean() {
                    return Err(StateError::OutstandingToolCalls);
                }
                let emitted = self.emitted_call_ids();
                if let Some(reused) = tool_calls.iter().find(|c| emitted.contains(c.id.as_str())) {
                    return Err(StateError::DuplicateToolCallId(reused.id.clone()));
                }
            }
            _ => {}
        }
        self.messages.push(msg);
        Ok(())
    }

    pub fn extend(&mut self, msgs: impl IntoIterator<Item = Message>) -> Result<(), StateError> {
        for m in msgs {
            self.push(m)?;
        }
        Ok(())
    }

    fn emitted_call_ids(&self) -> HashSet<&str> {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls().iter().map(|c| c.id.as_str()))
            .collect()
    }

    fn resolved_call_ids(&self) -> HashSet<&str> {
        self.messages.iter().filter_map(|m| m.tool_call_id()).collect()
    }

    /// 最近一条带调用且仍有未解决调用的 assistant 消息
    pub fn outstanding(&self) -> Option<&Message> {
        let resolved = self.resolved_call_ids();
        self.messages.iter().rev().find(|m| {
            m.tool_calls()
                .iter()
                .any(|c| !resolved.contains(c.id.as_str()))
        })
    }

    /// 未解决调用（按所属消息内的顺序）
    pub fn unresolved_calls(&self) -> Vec<ToolCall> {
        let resolved = self.resolved_call_ids();
        self.outstanding()
            .map(|m| {
                m.tool_calls()
                    .iter()
                    .filter(|c| !resolved.contains(c.id.as_str()))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 没有未解决的工具调用，可以进行新的模型调用
    pub fn is_clean(&self) -> bool {
        self.outstanding().is_none()
    }

    /// 查找某个调用
    pub fn find_call(&self, call_id: &str) -> Option<(&Message, &ToolCall)> {
        self.messages.iter().rev().find_map(|m| {
            m.tool_calls()
                .iter()
                .find(|c| c.id == call_id)
                .map(|c| (m, c))
        })
    }

    /// 是否已有该调用的结果
    pub fn has_result(&self, call_id: &str) -> bool {
        self.messages
            .iter()
            .any(|m| m.tool_call_id() == Some(call_id))
    }

    /// 在原 assistant 消息中用新的 ToolCall 替换同 id 的旧调用，其余历史不变
    pub fn replace_tool_call(&mut self, message_id: &str, call: ToolCall) -> Result<(), StateError> {
        let msg = self
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| StateError::MessageNotFound(message_id.to_string()))?;
        let MessageKind::Assistant { tool_calls } = &mut msg.kind else {
            return Err(StateError::MessageNotFound(message_id.to_string()));
        };
        let slot = tool_calls
            .iter_mut()
            .find(|c| c.id == call.id)
            .ok_or_else(|| StateError::ToolCallNotFound(call.id.clone()))?;
        *slot = call;
        Ok(())
    }
}

/// 机器停靠的位置
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParkedStep {
    AwaitingReview,
}

/// 挂起标记：停靠的步骤与提供给审阅者的载荷（调用本身已在 ConversationState 中）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SuspensionMarker {
    pub step: ParkedStep,
    /// 发起调用的 assistant 消息
    pub message_id: String,
    pub tool_call_id: String,
    pub question: String,
    pub suspended_at: DateTime<Utc>,
}

/// 持久化单位：线程 id + 版本 + 状态 + 挂起标记
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadCheckpoint {
    pub thread_id: String,
    /// 新线程为 0，每次成功 save 后 +1
    pub version: u64,
    pub state: ConversationState,
    pub suspension: Option<SuspensionMarker>,
    /// 当前回合（最近一次 start_turn 以来，跨越挂起与恢复）已发生的模型调用次数
    #[serde(default)]
    pub turn_steps: usize,
    pub updated_at: DateTime<Utc>,
}

impl ThreadCheckpoint {
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            version: 0,
            state: ConversationState::new(),
            suspension: None,
            turn_steps: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map, Value};

    fn call(id: &str) -> ToolCall {
        let args: Map<String, Value> = json!({"expression": "1+1"}).as_object().cloned().unwrap();
        ToolCall::new(id, "calculator", args)
    }

    #[test]
    fn test_clean_after_all_calls_resolved() {
        let mut state = ConversationState::new();
        state.push(Message::user("hi")).unwrap();
        assert!(state.is_clean());

        let a = call("a");
        let b = call("b");
        state
            .push(Message::assistant_with_calls("", vec![a.clone(), b.clone()]))
            .unwrap();
        assert!(!state.is_clean());
        assert_eq!(state.unresolved_calls().len(), 2);

        state.push(Message::tool(&a, "2.0")).unwrap();
        assert_eq!(state.unresolved_calls(), vec![b.clone()]);

        state.push(Message::tool(&b, "2.0")).unwrap();
        assert!(state.is_clean());
    }

    #[test]
    fn test_rejects_tool_message_for_unknown_call() {
        let mut state = ConversationState::new();
        let err = state.push(Message::tool(&call("x"), "1")).unwrap_err();
        assert_eq!(err, StateError::UnknownToolCall("x".into()));
        assert!(state.is_empty());
    }

    #[test]
    fn test_rejects_duplicate_tool_result() {
        let mut state = ConversationState::new();
        let a = call("a");
        state
            .push(Message::assistant_with_calls("", vec![a.clone()]))
            .unwrap();
        state.push(Message::tool(&a, "2.0")).unwrap();
        let err = state.push(Message::tool(&a, "2.0")).unwrap_err();
        assert_eq!(err, StateError::DuplicateToolResult("a".into()));
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_rejects_second_outstanding_assistant() {
        let mut state = ConversationState::new();
        state
            .push(Message::assistant_with_calls("", vec![call("a")]))
            .unwrap();
        let err = state
            .push(Message::assistant_with_calls("", vec![call("b")]))
            .unwrap_err();
        assert_eq!(err, StateError::OutstandingToolCalls);
    }

    #[test]
    fn test_rejects_call_id_reused_from_earlier_turn() {
        let mut state = ConversationState::new();
        let a = call("call_0");
        state
            .push(Message::assistant_with_calls("", vec![a.clone()]))
            .unwrap();
        state.push(Message::tool(&a, "2.0")).unwrap();
        state.push(Message::user("again")).unwrap();

        let err = state
            .push(Message::assistant_with_calls("", vec![call("call_0")]))
            .unwrap_err();
        assert_eq!(err, StateError::DuplicateToolCallId("call_0".into()));
        assert_eq!(state.len(), 3);
        assert!(state.is_clean());
    }

    #[test]
    fn test_replace_tool_call_in_place() {
        let mut state = ConversationState::new();
        let msg = Message::assistant_with_calls("thinking", vec![call("a"), call("b")]);
        let msg_id = msg.id.clone();
        state.push(msg).unwrap();

        let new_args = json!({"expression": "3+3"}).as_object().cloned().unwrap();
        let updated = call("b").with_args(new_args);
        state.replace_tool_call(&msg_id, updated).unwrap();

        assert_eq!(state.len(), 1);
        let calls = state.messages()[0].tool_calls();
        assert_eq!(calls[0].args["expression"], "1+1");
        assert_eq!(calls[1].args["expression"], "3+3");
        assert_eq!(state.messages()[0].id, msg_id);
        assert_eq!(state.messages()[0].content, "thinking");
    }

    #[test]
    fn test_replace_unknown_call_fails() {
        let mut state = ConversationState::new();
        let msg = Message::assistant_with_calls("", vec![call("a")]);
        let msg_id = msg.id.clone();
        state.push(msg).unwrap();
        let err = state.replace_tool_call(&msg_id, call("zzz")).unwrap_err();
        assert_eq!(err, StateError::ToolCallNotFound("zzz".into()));
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let mut cp = ThreadCheckpoint::new("t1");
        cp.state.push(Message::user("hello")).unwrap();
        let s = serde_json::to_string(&cp).unwrap();
        let back: ThreadCheckpoint = serde_json::from_str(&s).unwrap();
        assert_eq!(back, cp);
        assert!(!back.is_suspended());
    }
}
