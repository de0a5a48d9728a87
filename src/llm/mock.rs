//! 脚本化 Mock LLM 客户端（用于测试与离线演示，无需 API）
//!
//! 按顺序返回预先排队的回复，并记录每次调用看到的完整历史与工具目录，便于断言模型输入。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, ToolCall};
use crate::tools::ToolSpec;

/// 一次调用的记录
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub tool_names: Vec<String>,
}

/// 脚本化客户端：回复队列耗尽后返回 Protocol 错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<Message, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加一条纯文本回复
    pub fn reply_text(self, content: &str) -> Self {
        self.push(Ok(Message::assistant(content)))
    }

    /// 追加一条带单个工具调用的回复
    pub fn reply_tool_call(self, id: &str, name: &str, args: Value) -> Self {
        let args: Map<String, Value> = args.as_object().cloned().unwrap_or_default();
        self.push(Ok(Message::assistant_with_calls(
            "",
            vec![ToolCall::new(id, name, args)],
        )))
    }

    /// 追加一条带多个工具调用的回复
    pub fn reply_tool_calls(self, calls: Vec<ToolCall>) -> Self {
        self.push(Ok(Message::assistant_with_calls("", calls)))
    }

    /// 追加一次失败
    pub fn reply_error(self, err: LlmError) -> Self {
        self.push(Err(err))
    }

    fn push(self, reply: Result<Message, LlmError>) -> Self {
        self.lock_replies().push_back(reply);
        self
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Message, LlmError>>> {
        match self.replies.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 已发生的调用记录
    pub fn calls(&self) -> Vec<RecordedCall> {
        match self.calls.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls().len()
    }

    pub fn remaining(&self) -> usize {
        self.lock_replies().len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        {
            let mut calls = match self.calls.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            calls.push(RecordedCall {
                messages: messages.to_vec(),
                tool_names: tools.iter().map(|t| t.name.clone()).collect(),
            });
        }
        self.lock_replies()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Protocol("scripted replies exhausted".to_string())))
    }
}
