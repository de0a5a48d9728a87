//! 模型调用步骤
//!
//! 把完整历史与工具目录交给 LlmClient，返回一条 assistant 消息。
//! 调用有整体超时；后端失败映射为 ModelUnavailable，回复不合约定映射为 ModelProtocolError。
//! 本步骤不写入任何状态，调用方确认回复合法后才追加并持久化。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::{Message, MessageKind, ToolCall};
use crate::tools::ToolSpec;

pub struct ModelCaller {
    llm: Arc<dyn LlmClient>,
    system_prompt: Option<String>,
    timeout: Duration,
}

impl ModelCaller {
    pub fn new(llm: Arc<dyn LlmClient>, timeout_secs: u64) -> Self {
        Self {
            llm,
            system_prompt: None,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// 历史中没有 system 消息时在 prompt 前补一条（不写入线程状态）
    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt.filter(|p| !p.trim().is_empty());
        self
    }

    pub fn llm(&self) -> &Arc<dyn LlmClient> {
        &self.llm
    }

    pub async fn health(&self) -> bool {
        self.llm.health().await
    }

    /// 基于完整历史生成下一条 assistant 消息
    pub async fn generate(
        &self,
        history: &[Message],
        catalog: &[ToolSpec],
    ) -> Result<Message, AgentError> {
        let prompt: Vec<Message>;
        let messages = match &self.system_prompt {
            Some(sp) if !matches!(history.first().map(|m| &m.kind), Some(MessageKind::System)) => {
                prompt = std::iter::once(Message::system(sp.clone()))
                    .chain(history.iter().cloned())
                    .collect();
                &prompt[..]
            }
            _ => history,
        };

        let start = Instant::now();
        let mut reply = match timeout(self.timeout, self.llm.complete(messages, catalog)).await {
            Ok(r) => r?,
            Err(_) => {
                return Err(AgentError::ModelUnavailable(format!(
                    "model call timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };
        validate_reply(&reply)?;
        reassign_reused_ids(&mut reply, history);

        let (cumulative_prompt, cumulative_completion, _) = self.llm.token_usage();
        tracing::info!(
            history_len = history.len(),
            tool_calls = reply.tool_calls().len(),
            duration_ms = start.elapsed().as_millis() as u64,
            cumulative_prompt,
            cumulative_completion,
            "model call completed"
        );
        Ok(reply)
    }
}

/// 回复必须是 assistant 消息，调用 id 非空且在消息内唯一，工具名非空
fn validate_reply(reply: &Message) -> Result<(), AgentError> {
    if !reply.is_assistant() {
        return Err(AgentError::ModelProtocolError(format!(
            "expected an assistant message, got {}",
            reply.role().as_str()
        )));
    }
    let mut seen = HashSet::new();
    for call in reply.tool_calls() {
        if call.id.is_empty() || call.name.is_empty() {
            return Err(AgentError::ModelProtocolError(
                "tool call without id or name".to_string(),
            ));
        }
        if !seen.insert(call.id.as_str()) {
            return Err(AgentError::ModelProtocolError(format!(
                "duplicate tool_call_id {} in one message",
                call.id
            )));
        }
    }
    Ok(())
}

/// 部分后端跨轮次复用 `call_0` 之类的 id；与历史冲突的调用换成新 id
fn reassign_reused_ids(reply: &mut Message, history: &[Message]) {
    let emitted: HashSet<&str> = history
        .iter()
        .flat_map(|m| m.tool_calls().iter().map(|c| c.id.as_str()))
        .collect();
    if let MessageKind::Assistant { tool_calls } = &mut reply.kind {
        for call in tool_calls.iter_mut() {
            if emitted.contains(call.id.as_str()) {
                let fresh = ToolCall::generated_id();
                tracing::warn!(reused = %call.id, fresh = %fresh, "model reused a tool_call_id, reassigned");
                call.id = fresh;
            }
        }
    }
}
