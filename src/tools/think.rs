//! think_step 工具：反思草稿本
//!
//! 唯一能看到完整对话历史的工具：执行器把历史放进 `history` 参数，
//! 这里把当前 thought 作为最后一条 user 条目追加，再让模型基于全部上下文反思，回复即工具结果。

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::ToolError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::tools::schema::{parameters_schema_for, parse_args};
use crate::tools::Tool;

pub const THINK_TOOL_NAME: &str = "think_step";

#[derive(Debug, Deserialize, JsonSchema)]
struct ThinkArgs {
    /// Thinking steps.
    thought: Value,
    #[serde(default)]
    #[schemars(skip)]
    history: Vec<Value>,
}

/// 反思工具：持有一个纯文本生成用的 LLM
pub struct ThinkTool {
    llm: Arc<dyn LlmClient>,
}

impl ThinkTool {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

fn thought_text(thought: &Value) -> String {
    match thought {
        Value::String(s) => s.clone(),
        // 部分模型把参数包成 {"properties": {"thought": ...}}
        Value::Object(obj) => obj
            .get("properties")
            .and_then(|p| p.get("thought"))
            .or_else(|| obj.get("thought"))
            .map(thought_text)
            .unwrap_or_else(|| thought.to_string()),
        other => other.to_string(),
    }
}

fn build_prompt(thought: &str, transcript: &[Value]) -> String {
    let context = serde_json::to_string(transcript).unwrap_or_else(|_| "[]".to_string());
    format!(
        "You are in a reflection phase. Review the conversation history and the current thought \
         from the main reasoning process. Refine the thought, check whether all required \
         information has been collected, and plan the next best action.\n\n\
         ## Conversation history (JSON)\n{context}\n\n\
         ## Thought (to think about)\n{thought}"
    )
}

#[async_trait]
impl Tool for ThinkTool {
    fn name(&self) -> &str {
        THINK_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Stop and think about whether all the information needed to move forward is available."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<ThinkArgs>()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let args: ThinkArgs = parse_args(args)?;
        let thought = thought_text(&args.thought);

        let mut transcript = args.history;
        transcript.push(json!({"role": "user", "content": thought}));

        let prompt = build_prompt(&thought, &transcript);
        let reply = self
            .llm
            .complete(&[Message::user(prompt)], &[])
            .await
            .map_err(|e| ToolError::Failed(format!("reflection failed: {e}")))?;
        Ok(Value::String(reply.content))
    }
}
