//! OpenAI 兼容 API 客户端
//!
//! 通过 reqwest 直接调用 `<base_url>/chat/completions`（vLLM、OpenAI、自建代理等），
//! 请求中带 tools（function calling），响应中的 tool_calls 解析为 ToolCall。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::config::LlmSection;
use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, MessageKind, ToolCall};
use crate::tools::ToolSpec;

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容客户端
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    model: String,
    api_key: String,
    stop: Vec<String>,
    reasoning_effort: Option<String>,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl OpenAiClient {
    pub fn new(base_url: &str, model: &str, api_key: Option<&str>) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .unwrap_or_else(|| "dummy-key".to_string());

        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            stop: Vec::new(),
            reasoning_effort: None,
            usage: TokenUsage::new(),
        }
    }

    /// 从 [llm] 配置段构建
    pub fn from_config(cfg: &LlmSection) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeouts.request))
            .build()
            .unwrap_or_default();
        let mut c = Self::new(&cfg.base_url, &cfg.resolved_model(), cfg.api_key.as_deref());
        c.client = client;
        c.stop = cfg.stop.clone();
        c.reasoning_effort = cfg.reasoning_effort.clone();
        c
    }

    fn build_request(&self, messages: &[Message], tools: &[ToolSpec]) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": messages.iter().map(to_wire_message).collect::<Vec<_>>(),
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_openai_tool).collect());
            body["tool_choice"] = json!("auto");
        }
        if !self.stop.is_empty() {
            body["stop"] = json!(self.stop);
        }
        if let Some(effort) = &self.reasoning_effort {
            body["reasoning_effort"] = json!(effort);
        }
        body
    }
}

/// Message -> OpenAI chat 消息
fn to_wire_message(m: &Message) -> Value {
    match &m.kind {
        MessageKind::System => json!({"role": "system", "content": m.content}),
        MessageKind::User => json!({"role": "user", "content": m.content}),
        MessageKind::Assistant { tool_calls } if tool_calls.is_empty() => {
            json!({"role": "assistant", "content": m.content})
        }
        MessageKind::Assistant { tool_calls } => json!({
            "role": "assistant",
            "content": if m.content.is_empty() { Value::Null } else { Value::String(m.content.clone()) },
            "tool_calls": tool_calls.iter().map(|c| json!({
                "id": c.id,
                "type": "function",
                "function": {
                    "name": c.name,
                    "arguments": Value::Object(c.args.clone()).to_string(),
                },
            })).collect::<Vec<_>>(),
        }),
        MessageKind::Tool {
            tool_call_id,
            tool_name,
        } => json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "name": tool_name,
            "content": m.content,
        }),
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// 解析响应体为 assistant 消息
fn parse_response(body: &str) -> Result<(Message, Option<Usage>), LlmError> {
    let resp: ChatResponse =
        serde_json::from_str(body).map_err(|e| LlmError::Protocol(e.to_string()))?;
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Protocol("response has no choices".to_string()))?;

    let mut calls = Vec::new();
    for wire in choice.message.tool_calls.unwrap_or_default() {
        let args = parse_arguments(&wire.function.arguments)?;
        calls.push(ToolCall::new(
            wire.id.unwrap_or_else(ToolCall::generated_id),
            wire.function.name,
            args,
        ));
    }
    let content = choice.message.content.unwrap_or_default();
    Ok((Message::assistant_with_calls(content, calls), resp.usage))
}

/// 工具参数为 JSON 字符串；空串视为无参数
fn parse_arguments(raw: &str) -> Result<Map<String, Value>, LlmError> {
    if raw.trim().is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(LlmError::Protocol(format!(
            "tool arguments are not an object: {other}"
        ))),
        Err(e) => Err(LlmError::Protocol(format!("tool arguments: {e}: {raw}"))),
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<Message, LlmError> {
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&self.build_request(messages, tools))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::Unavailable(e.to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited {
                retry_after_ms: 1000,
            });
        }
        if status.is_server_error() {
            return Err(LlmError::Unavailable(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(LlmError::Protocol(format!("{status}: {body}")));
        }

        let (message, usage) = parse_response(&body)?;
        if let Some(u) = usage {
            self.usage.add(u.prompt_tokens, u.completion_tokens);
        }
        Ok(message)
    }

    async fn health(&self) -> bool {
        match self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await
        {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                tracing::warn!(error = %e, "LLM health check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_call_response() {
        let body = r#"{
            "choices": [{"message": {"content": null, "tool_calls": [
                {"id": "call_1", "type": "function",
                 "function": {"name": "calculator", "arguments": "{\"expression\": \"2+2\"}"}}
            ]}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }"#;
        let (msg, usage) = parse_response(body).unwrap();
        assert!(msg.content.is_empty());
        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].args["expression"], "2+2");
        assert_eq!(usage.unwrap().prompt_tokens, 10);
    }

    #[test]
    fn test_parse_plain_reply() {
        let body = r#"{"choices": [{"message": {"content": "4"}}]}"#;
        let (msg, _) = parse_response(body).unwrap();
        assert_eq!(msg.content, "4");
        assert!(msg.tool_calls().is_empty());
    }

    #[test]
    fn test_malformed_arguments_are_protocol_errors() {
        let body = r#"{"choices": [{"message": {"tool_calls": [
            {"id": "c", "function": {"name": "calculator", "arguments": "[1,2]"}}
        ]}}]}"#;
        assert!(matches!(parse_response(body), Err(LlmError::Protocol(_))));
        assert!(matches!(parse_response("not json"), Err(LlmError::Protocol(_))));
        assert!(matches!(
            parse_response(r#"{"choices": []}"#),
            Err(LlmError::Protocol(_))
        ));
    }

    #[test]
    fn test_wire_messages_keep_tool_linkage() {
        let call = ToolCall::new("c1", "calculator", Map::new());
        let assistant = Message::assistant_with_calls("", vec![call.clone()]);
        let wire = to_wire_message(&assistant);
        assert_eq!(wire["content"], Value::Null);
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], "{}");

        let tool = to_wire_message(&Message::tool(&call, "4.0"));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "c1");
    }

    #[test]
    fn test_request_includes_tools_only_when_present() {
        let client = OpenAiClient::new("http://localhost:8000/v1/", "m", Some("k"));
        let body = client.build_request(&[Message::user("hi")], &[]);
        assert!(body.get("tools").is_none());
        assert_eq!(client.base_url, "http://localhost:8000/v1");
    }
}
