//! 工具执行器
//!
//! 按列表顺序逐个执行工具调用（不并行），每个调用产出一条 tool 消息，顺序与调用一致。
//! 单次调用加超时；失败或超时不会中止回合，而是把 `Error: ...` 写入 tool 消息交给模型自行修正。
//! 反思工具（默认 think_step）额外获得完整历史：执行前把历史序列化后放入参数的 `history` 键。
//! 每次调用输出结构化审计日志（JSON）。

use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::ToolError;
use crate::memory::{Message, ToolCall};
use crate::tools::{ToolRegistry, ToolSpec, THINK_TOOL_NAME};

/// 注入给反思工具的侧通道参数名
pub const HISTORY_ARG: &str = "history";

/// 工具执行器：持有注册表、单次超时与反思工具名
pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
    reflection_tool: Option<String>,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs),
            reflection_tool: Some(THINK_TOOL_NAME.to_string()),
        }
    }

    /// 指定获得完整历史的工具；None 表示没有
    pub fn with_reflection_tool(mut self, name: Option<&str>) -> Self {
        self.reflection_tool = name.map(String::from);
        self
    }

    pub fn catalog(&self) -> Vec<ToolSpec> {
        self.registry.catalog()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 顺序执行，返回与 calls 一一对应的 tool 消息
    pub async fn execute(&self, calls: &[ToolCall], history: &[Message]) -> Vec<Message> {
        let mut out = Vec::with_capacity(calls.len());
        for call in calls {
            out.push(self.execute_one(call, history).await);
        }
        out
    }

    /// 执行单个调用
    pub async fn execute_one(&self, call: &ToolCall, history: &[Message]) -> Message {
        let mut args = call.args.clone();
        if self.reflection_tool.as_deref() == Some(call.name.as_str()) {
            let transcript = history.iter().map(Message::to_transcript_entry).collect();
            args.insert(HISTORY_ARG.to_string(), Value::Array(transcript));
        }

        let start = Instant::now();
        let args_preview = args_preview(&call.args);
        let result = match timeout(self.timeout, self.registry.execute(&call.name, args)).await {
            Ok(r) => r,
            Err(_) => Err(ToolError::Timeout(call.name.clone())),
        };

        let outcome = match &result {
            Ok(_) => "ok",
            Err(ToolError::Timeout(_)) => "timeout",
            Err(_) => "error",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": call.name,
            "tool_call_id": call.id,
            "ok": result.is_ok(),
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(value) => Message::tool(call, render_result(value)),
            Err(e) => Message::tool(call, format!("Error: {e}"))
                .with_metadata("is_error", Value::Bool(true)),
        }
    }
}

/// 字符串结果原样写入，其余结果编码为 JSON 文本（如 4.0 -> "4.0"）
fn render_result(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.len() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MessageKind;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// 记录收到的参数
    struct Recorder {
        name: &'static str,
        seen: Arc<Mutex<Vec<Map<String, Value>>>>,
    }

    #[async_trait]
    impl Tool for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "records args"
        }

        async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
            self.seen.lock().unwrap().push(args);
            Ok(json!(1.5))
        }
    }

    struct Failing;

    #[async_trait]
    impl Tool for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Map<String, Value>) -> Result<Value, ToolError> {
            Err(ToolError::Failed("boom".into()))
        }
    }

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Map<String, Value>) -> Result<Value, ToolError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall::new(id, name, json!({"x": 1}).as_object().cloned().unwrap())
    }

    #[tokio::test]
    async fn test_sequential_results_in_call_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ToolRegistry::new();
        reg.register(Recorder { name: "rec", seen: seen.clone() });
        reg.register(Failing);
        let exec = ToolExecutor::new(reg, 5);

        let calls = vec![call("1", "rec"), call("2", "failing"), call("3", "missing")];
        let out = exec.execute(&calls, &[]).await;

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].content, "1.5");
        assert_eq!(out[1].content, "Error: boom");
        assert_eq!(out[1].metadata["is_error"], json!(true));
        assert_eq!(out[2].content, "Error: Unknown tool: missing");
        let ids: Vec<_> = out.iter().filter_map(|m| m.tool_call_id()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
        // 普通工具只看到声明的参数
        assert!(!seen.lock().unwrap()[0].contains_key(HISTORY_ARG));
    }

    #[tokio::test]
    async fn test_reflection_tool_receives_history() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut reg = ToolRegistry::new();
        reg.register(Recorder { name: THINK_TOOL_NAME, seen: seen.clone() });
        let exec = ToolExecutor::new(reg, 5);

        let think = call("t1", THINK_TOOL_NAME);
        let history = vec![
            Message::user("plan a trip"),
            Message::assistant_with_calls("", vec![think.clone()]),
        ];
        let out = exec.execute(&[think.clone()], &history).await;
        assert!(matches!(out[0].kind, MessageKind::Tool { .. }));

        let args = seen.lock().unwrap()[0].clone();
        let transcript = args[HISTORY_ARG].as_array().unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0]["role"], "user");
        assert_eq!(transcript[1]["tool_calls"][0]["id"], "t1");
        assert_eq!(args["x"], 1);
        // 历史中的原始调用参数不被修改
        assert!(!think.args.contains_key(HISTORY_ARG));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_becomes_error_message() {
        let mut reg = ToolRegistry::new();
        reg.register(Slow);
        let exec = ToolExecutor::new(reg, 1);
        let out = exec.execute_one(&call("s", "slow"), &[]).await;
        assert_eq!(out.content, "Error: Tool timeout: slow");
    }
}
