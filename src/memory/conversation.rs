//! 消息模型：Message / ToolCall / Role
//!
//! Message 按角色建模为带标签的枚举（System / User / Assistant / Tool），
//! 只有 Assistant 携带 tool_calls，只有 Tool 携带 tool_call_id 与 tool_name，靠穷举匹配区分角色。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// 模型发出的一次工具调用；创建后不可变，review 的 update 会生成新的 ToolCall 替换旧值
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 在整个线程历史内唯一
    pub id: String,
    pub name: String,
    /// 参数名 -> 值
    #[serde(default)]
    pub args: Map<String, Value>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            args,
        }
    }

    /// 后端未给出 id 时生成一个
    pub fn generated_id() -> String {
        format!("call_{}", Uuid::new_v4().simple())
    }

    /// 同 id、同名，参数替换为 args
    pub fn with_args(&self, args: Map<String, Value>) -> Self {
        Self {
            id: self.id.clone(),
            name: self.name.clone(),
            args,
        }
    }
}

/// 角色相关字段
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum MessageKind {
    System,
    User,
    Assistant {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        tool_name: String,
    },
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl Message {
    fn with_kind(kind: MessageKind, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            content,
            metadata: Map::new(),
            kind,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::System, content.into())
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_kind(MessageKind::User, content.into())
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::assistant_with_calls(content, Vec::new())
    }

    pub fn assistant_with_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::with_kind(MessageKind::Assistant { tool_calls }, content.into())
    }

    /// 工具结果消息，引用发起调用的 tool_call_id
    pub fn tool(call: &ToolCall, content: impl Into<String>) -> Self {
        Self::with_kind(
            MessageKind::Tool {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
            },
            content.into(),
        )
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn role(&self) -> Role {
        match self.kind {
            MessageKind::System => Role::System,
            MessageKind::User => Role::User,
            MessageKind::Assistant { .. } => Role::Assistant,
            MessageKind::Tool { .. } => Role::Tool,
        }
    }

    /// Assistant 消息上的工具调用；其他角色为空
    pub fn tool_calls(&self) -> &[ToolCall] {
        match &self.kind {
            MessageKind::Assistant { tool_calls } => tool_calls,
            _ => &[],
        }
    }

    /// Tool 消息引用的 tool_call_id
    pub fn tool_call_id(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Tool { tool_call_id, .. } => Some(tool_call_id),
            _ => None,
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.kind, MessageKind::Assistant { .. })
    }

    /// 导出为 think 工具侧通道使用的扁平 JSON（role / content / id 与调用元数据）
    pub fn to_transcript_entry(&self) -> Value {
        let mut entry = Map::new();
        entry.insert("role".into(), Value::String(self.role().as_str().into()));
        entry.insert("content".into(), Value::String(self.content.clone()));
        entry.insert("id".into(), Value::String(self.id.clone()));
        match &self.kind {
            MessageKind::Assistant { tool_calls } => {
                entry.insert(
                    "tool_calls".into(),
                    serde_json::to_value(tool_calls).unwrap_or(Value::Array(Vec::new())),
                );
            }
            MessageKind::Tool {
                tool_call_id,
                tool_name,
            } => {
                entry.insert("tool_call_id".into(), Value::String(tool_call_id.clone()));
                entry.insert("name".into(), Value::String(tool_name.clone()));
            }
            MessageKind::System | MessageKind::User => {}
        }
        if !self.metadata.is_empty() {
            entry.insert("metadata".into(), Value::Object(self.metadata.clone()));
        }
        Value::Object(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_role_tag_serialization() {
        let call = ToolCall::new("c1", "calculator", args(json!({"expression": "2+2"})));
        let msg = Message::assistant_with_calls("", vec![call.clone()]);
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["role"], "assistant");
        assert_eq!(v["tool_calls"][0]["name"], "calculator");

        let tool = Message::tool(&call, "4.0");
        let v = serde_json::to_value(&tool).unwrap();
        assert_eq!(v["role"], "tool");
        assert_eq!(v["tool_call_id"], "c1");
        assert_eq!(v["tool_name"], "calculator");

        let back: Message = serde_json::from_value(v).unwrap();
        assert_eq!(back, tool);
    }

    #[test]
    fn test_user_message_has_no_calls() {
        let msg = Message::user("hi");
        assert_eq!(msg.role(), Role::User);
        assert!(msg.tool_calls().is_empty());
        assert!(msg.tool_call_id().is_none());
    }

    #[test]
    fn test_with_args_keeps_identity() {
        let call = ToolCall::new("c1", "calculator", args(json!({"expression": "2+2"})));
        let updated = call.with_args(args(json!({"expression": "3+3"})));
        assert_eq!(updated.id, "c1");
        assert_eq!(updated.name, "calculator");
        assert_eq!(updated.args["expression"], "3+3");
        assert_eq!(call.args["expression"], "2+2");
    }

    #[test]
    fn test_transcript_entry_fields() {
        let call = ToolCall::new("c9", "think_step", Map::new());
        let tool = Message::tool(&call, "ok");
        let entry = tool.to_transcript_entry();
        assert_eq!(entry["role"], "tool");
        assert_eq!(entry["name"], "think_step");
        assert_eq!(entry["tool_call_id"], "c9");
    }
}
