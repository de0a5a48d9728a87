//! 工具参数 JSON Schema 生成（schemars）
//!
//! 每个工具的参数结构体 derive JsonSchema，这里转成注入工具目录的 `parameters` 对象。

use schemars::{schema_for, JsonSchema};
use serde_json::{Map, Value};

use crate::core::ToolError;

/// 参数结构体的 JSON Schema（去掉 `$schema` 与 `title`，只保留 object 描述）
pub fn parameters_schema_for<T: JsonSchema>() -> Value {
    let schema = schema_for!(T);
    let mut value = serde_json::to_value(&schema).unwrap_or(Value::Null);
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// 将 tool call 参数解析为类型化结构体
pub fn parse_args<T: serde::de::DeserializeOwned>(args: Map<String, Value>) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(args)).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}
