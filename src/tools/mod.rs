//! 工具层：Tool trait、注册表、顺序执行器与内置工具（calculator / web_search / think_step）

pub mod calculator;
pub mod executor;
pub mod registry;
pub mod schema;
pub mod search;
pub mod think;

pub use calculator::CalculatorTool;
pub use executor::{ToolExecutor, HISTORY_ARG};
pub use registry::{Tool, ToolRegistry, ToolSpec};
pub use schema::{parameters_schema_for, parse_args};
pub use search::WebSearchTool;
pub use think::{ThinkTool, THINK_TOOL_NAME};
