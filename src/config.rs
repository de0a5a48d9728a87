//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `GATEHOUSE__*` 覆盖（双下划线表示嵌套，如 `GATEHOUSE__LLM__MODEL=qwen`）。

use std::path::PathBuf;

use serde::Deserialize;

use crate::core::review::DEFAULT_REVIEW_QUESTION;
use crate::core::routing::MultiCallPolicy;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub review: ReviewSection,
    pub checkpoint: CheckpointSection,
}

/// [app] 段：名字、回合步数上限、系统提示词
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 单回合模型调用上限，0 表示不限
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    pub system_prompt: Option<String>,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            max_steps: default_max_steps(),
            system_prompt: None,
        }
    }
}

impl AppSection {
    /// 启动横幅中显示的名字
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(env!("CARGO_PKG_NAME"))
    }
}

fn default_max_steps() -> usize {
    crate::core::orchestrator::DEFAULT_MAX_STEPS
}

/// [llm] 段：OpenAI 兼容端点
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 未设置时读环境变量 SERVED_MODEL_NAME
    pub model: Option<String>,
    /// 未设置时读环境变量 OPENAI_API_KEY
    pub api_key: Option<String>,
    #[serde(default)]
    pub stop: Vec<String>,
    pub reasoning_effort: Option<String>,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: None,
            api_key: None,
            stop: Vec::new(),
            reasoning_effort: None,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/v1".to_string()
}

impl LlmSection {
    /// 模型名：配置 > SERVED_MODEL_NAME > "default"
    pub fn resolved_model(&self) -> String {
        self.model
            .clone()
            .filter(|m| !m.is_empty())
            .or_else(|| std::env::var("SERVED_MODEL_NAME").ok())
            .unwrap_or_else(|| "default".to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次模型调用超时（秒）
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：工具超时、搜索设置
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            search: SearchSection::default(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [tools.search] 段：Tavily 搜索
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    /// 未设置时读环境变量 TAVILY_API_KEY
    pub api_key: Option<String>,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            api_key: None,
            max_results: default_max_results(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_max_results() -> usize {
    2
}

fn default_search_timeout_secs() -> u64 {
    15
}

/// [review] 段：审阅问题与多调用策略
#[derive(Debug, Clone, Deserialize)]
pub struct ReviewSection {
    #[serde(default = "default_question")]
    pub question: String,
    #[serde(default)]
    pub multi_call: MultiCallPolicy,
}

impl Default for ReviewSection {
    fn default() -> Self {
        Self {
            question: default_question(),
            multi_call: MultiCallPolicy::default(),
        }
    }
}

fn default_question() -> String {
    DEFAULT_REVIEW_QUESTION.to_string()
}

/// 检查点后端
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointBackend {
    #[default]
    Memory,
    File,
    /// 需要 async-sqlite feature
    Sqlite,
}

/// [checkpoint] 段：存储后端与路径（file 为目录，sqlite 为数据库文件）
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CheckpointSection {
    #[serde(default)]
    pub backend: CheckpointBackend,
    pub path: Option<PathBuf>,
}

impl CheckpointSection {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| match self.backend {
            CheckpointBackend::Sqlite => PathBuf::from("data/checkpoints.db"),
            _ => PathBuf::from("data/checkpoints"),
        })
    }
}

/// 从 config 目录加载配置，环境变量 GATEHOUSE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 GATEHOUSE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("GATEHOUSE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
