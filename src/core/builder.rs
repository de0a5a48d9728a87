//! 编排器构建器：统一的初始化逻辑
//!
//! 从配置创建 LLM、检查点存储与默认工具集（calculator / web_search / think_step），
//! 测试与嵌入方也可以逐项替换。

use std::sync::Arc;

use crate::config::{AppConfig, CheckpointBackend, CheckpointSection};
use crate::core::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use crate::core::error::AgentError;
use crate::core::orchestrator::{Inner, Orchestrator, DEFAULT_MAX_STEPS};
use crate::core::review::{ReviewGate, DEFAULT_REVIEW_QUESTION};
use crate::core::routing::{MultiCallPolicy, RoutingPolicy};
use crate::llm::{LlmClient, OpenAiClient};
use crate::memory::FileCheckpointStore;
use crate::react::ModelCaller;
use crate::tools::{
    CalculatorTool, ThinkTool, Tool, ToolExecutor, ToolRegistry, WebSearchTool, THINK_TOOL_NAME,
};

/// 编排器构建器
pub struct OrchestratorBuilder {
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn CheckpointStore>,
    registry: ToolRegistry,
    system_prompt: Option<String>,
    max_steps: usize,
    model_timeout_secs: u64,
    tool_timeout_secs: u64,
    multi_call: MultiCallPolicy,
    question: String,
    reflection_tool: Option<String>,
}

impl OrchestratorBuilder {
    /// 空工具集、默认策略
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            llm,
            store,
            registry: ToolRegistry::new(),
            system_prompt: None,
            max_steps: DEFAULT_MAX_STEPS,
            model_timeout_secs: 60,
            tool_timeout_secs: 30,
            multi_call: MultiCallPolicy::default(),
            question: DEFAULT_REVIEW_QUESTION.to_string(),
            reflection_tool: Some(THINK_TOOL_NAME.to_string()),
        }
    }

    /// 按配置设置策略与超时，并注册默认工具集
    pub fn from_config(
        cfg: &AppConfig,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn CheckpointStore>,
    ) -> Self {
        let search = &cfg.tools.search;
        Self::new(llm.clone(), store)
            .system_prompt(cfg.app.system_prompt.clone())
            .max_steps(cfg.app.max_steps)
            .model_timeout_secs(cfg.llm.timeouts.request)
            .tool_timeout_secs(cfg.tools.tool_timeout_secs)
            .multi_call(cfg.review.multi_call)
            .question(cfg.review.question.clone())
            .tool(CalculatorTool)
            .tool(WebSearchTool::new(
                search.api_key.clone(),
                search.max_results,
                search.timeout_secs,
            ))
            .tool(ThinkTool::new(llm))
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool>) -> Self {
        self.registry.register_arc(tool);
        self
    }

    pub fn system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }

    /// 单回合模型调用上限，0 表示不限
    pub fn max_steps(mut self, n: usize) -> Self {
        self.max_steps = n;
        self
    }

    pub fn model_timeout_secs(mut self, secs: u64) -> Self {
        self.model_timeout_secs = secs;
        self
    }

    pub fn tool_timeout_secs(mut self, secs: u64) -> Self {
        self.tool_timeout_secs = secs;
        self
    }

    pub fn multi_call(mut self, policy: MultiCallPolicy) -> Self {
        self.multi_call = policy;
        self
    }

    pub fn question(mut self, question: impl Into<String>) -> Self {
        self.question = question.into();
        self
    }

    /// 获得完整历史的反思工具名；None 表示关闭注入
    pub fn reflection_tool(mut self, name: Option<&str>) -> Self {
        self.reflection_tool = name.map(String::from);
        self
    }

    pub fn build(self) -> Orchestrator {
        let executor = ToolExecutor::new(self.registry, self.tool_timeout_secs)
            .with_reflection_tool(self.reflection_tool.as_deref());
        let caller = ModelCaller::new(self.llm, self.model_timeout_secs)
            .with_system_prompt(self.system_prompt);
        tracing::info!(
            tools = ?executor.tool_names(),
            multi_call = ?self.multi_call,
            max_steps = self.max_steps,
            "orchestrator ready"
        );
        Orchestrator::from_inner(Inner {
            caller,
            executor,
            store: self.store,
            routing: RoutingPolicy::new(self.multi_call),
            gate: ReviewGate::new(self.question, self.multi_call),
            max_steps: self.max_steps,
        })
    }
}

/// 按 [llm] 配置创建 OpenAI 兼容客户端
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    tracing::info!(
        base_url = %cfg.llm.base_url,
        model = %cfg.llm.resolved_model(),
        "Using OpenAI-compatible LLM"
    );
    Arc::new(OpenAiClient::from_config(&cfg.llm))
}

/// 按 [checkpoint] 配置创建检查点存储
pub async fn create_store(cfg: &CheckpointSection) -> Result<Arc<dyn CheckpointStore>, AgentError> {
    match cfg.backend {
        CheckpointBackend::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),
        CheckpointBackend::File => {
            let path = cfg.resolved_path();
            tracing::info!(path = %path.display(), "Using file checkpoint store");
            Ok(Arc::new(FileCheckpointStore::new(path)))
        }
        #[cfg(feature = "async-sqlite")]
        CheckpointBackend::Sqlite => {
            let path = cfg.resolved_path();
            tracing::info!(path = %path.display(), "Using SQLite checkpoint store");
            let store = crate::memory::SqliteCheckpointStore::new(path).await?;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "async-sqlite"))]
        CheckpointBackend::Sqlite => Err(AgentError::ConfigError(
            "checkpoint backend \"sqlite\" requires the async-sqlite feature".to_string(),
        )),
    }
}
