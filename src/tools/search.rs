//! Web 搜索工具（Tavily Search API）
//!
//! POST https://api.tavily.com/search，返回前 max_results 条结果（title / url / content）；
//! 未配置 API Key 时调用失败（以 tool 错误消息返回给模型）。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::core::ToolError;
use crate::tools::schema::{parameters_schema_for, parse_args};
use crate::tools::Tool;

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

#[derive(Debug, Deserialize, JsonSchema)]
struct SearchArgs {
    /// Search query to look up on the web.
    query: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

/// 单条搜索结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub content: String,
}

/// Web 搜索工具
pub struct WebSearchTool {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>, max_results: usize, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: TAVILY_ENDPOINT.to_string(),
            api_key: api_key.or_else(|| std::env::var("TAVILY_API_KEY").ok()),
            max_results: max_results.max(1),
        }
    }

    /// 自定义端点（自建代理或测试）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Searches the web and returns the most relevant results (title, url, content)."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema_for::<SearchArgs>()
    }

    async fn execute(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let args: SearchArgs = parse_args(args)?;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::Failed("search API key is not configured".to_string()))?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&json!({
                "query": args.query,
                "max_results": self.max_results,
            }))
            .send()
            .await
            .map_err(|e| ToolError::Failed(format!("search request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ToolError::Failed(format!("search returned {status}: {body}")));
        }
        let parsed: TavilyResponse = response
            .json()
            .await
            .map_err(|e| ToolError::Failed(format!("invalid search response: {e}")))?;

        let hits: Vec<SearchHit> = parsed.results.into_iter().take(self.max_results).collect();
        serde_json::to_value(hits).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
