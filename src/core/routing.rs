//! 路由策略：根据最新 assistant 消息决定下一步
//!
//! 纯函数，无副作用：没有工具调用 -> Terminal；有工具调用 -> NeedsReview(待审调用)。
//! 一条消息含多个调用时，由 MultiCallPolicy 明确规定审阅哪一个、其余调用如何处理。

use serde::Deserialize;

use crate::core::state::ConversationState;
use crate::memory::{Message, ToolCall};

/// 多工具调用的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MultiCallPolicy {
    /// 按顺序逐个审阅；每个处置只解决一个调用，全部解决后才再次调用模型
    #[default]
    ReviewEach,
    /// 只审阅最后一个调用；continue/update 时执行全部未解决调用，
    /// feedback 时其余调用以 skipped 结果关闭
    ReviewLast,
}

/// 路由结果
#[derive(Debug, Clone, PartialEq)]
pub enum Route {
    Terminal,
    NeedsReview(ToolCall),
}

/// 路由策略
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingPolicy {
    pub multi_call: MultiCallPolicy,
}

impl RoutingPolicy {
    pub fn new(multi_call: MultiCallPolicy) -> Self {
        Self { multi_call }
    }

    /// 对刚追加的 assistant 消息做决定
    pub fn decide(&self, latest: &Message) -> Route {
        let calls = latest.tool_calls();
        let pending = match self.multi_call {
            MultiCallPolicy::ReviewEach => calls.first(),
            MultiCallPolicy::ReviewLast => calls.last(),
        };
        match pending {
            None => {
                tracing::debug!("decision: no tool calls, ending turn");
                Route::Terminal
            }
            Some(call) => {
                tracing::debug!(tool = %call.name, total_calls = calls.len(), "decision: review required");
                Route::NeedsReview(call.clone())
            }
        }
    }

    /// 一个处置解决后，同一条消息里下一个需要审阅的调用（仅 ReviewEach 会有）
    pub fn next_review(&self, state: &ConversationState) -> Option<ToolCall> {
        match self.multi_call {
            MultiCallPolicy::ReviewEach => state.unresolved_calls().into_iter().next(),
            MultiCallPolicy::ReviewLast => None,
        }
    }
}
