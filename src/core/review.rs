//! 人工审阅闸门：挂起 / 恢复协议
//!
//! 状态：Running -> AwaitingReview（路由给出 NeedsReview，持久化挂起标记后交还控制权）
//! -> Resumed（收到 ReviewDisposition）-> Running。
//! 挂起后线程只依赖 CheckpointStore 中的检查点即可恢复，可在另一个进程中 resume。
//!
//! 处置：
//! - continue：原样执行待审调用
//! - update：用新参数替换待审调用（同 id、同名），改写原 assistant 消息后执行，不追加新消息
//! - feedback：不执行工具，追加一条以处置文本为内容的合成 tool 消息，直接回到模型

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::error::AgentError;
use crate::core::routing::MultiCallPolicy;
use crate::core::state::{ParkedStep, SuspensionMarker, ThreadCheckpoint};
use crate::memory::{Message, ToolCall};

pub const DEFAULT_REVIEW_QUESTION: &str = "Is this correct?";

/// ReviewLast 下 feedback 时未审阅调用的结果内容
pub const SKIPPED_CALL_CONTENT: &str = "skipped: reviewer answered in place of this call";

/// 审阅闸门状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Running,
    AwaitingReview,
    Resumed,
}

impl GateState {
    /// 持久化检查点所处的闸门状态（Resumed 只在恢复过程中短暂存在）
    pub fn of(checkpoint: &ThreadCheckpoint) -> Self {
        if checkpoint.is_suspended() {
            GateState::AwaitingReview
        } else {
            GateState::Running
        }
    }
}

/// 挂起时交给调用方的审阅请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRequest {
    pub thread_id: String,
    pub tool_call: ToolCall,
    pub question: String,
}

/// 审阅者的处置；每次 resume 恰好一个
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "snake_case")]
pub enum ReviewDisposition {
    Continue,
    Update(Map<String, Value>),
    Feedback(String),
}

impl ReviewDisposition {
    pub fn kind(&self) -> &'static str {
        match self {
            ReviewDisposition::Continue => "continue",
            ReviewDisposition::Update(_) => "update",
            ReviewDisposition::Feedback(_) => "feedback",
        }
    }

    /// 从宿主传来的 `{"action": ..., "data": ...}` 解析；
    /// 未知 action、update 缺少对象参数、feedback 缺少文本都视为 MalformedDisposition
    pub fn from_value(value: &Value) -> Result<Self, AgentError> {
        let obj = value
            .as_object()
            .ok_or_else(|| AgentError::MalformedDisposition("expected a JSON object".into()))?;
        let action = obj
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::MalformedDisposition("missing \"action\"".into()))?;
        let data = obj.get("data").filter(|d| !d.is_null());

        match action {
            "continue" => Ok(ReviewDisposition::Continue),
            "update" => match data {
                Some(Value::Object(args)) => Ok(ReviewDisposition::Update(args.clone())),
                // 客户端文本框可能把参数作为 JSON 字符串提交
                Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                    Ok(Value::Object(args)) => Ok(ReviewDisposition::Update(args)),
                    _ => Err(AgentError::MalformedDisposition(
                        "update data must be a JSON object of tool arguments".into(),
                    )),
                },
                _ => Err(AgentError::MalformedDisposition(
                    "update requires \"data\" with the new tool arguments".into(),
                )),
            },
            "feedback" => match data {
                Some(Value::String(text)) => Ok(ReviewDisposition::Feedback(text.clone())),
                _ => Err(AgentError::MalformedDisposition(
                    "feedback requires \"data\" with the feedback text".into(),
                )),
            },
            other => Err(AgentError::MalformedDisposition(format!(
                "unknown action \"{other}\" (expected continue, update or feedback)"
            ))),
        }
    }
}

/// 处置应用后的下一步
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// 按顺序执行这些调用
    Execute(Vec<ToolCall>),
    /// 已追加合成 tool 消息，不执行工具
    Answered(Vec<Message>),
}

/// 审阅闸门
#[derive(Debug, Clone)]
pub struct ReviewGate {
    question: String,
    policy: MultiCallPolicy,
}

impl Default for ReviewGate {
    fn default() -> Self {
        Self::new(DEFAULT_REVIEW_QUESTION, MultiCallPolicy::default())
    }
}

impl ReviewGate {
    pub fn new(question: impl Into<String>, policy: MultiCallPolicy) -> Self {
        Self {
            question: question.into(),
            policy,
        }
    }

    /// Running -> AwaitingReview：生成审阅请求与要持久化的挂起标记
    pub fn suspend(
        &self,
        thread_id: &str,
        message_id: &str,
        call: ToolCall,
    ) -> (ReviewRequest, SuspensionMarker) {
        let marker = SuspensionMarker {
            step: ParkedStep::AwaitingReview,
            message_id: message_id.to_string(),
            tool_call_id: call.id.clone(),
            question: self.question.clone(),
            suspended_at: Utc::now(),
        };
        let request = ReviewRequest {
            thread_id: thread_id.to_string(),
            tool_call: call,
            question: self.question.clone(),
        };
        (request, marker)
    }

    /// 仅凭检查点重建审阅请求（例如另一个进程重新展示待审调用）
    pub fn request_for(checkpoint: &ThreadCheckpoint) -> Option<ReviewRequest> {
        let marker = checkpoint.suspension.as_ref()?;
        let (_, call) = checkpoint.state.find_call(&marker.tool_call_id)?;
        Some(ReviewRequest {
            thread_id: checkpoint.thread_id.clone(),
            tool_call: call.clone(),
            question: marker.question.clone(),
        })
    }

    /// AwaitingReview -> Resumed：在工作副本上应用处置并清除挂起标记。
    /// 只改内存中的 checkpoint；由调用方与后续结果一起持久化。
    pub fn apply(
        &self,
        checkpoint: &mut ThreadCheckpoint,
        disposition: ReviewDisposition,
    ) -> Result<Resolution, AgentError> {
        let thread_id = checkpoint.thread_id.clone();
        let marker = checkpoint
            .suspension
            .clone()
            .ok_or_else(|| AgentError::NoPendingReview(thread_id.clone()))?;
        let pending = match checkpoint.state.find_call(&marker.tool_call_id) {
            Some((_, call)) if !checkpoint.state.has_result(&call.id) => call.clone(),
            // 标记指向的调用已有结果：不能再产生第二个结果
            _ => return Err(AgentError::NoPendingReview(thread_id)),
        };

        let resolution = match disposition {
            ReviewDisposition::Continue => Resolution::Execute(self.calls_to_run(checkpoint, pending)),
            ReviewDisposition::Update(args) => {
                let updated = pending.with_args(args);
                checkpoint
                    .state
                    .replace_tool_call(&marker.message_id, updated.clone())?;
                Resolution::Execute(self.calls_to_run(checkpoint, updated))
            }
            ReviewDisposition::Feedback(text) => {
                let mut appended = vec![Message::tool(&pending, text)
                    .with_metadata("source", Value::String("reviewer".into()))];
                if self.policy == MultiCallPolicy::ReviewLast {
                    for other in checkpoint.state.unresolved_calls() {
                        if other.id != pending.id {
                            appended.push(Message::tool(&other, SKIPPED_CALL_CONTENT));
                        }
                    }
                }
                checkpoint.state.extend(appended.clone())?;
                Resolution::Answered(appended)
            }
        };
        checkpoint.suspension = None;
        Ok(resolution)
    }

    /// continue / update 时要执行的调用
    fn calls_to_run(&self, checkpoint: &ThreadCheckpoint, reviewed: ToolCall) -> Vec<ToolCall> {
        match self.policy {
            MultiCallPolicy::ReviewEach => vec![reviewed],
            MultiCallPolicy::ReviewLast => checkpoint.state.unresolved_calls(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    fn parked(calls: Vec<ToolCall>, gate: &ReviewGate, review_idx: usize) -> ThreadCheckpoint {
        let mut cp = ThreadCheckpoint::new("t");
        cp.state.push(Message::user("q")).unwrap();
        let msg = Message::assistant_with_calls("", calls.clone());
        let msg_id = msg.id.clone();
        cp.state.push(msg).unwrap();
        let (_, marker) = gate.suspend("t", &msg_id, calls[review_idx].clone());
        cp.suspension = Some(marker);
        cp
    }

    fn calc(id: &str, expr: &str) -> ToolCall {
        ToolCall::new(id, "calculator", args(json!({ "expression": expr })))
    }

    #[test]
    fn test_parse_dispositions() {
        assert_eq!(
            ReviewDisposition::from_value(&json!({"action": "continue"})).unwrap(),
            ReviewDisposition::Continue
        );
        assert_eq!(
            ReviewDisposition::from_value(&json!({"action": "update", "data": {"expression": "3+3"}}))
                .unwrap(),
            ReviewDisposition::Update(args(json!({"expression": "3+3"})))
        );
        assert_eq!(
            ReviewDisposition::from_value(&json!({"action": "update", "data": "{\"expression\": \"1\"}"}))
                .unwrap(),
            ReviewDisposition::Update(args(json!({"expression": "1"})))
        );
        assert_eq!(
            ReviewDisposition::from_value(&json!({"action": "feedback", "data": "use 0"})).unwrap(),
            ReviewDisposition::Feedback("use 0".into())
        );
    }

    #[test]
    fn test_malformed_dispositions() {
        for bad in [
            json!("continue"),
            json!({}),
            json!({"action": "approve"}),
            json!({"action": "update"}),
            json!({"action": "update", "data": [1]}),
            json!({"action": "update", "data": "not json"}),
            json!({"action": "feedback"}),
            json!({"action": "feedback", "data": {"x": 1}}),
        ] {
            let err = ReviewDisposition::from_value(&bad).unwrap_err();
            assert!(matches!(err, AgentError::MalformedDisposition(_)), "{bad}");
        }
    }

    #[test]
    fn test_serde_shape_matches_host_json() {
        let v = serde_json::to_value(ReviewDisposition::Feedback("x".into())).unwrap();
        assert_eq!(v, json!({"action": "feedback", "data": "x"}));
    }

    #[test]
    fn test_apply_without_marker_is_no_pending_review() {
        let gate = ReviewGate::default();
        let mut cp = ThreadCheckpoint::new("t");
        let before = cp.clone();
        let err = gate.apply(&mut cp, ReviewDisposition::Continue).unwrap_err();
        assert!(matches!(err, AgentError::NoPendingReview(_)));
        assert_eq!(cp, before);
    }

    #[test]
    fn test_continue_executes_pending_unchanged() {
        let gate = ReviewGate::default();
        let mut cp = parked(vec![calc("a", "2+2")], &gate, 0);
        let res = gate.apply(&mut cp, ReviewDisposition::Continue).unwrap();
        assert_eq!(res, Resolution::Execute(vec![calc("a", "2+2")]));
        assert!(cp.suspension.is_none());
        assert_eq!(cp.state.len(), 2);
    }

    #[test]
    fn test_update_rewrites_call_in_place() {
        let gate = ReviewGate::default();
        let mut cp = parked(vec![calc("a", "2+2")], &gate, 0);
        let res = gate
            .apply(&mut cp, ReviewDisposition::Update(args(json!({"expression": "3+3"}))))
            .unwrap();
        assert_eq!(res, Resolution::Execute(vec![calc("a", "3+3")]));
        assert_eq!(cp.state.len(), 2);
        assert_eq!(cp.state.messages()[1].tool_calls()[0], calc("a", "3+3"));
    }

    #[test]
    fn test_feedback_appends_one_synthetic_result() {
        let gate = ReviewGate::default();
        let mut cp = parked(vec![calc("a", "2+2")], &gate, 0);
        let res = gate
            .apply(&mut cp, ReviewDisposition::Feedback("assume 0".into()))
            .unwrap();
        let Resolution::Answered(msgs) = res else {
            panic!("expected Answered");
        };
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].content, "assume 0");
        assert_eq!(msgs[0].tool_call_id(), Some("a"));
        assert!(cp.state.is_clean());
    }

    #[test]
    fn test_review_last_closes_other_calls() {
        let gate = ReviewGate::new("ok?", MultiCallPolicy::ReviewLast);
        let calls = vec![calc("a", "1"), calc("b", "2")];

        let mut cp = parked(calls.clone(), &gate, 1);
        let res = gate.apply(&mut cp.clone(), ReviewDisposition::Continue).unwrap();
        assert_eq!(res, Resolution::Execute(calls));

        let res = gate
            .apply(&mut cp, ReviewDisposition::Feedback("no".into()))
            .unwrap();
        let Resolution::Answered(msgs) = res else {
            panic!("expected Answered");
        };
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].tool_call_id(), Some("b"));
        assert_eq!(msgs[1].content, SKIPPED_CALL_CONTENT);
        assert!(cp.state.is_clean());
    }

    #[test]
    fn test_request_rebuilt_from_checkpoint() {
        let gate = ReviewGate::new("Run it?", MultiCallPolicy::ReviewEach);
        let cp = parked(vec![calc("a", "2+2")], &gate, 0);
        let req = ReviewGate::request_for(&cp).unwrap();
        assert_eq!(req.tool_call.id, "a");
        assert_eq!(req.question, "Run it?");
        assert_eq!(GateState::of(&cp), GateState::AwaitingReview);
    }
}
