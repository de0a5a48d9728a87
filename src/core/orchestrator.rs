//! 编排器：回合驱动
//!
//! 每个线程是一个小状态机：call_model -> (Terminal | AwaitingReview) -> run_tools -> call_model ...
//! start_turn / resume_turn 先同步检查前置条件（线程锁、挂起状态、处置合法性），
//! 失败时直接返回错误且不改动线程；通过后返回一个事件流，由调用方拉动推进。
//!
//! 持久化规则：
//! - 新输入消息与第一条模型回复一起写入，模型失败则什么也不写
//! - 需要审阅时，assistant 消息与挂起标记在同一次 save 中写入
//! - 工具结果与清除挂起标记（以及下一个待审调用的标记）在同一次 save 中写入
//! - 事件只在对应内容持久化之后才产出

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::stream::{self, Stream};

use crate::core::checkpoint::{CheckpointStore, ThreadGuard};
use crate::core::error::{AgentError, StateError};
use crate::core::review::{GateState, Resolution, ReviewDisposition, ReviewGate, ReviewRequest};
use crate::core::routing::{Route, RoutingPolicy};
use crate::core::state::ThreadCheckpoint;
use crate::memory::{Message, ToolCall};
use crate::react::{ModelCaller, TurnEvent};
use crate::tools::ToolExecutor;

/// 回合事件流；出错时产出一个 Err 后结束
pub type TurnStream = Pin<Box<dyn Stream<Item = Result<TurnEvent, AgentError>> + Send>>;

/// 单回合默认的模型调用上限
pub const DEFAULT_MAX_STEPS: usize = 20;

pub(crate) struct Inner {
    pub(crate) caller: ModelCaller,
    pub(crate) executor: ToolExecutor,
    pub(crate) store: Arc<dyn CheckpointStore>,
    pub(crate) routing: RoutingPolicy,
    pub(crate) gate: ReviewGate,
    pub(crate) max_steps: usize,
}

/// 编排器；可廉价克隆并在多个任务间共享，不同线程的回合可并发进行
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub(crate) fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 追加新消息并推进线程，直到最终回复或需要审阅
    pub async fn start_turn(
        &self,
        thread_id: &str,
        new_messages: Vec<Message>,
    ) -> Result<TurnStream, AgentError> {
        let guard = self.lock(thread_id)?;
        let mut checkpoint = self
            .inner
            .store
            .load(thread_id)
            .await?
            .unwrap_or_else(|| ThreadCheckpoint::new(thread_id));

        if checkpoint.is_suspended() {
            return Err(AgentError::ReviewPending(thread_id.to_string()));
        }
        if !checkpoint.state.is_clean() {
            return Err(AgentError::InvalidState(StateError::OutstandingToolCalls));
        }
        // 只在工作副本上暂存，随第一条模型回复一起持久化
        checkpoint.turn_steps = 0;
        let staged = new_messages.len();
        checkpoint.state.extend(new_messages)?;
        // 新消息不能留下没有审阅标记的未解决调用
        if !checkpoint.state.is_clean() {
            return Err(AgentError::InvalidState(StateError::OutstandingToolCalls));
        }

        tracing::info!(
            thread_id,
            version = checkpoint.version,
            staged,
            history_len = checkpoint.state.len(),
            "turn started"
        );
        Ok(TurnRunner::new(self.inner.clone(), guard, checkpoint, Phase::CallModel).into_stream())
    }

    /// 对挂起的线程应用审阅处置并继续推进
    pub async fn resume_turn(
        &self,
        thread_id: &str,
        disposition: ReviewDisposition,
    ) -> Result<TurnStream, AgentError> {
        let guard = self.lock(thread_id)?;
        let mut checkpoint = self
            .inner
            .store
            .load(thread_id)
            .await?
            .ok_or_else(|| AgentError::NoPendingReview(thread_id.to_string()))?;

        let kind = disposition.kind();
        let resolution = self.inner.gate.apply(&mut checkpoint, disposition)?;
        tracing::info!(
            thread_id,
            version = checkpoint.version,
            disposition = kind,
            from = ?GateState::AwaitingReview,
            to = ?GateState::Resumed,
            "review resolved"
        );

        let phase = match resolution {
            Resolution::Execute(calls) => Phase::RunTools(calls),
            Resolution::Answered(appended) => Phase::Settle(appended),
        };
        Ok(TurnRunner::new(self.inner.clone(), guard, checkpoint, phase).into_stream())
    }

    /// 宿主直接转发 `{"action": ..., "data": ...}` 时使用
    pub async fn resume_turn_json(
        &self,
        thread_id: &str,
        disposition: &serde_json::Value,
    ) -> Result<TurnStream, AgentError> {
        let disposition = ReviewDisposition::from_value(disposition)?;
        self.resume_turn(thread_id, disposition).await
    }

    /// 读取线程最后一次持久化的检查点
    pub async fn thread(&self, thread_id: &str) -> Result<Option<ThreadCheckpoint>, AgentError> {
        Ok(self.inner.store.load(thread_id).await?)
    }

    /// 线程挂起时返回待审请求
    pub async fn pending_review(&self, thread_id: &str) -> Result<Option<ReviewRequest>, AgentError> {
        Ok(self
            .thread(thread_id)
            .await?
            .as_ref()
            .and_then(ReviewGate::request_for))
    }

    pub async fn gate_state(&self, thread_id: &str) -> Result<GateState, AgentError> {
        Ok(self
            .thread(thread_id)
            .await?
            .as_ref()
            .map(GateState::of)
            .unwrap_or(GateState::Running))
    }

    /// 模型后端存活探测
    pub async fn model_health(&self) -> bool {
        self.inner.caller.health().await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.inner.executor.tool_names()
    }

    fn lock(&self, thread_id: &str) -> Result<ThreadGuard, AgentError> {
        self.inner.store.try_lock(thread_id).ok_or_else(|| {
            tracing::warn!(thread_id, "rejected: operation already in flight");
            AgentError::ThreadBusy(thread_id.to_string())
        })
    }
}

enum Phase {
    CallModel,
    RunTools(Vec<ToolCall>),
    /// 已在工作副本追加的消息，待持久化后决定下一步
    Settle(Vec<Message>),
    Done,
}

/// 单个回合的执行体；持有线程锁直到流被丢弃
struct TurnRunner {
    inner: Arc<Inner>,
    checkpoint: ThreadCheckpoint,
    phase: Phase,
    outbox: VecDeque<TurnEvent>,
    _guard: ThreadGuard,
}

impl TurnRunner {
    fn new(inner: Arc<Inner>, guard: ThreadGuard, checkpoint: ThreadCheckpoint, phase: Phase) -> Self {
        Self {
            inner,
            checkpoint,
            phase,
            outbox: VecDeque::new(),
            _guard: guard,
        }
    }

    fn into_stream(self) -> TurnStream {
        Box::pin(stream::unfold(Some(self), |runner| async move {
            let mut runner = runner?;
            loop {
                if let Some(event) = runner.outbox.pop_front() {
                    return Some((Ok(event), Some(runner)));
                }
                if matches!(runner.phase, Phase::Done) {
                    return None;
                }
                if let Err(e) = runner.step().await {
                    tracing::warn!(
                        thread_id = %runner.checkpoint.thread_id,
                        error = %e,
                        "turn aborted; last checkpoint kept"
                    );
                    return Some((Err(e), None));
                }
            }
        }))
    }

    async fn step(&mut self) -> Result<(), AgentError> {
        match std::mem::replace(&mut self.phase, Phase::Done) {
            Phase::CallModel => self.call_model().await,
            Phase::RunTools(calls) => self.run_tools(calls).await,
            Phase::Settle(appended) => self.settle(appended).await,
            Phase::Done => Ok(()),
        }
    }

    fn thread_id(&self) -> &str {
        &self.checkpoint.thread_id
    }

    async fn call_model(&mut self) -> Result<(), AgentError> {
        let max_steps = self.inner.max_steps;
        if max_steps > 0 && self.checkpoint.turn_steps >= max_steps {
            return Err(AgentError::StepLimitExceeded(max_steps));
        }
        self.checkpoint.turn_steps += 1;

        let catalog = self.inner.executor.catalog();
        let reply = self
            .inner
            .caller
            .generate(self.checkpoint.state.messages(), &catalog)
            .await?;
        self.checkpoint.state.push(reply.clone())?;

        match self.inner.routing.decide(&reply) {
            Route::Terminal => {
                self.commit().await?;
                tracing::info!(thread_id = %self.thread_id(), model_calls = self.checkpoint.turn_steps, "turn finished");
                self.outbox.push_back(TurnEvent::Message(reply));
            }
            Route::NeedsReview(call) => {
                let request = self.park(&reply.id, call);
                self.commit().await?;
                self.outbox.push_back(TurnEvent::Message(reply));
                self.outbox.push_back(TurnEvent::Review(request));
            }
        }
        Ok(())
    }

    async fn run_tools(&mut self, calls: Vec<ToolCall>) -> Result<(), AgentError> {
        let results = self
            .inner
            .executor
            .execute(&calls, self.checkpoint.state.messages())
            .await;
        self.checkpoint.state.extend(results.clone())?;
        self.settle(results).await
    }

    /// 持久化已追加的 tool 消息；同一条 assistant 消息还有待审调用则再次挂起，否则回到模型
    async fn settle(&mut self, appended: Vec<Message>) -> Result<(), AgentError> {
        let next = self.inner.routing.next_review(&self.checkpoint.state);
        let request = match next {
            Some(call) => {
                let message_id = self
                    .checkpoint
                    .state
                    .outstanding()
                    .map(|m| m.id.clone())
                    .ok_or(StateError::OutstandingToolCalls)?;
                Some(self.park(&message_id, call))
            }
            None if !self.checkpoint.state.is_clean() => {
                return Err(StateError::OutstandingToolCalls.into());
            }
            None => None,
        };
        self.commit().await?;

        self.outbox.extend(appended.into_iter().map(TurnEvent::Message));
        match request {
            Some(request) => self.outbox.push_back(TurnEvent::Review(request)),
            None => self.phase = Phase::CallModel,
        }
        Ok(())
    }

    /// 在工作副本上设置挂起标记，返回要交给宿主的请求
    fn park(&mut self, message_id: &str, call: ToolCall) -> ReviewRequest {
        let (request, marker) = self
            .inner
            .gate
            .suspend(&self.checkpoint.thread_id, message_id, call);
        tracing::info!(
            thread_id = %self.checkpoint.thread_id,
            tool = %request.tool_call.name,
            tool_call_id = %request.tool_call.id,
            to = ?GateState::AwaitingReview,
            "suspended for review"
        );
        self.checkpoint.suspension = Some(marker);
        request
    }

    async fn commit(&mut self) -> Result<(), AgentError> {
        let version = self.inner.store.save(&self.checkpoint).await?;
        tracing::debug!(
            thread_id = %self.checkpoint.thread_id,
            version,
            messages = self.checkpoint.state.len(),
            suspended = self.checkpoint.is_suspended(),
            "checkpoint saved"
        );
        self.checkpoint.version = version;
        Ok(())
    }
}
