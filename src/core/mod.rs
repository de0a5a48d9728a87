//! 核心编排层：线程状态与检查点、路由策略、人工审阅闸门、编排器

pub mod builder;
pub mod checkpoint;
pub mod error;
pub mod orchestrator;
pub mod review;
pub mod routing;
pub mod state;

pub use builder::{create_llm_from_config, create_store, OrchestratorBuilder};
pub use checkpoint::{CheckpointStore, MemoryCheckpointStore, ThreadGuard, ThreadLocks};
pub use error::{AgentError, CheckpointError, StateError, ToolError};
pub use orchestrator::{Orchestrator, TurnStream, DEFAULT_MAX_STEPS};
pub use review::{GateState, Resolution, ReviewDisposition, ReviewGate, ReviewRequest};
pub use routing::{MultiCallPolicy, Route, RoutingPolicy};
pub use state::{ConversationState, ParkedStep, SuspensionMarker, ThreadCheckpoint};
