//! Gatehouse - 带人工审阅闸门的工具调用智能体编排
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 线程状态、检查点存储、路由策略、审阅闸门与编排器
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / 脚本化 Mock）
//! - **memory**: 消息模型与检查点持久化后端
//! - **observability**: 日志初始化
//! - **react**: 模型调用步骤与回合事件
//! - **tools**: 工具注册表、执行器与内置工具

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod react;
pub mod tools;

pub use crate::core::{
    AgentError, Orchestrator, OrchestratorBuilder, ReviewDisposition, ReviewRequest, TurnStream,
};
pub use crate::react::TurnEvent;
