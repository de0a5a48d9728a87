//! 回合执行层：模型调用步骤与回合事件

pub mod caller;
pub mod events;

pub use caller::ModelCaller;
pub use events::TurnEvent;
