//! 记忆层：消息模型与检查点持久化后端（文件 / SQLite）

pub mod conversation;
pub mod persistence;
#[cfg(feature = "async-sqlite")]
pub mod sqlite;

pub use conversation::{Message, MessageKind, Role, ToolCall};
pub use persistence::FileCheckpointStore;
#[cfg(feature = "async-sqlite")]
pub use sqlite::SqliteCheckpointStore;
