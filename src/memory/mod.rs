//! 记忆层：提示词消息与跨请求的对话历史（不透明 blob）

pub mod conversation;
pub mod history;

pub use conversation::{Message, Role};
pub use history::{History, HistoryError, Turn, TurnContent, TurnRole};
