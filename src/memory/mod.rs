//! 记忆层：对话历史（发送给模型的规范序列）与 Turn Log（观测投影）

pub mod history;
pub mod turn_log;

pub use history::{ConversationHistory, Message, Role};
pub use turn_log::{TurnLog, TurnLogEntry, TurnStatus};
