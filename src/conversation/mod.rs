//! 对话层：只追加转录与供应商历史适配

pub mod adapter;
pub mod history;

pub use adapter::{format_for_model, ChatMessage, ChatRole};
pub use history::{ConversationHistory, FunctionCall, Message, Role, ToolCall};
