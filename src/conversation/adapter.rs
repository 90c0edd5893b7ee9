//! 历史适配：把内部转录整理为聊天 API 可接受的形状
//!
//! 推理模型走纯 chat-completions 接口（无原生 tool 角色），所以 tool_result 消息
//! 以 user 角色回灌，并带上工具名前缀，让模型知道观察值来自哪个工具。

use crate::conversation::{Message, Role};

/// 发给 LLM 客户端的扁平消息（只有三种聊天角色）
#[derive(Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// 将转录整理为 chat 消息序列：
/// - system / user / assistant 原样映射（assistant 的 content 已含原始请求片段）
/// - tool_result 转为 user 消息 "Observation from {tool}: {result}"
pub fn format_for_model(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|m| match m.role {
            Role::System => ChatMessage::system(m.content.clone()),
            Role::User => ChatMessage::user(m.content.clone()),
            Role::Assistant => ChatMessage::assistant(m.content.clone()),
            Role::ToolResult => {
                let tool = m.tool_name.as_deref().unwrap_or("unknown");
                ChatMessage::user(format!("Observation from {}: {}", tool, m.content))
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ConversationHistory;

    #[test]
    fn test_tool_result_becomes_user_observation() {
        let mut history = ConversationHistory::new();
        history.add_tool_result("weather", "sunny, 25C", Some("call_1".to_string()));

        let formatted = format_for_model(history.messages());
        assert_eq!(formatted.len(), 1);
        assert_eq!(formatted[0].role, ChatRole::User);
        assert_eq!(formatted[0].content, "Observation from weather: sunny, 25C");
    }

    #[test]
    fn test_plain_roles_pass_through() {
        let mut history = ConversationHistory::with_system_prompt("sys");
        history.add_user("q");
        history.add_assistant("a", None);

        let formatted = format_for_model(history.messages());
        let roles: Vec<ChatRole> = formatted.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![ChatRole::System, ChatRole::User, ChatRole::Assistant]
        );
    }
}
