//! Mock LLM 客户端（用于测试，无需 API）
//!
//! MockLlmClient 回显最后一条 user 消息；ScriptedLlmClient 按队列依次吐出预置回复，
//! 用于驱动 ReAct 循环的场景测试（有 / 无工具请求、合成失败等）。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::conversation::{ChatMessage, ChatRole};
use crate::llm::{LlmClient, LlmOutput};

/// Mock 客户端：回显用户最后一条消息
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmOutput, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == ChatRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(LlmOutput::text(format!("Echo from Mock: {}", last_user)))
    }
}

/// 脚本化客户端：每次 complete / complete_json 弹出一条预置回复；耗尽后返回 Err
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
}

impl ScriptedLlmClient {
    pub fn new(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
        }
    }

    /// 全部成功回复的便捷构造
    pub fn with_replies(replies: Vec<&str>) -> Self {
        Self::new(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    fn pop(&self) -> Result<String, String> {
        self.replies
            .lock()
            .expect("scripted replies lock poisoned")
            .pop_front()
            .unwrap_or_else(|| Err("Scripted replies exhausted".to_string()))
    }

    /// 剩余未消费的回复数
    pub fn remaining(&self) -> usize {
        self.replies.lock().expect("scripted replies lock poisoned").len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, _messages: &[ChatMessage]) -> Result<LlmOutput, String> {
        self.pop().map(LlmOutput::text)
    }

    async fn complete_json(&self, _messages: &[ChatMessage]) -> Result<String, String> {
        self.pop()
    }
}
