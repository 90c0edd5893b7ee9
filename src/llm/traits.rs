//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / DeepSeek / Mock）实现 LlmClient：
//! complete（普通完成，可带推理内容）、complete_json（JSON 输出模式，供合成器使用）。
//! 错误一律用 String 描述，由上层映射为 AgentError::LlmError。

use async_trait::async_trait;

use crate::conversation::ChatMessage;

/// 一次完成的产出：正文 + 可选推理内容（deepseek-reasoner 等思考型模型）
#[derive(Clone, Debug, Default)]
pub struct LlmOutput {
    pub content: String,
    pub reasoning: Option<String>,
}

impl LlmOutput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            reasoning: None,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 普通完成；响应无 choices 时返回 Err
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmOutput, String>;

    /// JSON 输出模式完成（response_format=json_object）；默认退化为普通完成
    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String, String> {
        self.complete(messages).await.map(|o| o.content)
    }

    /// 获取累计 token 使用统计：(prompt_tokens, completion_tokens, total_tokens)
    /// 默认返回 (0, 0, 0)，具体实现可覆盖
    fn token_usage(&self) -> (u64, u64, u64) {
        (0, 0, 0)
    }
}
