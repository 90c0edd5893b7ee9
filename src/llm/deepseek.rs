//! DeepSeek API 客户端（OpenAI 兼容格式）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat (常规对话 / 工具调用合成), deepseek-reasoner (思考模式)
//!
//! deepseek-reasoner 会在响应里额外携带 reasoning_content，async_openai 的类型不透出该字段，
//! 因此这里用 reqwest 手写请求 / 响应结构。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{ChatMessage, ChatRole};
use crate::llm::openai::TokenUsage;
use crate::llm::{LlmClient, LlmOutput};

/// DeepSeek API 常量
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    /// 仅 deepseek-reasoner 返回
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// DeepSeek 客户端：reqwest 直连 chat/completions，保留 reasoning_content
pub struct DeepSeekClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    /// 累计 token 使用统计
    pub usage: TokenUsage,
}

impl DeepSeekClient {
    pub fn new(base_url: Option<&str>, model: &str, api_key: Option<&str>, timeout_secs: u64) -> Self {
        let api_key = api_key
            .map(String::from)
            .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
            .unwrap_or_else(|| "sk-placeholder".to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();

        Self {
            http,
            base_url: base_url.unwrap_or(DEEPSEEK_BASE_URL).trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            usage: TokenUsage::new(),
        }
    }

    fn to_wire<'a>(&self, messages: &'a [ChatMessage]) -> Vec<WireMessage<'a>> {
        messages
            .iter()
            .map(|m| WireMessage {
                role: match m.role {
                    ChatRole::System => "system",
                    ChatRole::User => "user",
                    ChatRole::Assistant => "assistant",
                },
                content: &m.content,
            })
            .collect()
    }

    async fn request(
        &self,
        messages: &[ChatMessage],
        json_mode: bool,
    ) -> Result<(String, Option<String>), String> {
        let body = ChatRequest {
            model: &self.model,
            messages: self.to_wire(messages),
            response_format: json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("DeepSeek API error {}: {}", status, text));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| e.to_string())?;

        if let Some(usage) = &parsed.usage {
            self.usage.add(usage.prompt_tokens, usage.completion_tokens);
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| "No choices in model response".to_string())?;

        Ok((
            choice.message.content.unwrap_or_default(),
            choice.message.reasoning_content,
        ))
    }
}

#[async_trait]
impl LlmClient for DeepSeekClient {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmOutput, String> {
        let (content, reasoning) = self.request(messages, false).await?;
        Ok(LlmOutput { content, reasoning })
    }

    async fn complete_json(&self, messages: &[ChatMessage]) -> Result<String, String> {
        let (content, _) = self.request(messages, true).await?;
        Ok(content)
    }
}

/// 创建 DeepSeek 客户端
///
/// - 优先使用环境变量 `DEEPSEEK_API_KEY`
/// - 模型可通过 `model` 参数或 `DEEPSEEK_MODEL` 环境变量指定
///   - `deepseek-chat`: 常规对话，响应快
///   - `deepseek-reasoner`: 思考模式，适合复杂推理
pub fn create_deepseek_client(model: Option<&str>, timeout_secs: u64) -> DeepSeekClient {
    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    DeepSeekClient::new(None, &model, None, timeout_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_content_deserialization() {
        let json = r#"{
            "choices": [{"message": {"content": "4", "reasoning_content": "2+2 is basic arithmetic"}}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5}
        }"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        let msg = &parsed.choices[0].message;
        assert_eq!(msg.content.as_deref(), Some("4"));
        assert_eq!(msg.reasoning_content.as_deref(), Some("2+2 is basic arithmetic"));
    }

    #[test]
    fn test_empty_choices_parse() {
        let parsed: ChatResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        assert!(parsed.choices.is_empty());
    }
}
