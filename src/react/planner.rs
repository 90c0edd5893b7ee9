//! Planner：推理步
//!
//! 每轮一次远程补全：拼 system + 适配后的对话，取回复文本，
//! 再从中提取 TOOL_INSTRUCTION / END_INSTRUCTION 包裹的工具请求段。
//! 无请求段即为最终回复。

use std::sync::Arc;
use std::sync::OnceLock;

use regex::Regex;

use crate::conversation::{format_for_model, ChatMessage, ConversationHistory};
use crate::core::error::AgentError;
use crate::llm::LlmClient;
use crate::mcp::protocol::ToolSchema;

/// 默认 system prompt：向模型约定工具请求段的书写格式
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful assistant that can use external tools.

When you need a tool, write an instruction block in exactly this form:

TOOL_INSTRUCTION
<describe one tool action in plain language, with all concrete argument values>
END_INSTRUCTION

Rules:
- Each block describes exactly one tool action.
- You may write several blocks in one reply if several actions are needed.
- After observations arrive, continue reasoning or answer the user.
- When you have everything you need, answer directly without any block.";

/// Planner 单步输出
#[derive(Debug, Clone)]
pub struct PlannerOutput {
    /// 模型回复全文（原样入对话）
    pub content: String,
    /// 思考型模型的推理内容（仅部分模型返回）
    pub reasoning: Option<String>,
    /// 提取出的工具请求段，保持出现顺序；为空表示最终回复
    pub tool_requests: Vec<String>,
}

fn instruction_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)TOOL_INSTRUCTION\s*\n(.*?)\n\s*END_INSTRUCTION")
            .expect("instruction pattern is valid")
    })
}

/// 提取全部工具请求段（按出现顺序，去掉首尾空白）
pub fn extract_tool_requests(content: &str) -> Vec<String> {
    instruction_pattern()
        .captures_iter(content)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Planner：持有 LLM 与 system prompt
pub struct Planner {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl Planner {
    /// custom_prompt 追加在默认约定之后，约定段始终保留
    pub fn new(llm: Arc<dyn LlmClient>, custom_prompt: Option<&str>) -> Self {
        let system_prompt = match custom_prompt {
            Some(custom) if !custom.trim().is_empty() => {
                format!("{}\n\n{}", DEFAULT_SYSTEM_PROMPT, custom.trim())
            }
            _ => DEFAULT_SYSTEM_PROMPT.to_string(),
        };
        Self { llm, system_prompt }
    }

    pub fn base_system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    /// 单步推理：system（含当前工具清单）+ 适配后的历史 -> 模型回复 + 工具请求段
    pub async fn execute(
        &self,
        history: &ConversationHistory,
        tools: &[ToolSchema],
    ) -> Result<PlannerOutput, AgentError> {
        let mut system = self.system_prompt.clone();
        if !tools.is_empty() {
            system.push_str("\n\nAvailable tools:\n");
            for schema in tools {
                system.push_str(&format!(
                    "- {}: {}\n",
                    schema.function.name, schema.function.description
                ));
            }
        }

        let mut messages = vec![ChatMessage::system(system)];
        messages.extend(format_for_model(history.messages()));

        let output = self
            .llm
            .complete(&messages)
            .await
            .map_err(AgentError::LlmError)?;

        let tool_requests = extract_tool_requests(&output.content);
        Ok(PlannerOutput {
            content: output.content,
            reasoning: output.reasoning,
            tool_requests,
        })
    }
}
