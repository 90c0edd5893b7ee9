//! 对话历史（Message Store）
//!
//! 类型化消息的只追加有序转录：system / user / assistant / tool_result。
//! 不变式：首条消息若存在则为 system，clear() 只清除其后的内容；消息插入后不再修改。
//! 单写者假设：一个 QueryProcessor 独占一份历史，不做并发保护。

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致，tool_result 为工具结果回写）
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    ToolResult,
}

/// 结构化工具调用（由合成器产出，模型侧 wire 形状见 schema 模块）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    /// 恒为 "function"
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

/// 调用体：工具名 + 参数（序列化后的 JSON 对象字符串）
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

impl ToolCall {
    /// 解析 arguments 字符串为 JSON 值；合成器的校验门保证其为合法对象
    pub fn parsed_arguments(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.function.arguments)
    }
}

/// 单条消息；tool_calls / tool_requests 为空时序列化省略
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    /// 结构化工具调用（addAssistant(text, toolCalls) 场景）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// 合成前的原始工具请求片段（TOOL_INSTRUCTION 文本）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<String>,
    /// tool_result 消息对应的调用 id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// tool_result 消息对应的工具名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_requests: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }
}

/// 对话历史：只追加，clear 保留开头的 system 消息
#[derive(Clone, Debug, Default)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 带初始 system prompt 的历史
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        let mut history = Self::default();
        let prompt = prompt.into();
        if !prompt.is_empty() {
            history.add_system(prompt);
        }
        history
    }

    pub fn add_system(&mut self, content: impl Into<String>) {
        self.messages.push(Message::system(content));
    }

    pub fn add_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
    }

    pub fn add_assistant(&mut self, content: impl Into<String>, tool_calls: Option<Vec<ToolCall>>) {
        let mut msg = Message::assistant(content);
        if let Some(calls) = tool_calls {
            msg.tool_calls = calls;
        }
        self.messages.push(msg);
    }

    /// 追加带原始工具请求片段的 assistant 消息（合成前记录，每轮一次）
    pub fn add_assistant_with_requests(
        &mut self,
        content: impl Into<String>,
        tool_requests: Vec<String>,
    ) {
        let mut msg = Message::assistant(content);
        msg.tool_requests = tool_requests;
        self.messages.push(msg);
    }

    /// 追加工具结果；result 可能是成功输出也可能是错误文本，由调用方决定
    pub fn add_tool_result(
        &mut self,
        tool_name: impl Into<String>,
        result: impl Into<String>,
        tool_call_id: Option<String>,
    ) {
        self.messages.push(Message {
            role: Role::ToolResult,
            content: result.into(),
            tool_calls: Vec::new(),
            tool_requests: Vec::new(),
            tool_call_id,
            tool_name: Some(tool_name.into()),
        });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// 清空历史，保留开头连续的 system 消息
    pub fn clear(&mut self) {
        let keep = self
            .messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .count();
        self.messages.truncate(keep);
    }

    /// 整段转录的调试输出（迭代结束 / 出错时写入日志）
    pub fn format_debug_output(&self) -> String {
        let mut out = String::new();
        for (i, msg) in self.messages.iter().enumerate() {
            let role = match msg.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
                Role::ToolResult => "tool_result",
            };
            out.push_str(&format!("[{}] {}: {}", i, role, msg.content));
            if !msg.tool_requests.is_empty() {
                out.push_str(&format!(" [REQUESTS: {}]", msg.tool_requests.len()));
            }
            if !msg.tool_calls.is_empty() {
                let names: Vec<&str> = msg
                    .tool_calls
                    .iter()
                    .map(|c| c.function.name.as_str())
                    .collect();
                out.push_str(&format!(" [TOOLS: {}]", names.join(", ")));
            }
            if let Some(name) = &msg.tool_name {
                out.push_str(&format!(" (tool: {})", name));
            }
            out.push('\n');
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_metadata() {
        let mut history = ConversationHistory::new();
        history.add_user("hello");
        history.add_assistant("hi", None);
        history.add_tool_result("weather", "sunny", Some("call_123".to_string()));

        let msgs = history.messages();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, Role::User);
        assert_eq!(msgs[0].content, "hello");
        assert_eq!(msgs[1].role, Role::Assistant);
        assert_eq!(msgs[2].role, Role::ToolResult);
        assert_eq!(msgs[2].content, "sunny");
        assert_eq!(msgs[2].tool_name.as_deref(), Some("weather"));
        assert_eq!(msgs[2].tool_call_id.as_deref(), Some("call_123"));
    }

    #[test]
    fn test_clear_keeps_leading_system() {
        let mut history = ConversationHistory::with_system_prompt("you are helpful");
        history.add_user("q1");
        history.add_assistant("a1", None);
        history.clear();

        assert_eq!(history.len(), 1);
        assert_eq!(history.messages()[0].role, Role::System);
        assert_eq!(history.messages()[0].content, "you are helpful");
    }

    #[test]
    fn test_clear_on_empty_history() {
        let mut history = ConversationHistory::new();
        history.clear();
        assert!(history.is_empty());
    }

    #[test]
    fn test_assistant_with_requests() {
        let mut history = ConversationHistory::new();
        history.add_assistant_with_requests("thinking", vec!["check the weather".to_string()]);
        let msg = history.last().unwrap();
        assert_eq!(msg.tool_requests, vec!["check the weather".to_string()]);
        assert!(msg.tool_calls.is_empty());
    }

    #[test]
    fn test_tool_call_serde_round_trip() {
        let call = ToolCall {
            id: "call_ab12cd34".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: "echo".to_string(),
                arguments: r#"{"text":"hi"}"#.to_string(),
            },
        };
        let json = serde_json::to_string(&call).unwrap();
        assert!(json.contains(r#""type":"function""#));
        let back: ToolCall = serde_json::from_str(&json).unwrap();
        assert_eq!(back, call);
        assert!(back.parsed_arguments().unwrap().is_object());
    }
}
