//! 工具调用合成器
//!
//! 把 Planner 产出的自然语言工具请求段翻译成结构化调用：闭世界 prompt 列出当前
//! 可用函数，JSON 模式请求，逐条过校验门。失败时自适应重试：收缩候选工具列表，
//! 并从第二次尝试起改写指令（改写失败则截断兜底）。重试耗尽返回空列表，不算错误。

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::conversation::{ChatMessage, FunctionCall, ToolCall};
use crate::llm::LlmClient;
use crate::mcp::protocol::ToolSchema;

/// 改写兜底时指令保留的最大字符数
const TRUNCATE_CHARS: usize = 400;

/// 一次合成的重试统计
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// 实际发起的尝试次数
    pub attempts: usize,
    /// 是否产出了至少一条有效调用
    pub success: bool,
    pub valid_calls: usize,
    pub invalid_calls: usize,
    /// 模型返回的调用对象总数（含无效）
    pub total_calls: usize,
    /// 每次失败尝试的原因
    pub errors: Vec<String>,
}

/// 收缩后的候选工具数：逐次递减，最低保留 1 个
///
/// attempt 0 保留全部，之后每次收缩 25%，最多收缩到 25%。
pub fn shrink_count(n_tools: usize, attempt: usize) -> usize {
    if n_tools == 0 {
        return 0;
    }
    let factor = 1.0 - (0.25 * attempt as f64).min(0.75);
    ((n_tools as f64 * factor) as usize).max(1)
}

/// 校验门：单个调用对象必须是 type=function 的对象、函数名在现存工具集内、
/// arguments 是能解析为 JSON 对象的字符串。未过门的调用丢弃，不修补。
/// 通过则生成带新 id 的 ToolCall。
pub fn validate_call(
    value: &serde_json::Value,
    live_tools: &HashSet<String>,
) -> Result<ToolCall, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| "调用不是 JSON 对象".to_string())?;

    if let Some(call_type) = obj.get("type") {
        if call_type.as_str() != Some("function") {
            return Err(format!("type 字段不是 function: {}", call_type));
        }
    }

    let function = obj
        .get("function")
        .and_then(|f| f.as_object())
        .ok_or_else(|| "缺少 function 对象".to_string())?;

    let name = function
        .get("name")
        .and_then(|n| n.as_str())
        .ok_or_else(|| "function.name 缺失或不是字符串".to_string())?;

    if !live_tools.contains(name) {
        return Err(format!("函数 {} 不在现存工具集内", name));
    }

    // 门是纯谓词：只接受「能解析为 JSON 对象的字符串」，缺失或其他形状一律拒绝，不做修补
    let arguments = match function.get("arguments") {
        Some(serde_json::Value::String(s)) => {
            let parsed: serde_json::Value = serde_json::from_str(s)
                .map_err(|e| format!("arguments 不是合法 JSON: {}", e))?;
            if !parsed.is_object() {
                return Err("arguments 解析结果不是对象".to_string());
            }
            s.clone()
        }
        Some(other) => {
            return Err(format!("arguments 必须是 JSON 对象字符串: {}", other));
        }
        None => return Err("缺少 function.arguments".to_string()),
    };

    Ok(ToolCall {
        id: new_call_id(),
        call_type: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments,
        },
    })
}

fn new_call_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("call_{}", &id[..8])
}

/// 从模型 JSON 回复中取出调用对象列表，兼容三种形状：
/// {"tool_calls":[...]} / 顶层数组 / 单个调用对象
fn extract_call_objects(raw: &str) -> Result<Vec<serde_json::Value>, String> {
    let value: serde_json::Value =
        serde_json::from_str(raw.trim()).map_err(|e| format!("回复不是合法 JSON: {}", e))?;

    match value {
        serde_json::Value::Object(ref obj) if obj.contains_key("tool_calls") => {
            match &obj["tool_calls"] {
                serde_json::Value::Array(items) => Ok(items.clone()),
                other => Err(format!("tool_calls 不是数组: {}", other)),
            }
        }
        serde_json::Value::Array(items) => Ok(items),
        obj @ serde_json::Value::Object(_) => Ok(vec![obj]),
        other => Err(format!("回复形状无法识别: {}", other)),
    }
}

/// 合成器：持有专用的 JSON 模式客户端
pub struct ToolCallSynthesizer {
    llm: Arc<dyn LlmClient>,
    max_retries: usize,
}

impl ToolCallSynthesizer {
    pub fn new(llm: Arc<dyn LlmClient>, max_retries: usize) -> Self {
        Self {
            llm,
            max_retries: max_retries.max(1),
        }
    }

    /// 闭世界 system prompt：只列当前候选函数的名字、描述与参数键
    fn build_system_prompt(tools: &[ToolSchema]) -> String {
        let mut listing = String::new();
        for schema in tools {
            let keys = schema
                .function
                .parameters
                .get("properties")
                .and_then(|p| p.as_object())
                .map(|p| p.keys().cloned().collect::<Vec<_>>().join(", "))
                .unwrap_or_default();
            listing.push_str(&format!(
                "- {}: {} (parameters: {})\n",
                schema.function.name, schema.function.description, keys
            ));
        }

        format!(
            "You are a function-call synthesizer. Convert the instruction into calls \
to the available functions. Respond with JSON only, in exactly this shape:\n\
{{\"tool_calls\": [{{\"type\": \"function\", \"function\": {{\"name\": \"...\", \"arguments\": \"{{...}}\"}}}}]}}\n\
Only use function names from the list below. arguments must be a JSON object \
matching the function's parameters. If no listed function fits the instruction, \
respond with {{\"tool_calls\": []}}.\n\nAvailable functions:\n{}",
            listing
        )
    }

    /// 改写指令让下一次尝试更容易成功；改写失败时截断原指令兜底
    async fn rewrite_instruction(&self, instruction: &str) -> String {
        let messages = vec![
            ChatMessage::system(
                "Rewrite the tool instruction below so it is short and unambiguous. \
Keep every concrete argument value. Reply with the rewritten instruction only.",
            ),
            ChatMessage::user(instruction),
        ];

        match self.llm.complete(&messages).await {
            Ok(out) if !out.content.trim().is_empty() => out.content.trim().to_string(),
            _ => {
                warn!("指令改写失败，截断原指令兜底");
                instruction.chars().take(TRUNCATE_CHARS).collect()
            }
        }
    }

    /// 把一条工具请求段合成为结构化调用列表
    ///
    /// 空列表是正常结果（请求不对应任何现存工具时模型应拒绝），调用方不应视为错误。
    pub async fn synthesize(
        &self,
        instruction: &str,
        tools: &[ToolSchema],
    ) -> (Vec<ToolCall>, RetryStats) {
        let mut stats = RetryStats::default();

        if tools.is_empty() {
            stats.errors.push("没有可用工具".to_string());
            return (Vec::new(), stats);
        }

        let live_tools: HashSet<String> =
            tools.iter().map(|t| t.function.name.clone()).collect();
        let mut instruction = instruction.to_string();

        for attempt in 0..self.max_retries {
            stats.attempts = attempt + 1;

            if attempt >= 1 {
                instruction = self.rewrite_instruction(&instruction).await;
            }

            // 候选工具收缩保持发现顺序的前缀
            let keep = shrink_count(tools.len(), attempt);
            let candidates = &tools[..keep];

            let messages = vec![
                ChatMessage::system(Self::build_system_prompt(candidates)),
                ChatMessage::user(instruction.as_str()),
            ];

            let raw = match self.llm.complete_json(&messages).await {
                Ok(raw) => raw,
                Err(e) => {
                    stats.errors.push(format!("尝试 {}: 模型调用失败: {}", attempt, e));
                    continue;
                }
            };

            let objects = match extract_call_objects(&raw) {
                Ok(objects) => objects,
                Err(e) => {
                    stats.errors.push(format!("尝试 {}: {}", attempt, e));
                    continue;
                }
            };

            stats.total_calls += objects.len();

            let mut valid = Vec::new();
            for object in &objects {
                match validate_call(object, &live_tools) {
                    Ok(call) => valid.push(call),
                    Err(e) => {
                        stats.invalid_calls += 1;
                        debug!("丢弃无效调用: {}", e);
                    }
                }
            }

            if objects.is_empty() {
                // 模型明确表示无匹配函数，接受为空结果
                stats.success = true;
                return (Vec::new(), stats);
            }

            if !valid.is_empty() {
                stats.valid_calls = valid.len();
                stats.success = true;
                return (valid, stats);
            }

            stats
                .errors
                .push(format!("尝试 {}: {} 个调用全部未过校验", attempt, objects.len()));
        }

        warn!(attempts = stats.attempts, "工具调用合成重试耗尽");
        (Vec::new(), stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    fn schema(name: &str) -> ToolSchema {
        ToolSchema {
            schema_type: "function".to_string(),
            function: crate::mcp::protocol::FunctionSchema {
                name: name.to_string(),
                description: format!("{} tool", name),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {"path": {"type": "string"}}
                }),
            },
        }
    }

    fn live(names: &[&str]) -> HashSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_shrink_is_monotonic_with_floor() {
        assert_eq!(shrink_count(8, 0), 8);
        assert_eq!(shrink_count(8, 1), 6);
        assert_eq!(shrink_count(8, 2), 4);
        assert_eq!(shrink_count(8, 3), 2);
        assert_eq!(shrink_count(8, 7), 2);
        assert_eq!(shrink_count(1, 5), 1);
        assert_eq!(shrink_count(0, 2), 0);
    }

    #[test]
    fn test_gate_accepts_string_object_arguments_only() {
        let tools = live(&["read_file"]);

        let string_args = serde_json::json!({
            "type": "function",
            "function": {"name": "read_file", "arguments": "{\"path\": \"/tmp/a\"}"}
        });
        let call = validate_call(&string_args, &tools).unwrap();
        assert_eq!(call.function.name, "read_file");
        assert!(call.id.starts_with("call_"));

        // 对象形式的 arguments 不做序列化修补，直接拒绝
        let object_args = serde_json::json!({
            "type": "function",
            "function": {"name": "read_file", "arguments": {"path": "/tmp/a"}}
        });
        assert!(validate_call(&object_args, &tools).is_err());
    }

    #[test]
    fn test_gate_rejects_missing_arguments() {
        let tools = live(&["read_file"]);
        let no_args = serde_json::json!({
            "type": "function",
            "function": {"name": "read_file"}
        });
        assert!(validate_call(&no_args, &tools).is_err());
    }

    #[test]
    fn test_gate_rejects_unknown_name_and_bad_arguments() {
        let tools = live(&["read_file"]);

        let unknown = serde_json::json!({
            "type": "function",
            "function": {"name": "write_file", "arguments": "{}"}
        });
        assert!(validate_call(&unknown, &tools).is_err());

        let bad_args = serde_json::json!({
            "type": "function",
            "function": {"name": "read_file", "arguments": "not json"}
        });
        assert!(validate_call(&bad_args, &tools).is_err());

        let array_args = serde_json::json!({
            "type": "function",
            "function": {"name": "read_file", "arguments": "[1, 2]"}
        });
        assert!(validate_call(&array_args, &tools).is_err());

        let wrong_type = serde_json::json!({
            "type": "tool",
            "function": {"name": "read_file", "arguments": "{}"}
        });
        assert!(validate_call(&wrong_type, &tools).is_err());
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let llm = Arc::new(ScriptedLlmClient::with_replies(vec![
            r#"{"tool_calls": [{"type": "function", "function": {"name": "read_file", "arguments": "{\"path\": \"/tmp/a\"}"}}]}"#,
        ]));
        let synth = ToolCallSynthesizer::new(llm, 5);

        let (calls, stats) = synth.synthesize("read /tmp/a", &[schema("read_file")]).await;
        assert_eq!(calls.len(), 1);
        assert!(stats.success);
        assert_eq!(stats.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_after_invalid_reply() {
        // 第一次回非法 JSON，第二次改写指令，第三次合成成功
        let llm = Arc::new(ScriptedLlmClient::with_replies(vec![
            "this is not json",
            "read the file /tmp/a",
            r#"{"tool_calls": [{"type": "function", "function": {"name": "read_file", "arguments": "{\"path\": \"/tmp/a\"}"}}]}"#,
        ]));
        let synth = ToolCallSynthesizer::new(llm, 5);

        let (calls, stats) = synth.synthesize("read /tmp/a please", &[schema("read_file")]).await;
        assert_eq!(calls.len(), 1);
        assert!(stats.success);
        assert_eq!(stats.attempts, 2);
        assert_eq!(stats.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_returns_empty_not_error() {
        let llm = Arc::new(ScriptedLlmClient::new(vec![
            Err("network down".to_string()),
            Err("network down".to_string()),
            Err("network down".to_string()),
            Err("network down".to_string()),
        ]));
        let synth = ToolCallSynthesizer::new(llm, 2);

        let (calls, stats) = synth.synthesize("read /tmp/a", &[schema("read_file")]).await;
        assert!(calls.is_empty());
        assert!(!stats.success);
        assert_eq!(stats.attempts, 2);
    }

    #[tokio::test]
    async fn test_explicit_empty_tool_calls_accepted() {
        let llm = Arc::new(ScriptedLlmClient::with_replies(vec![r#"{"tool_calls": []}"#]));
        let synth = ToolCallSynthesizer::new(llm, 5);

        let (calls, stats) = synth
            .synthesize("order a pizza", &[schema("read_file")])
            .await;
        assert!(calls.is_empty());
        assert!(stats.success);
    }
}
