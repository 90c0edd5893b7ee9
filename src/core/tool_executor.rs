//! 工具执行器
//!
//! 接收结构化调用，解析参数后经会话池路由执行，带单次调用超时。
//! 每次执行写一条 JSON 审计日志（event=tool_audit）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::info;

use crate::conversation::ToolCall;
use crate::core::error::AgentError;
use crate::mcp::SessionPool;

/// 审计日志里参数预览的最大字符数
const ARGS_PREVIEW_CHARS: usize = 200;

fn args_preview(arguments: &str) -> String {
    if arguments.chars().count() <= ARGS_PREVIEW_CHARS {
        arguments.to_string()
    } else {
        let preview: String = arguments.chars().take(ARGS_PREVIEW_CHARS).collect();
        format!("{}...", preview)
    }
}

/// 工具执行器：会话池之上的调用入口
pub struct ToolExecutor {
    pool: Arc<SessionPool>,
    tool_timeout: Duration,
}

impl ToolExecutor {
    pub fn new(pool: Arc<SessionPool>, tool_timeout: Duration) -> Self {
        Self { pool, tool_timeout }
    }

    /// 执行单个调用，返回文本观察值
    pub async fn execute(&self, call: &ToolCall) -> Result<String, AgentError> {
        let tool = &call.function.name;
        let arguments = call
            .parsed_arguments()
            .map_err(|e| AgentError::JsonParseError(format!("工具参数解析失败: {}", e)))?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.tool_timeout, self.pool.call(tool, arguments))
            .await
            .map_err(|_| {
                AgentError::ToolTimeout(format!(
                    "{} 超过 {} 秒未返回",
                    tool,
                    self.tool_timeout.as_secs()
                ))
            })
            .and_then(|r| r);
        let elapsed_ms = started.elapsed().as_millis() as u64;

        // 审计日志：一行 JSON，便于离线抽取
        let audit = serde_json::json!({
            "event": "tool_audit",
            "call_id": call.id,
            "tool": tool,
            "args": args_preview(&call.function.arguments),
            "ok": result.is_ok(),
            "duration_ms": elapsed_ms,
        });
        info!("{}", audit);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::conversation::FunctionCall;
    use crate::mcp::protocol::ToolDefinition;
    use crate::mcp::session::ToolSession;

    struct SlowSession {
        delay: Duration,
    }

    #[async_trait]
    impl ToolSession for SlowSession {
        fn name(&self) -> &str {
            "slow"
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
            Ok(vec![ToolDefinition {
                name: "sleepy".to_string(),
                description: String::new(),
                input_schema: serde_json::json!({"type": "object"}),
            }])
        }

        async fn call_tool(
            &self,
            _tool_name: &str,
            _arguments: serde_json::Value,
        ) -> Result<String, AgentError> {
            tokio::time::sleep(self.delay).await;
            Ok("done".to_string())
        }

        async fn shutdown(&self) -> Result<(), AgentError> {
            Ok(())
        }
    }

    fn call(name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: "call_test1".to_string(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_execute_routes_through_pool() {
        let pool = Arc::new(SessionPool::new());
        pool.add_session(Arc::new(SlowSession {
            delay: Duration::from_millis(0),
        }))
        .await
        .unwrap();

        let executor = ToolExecutor::new(pool, Duration::from_secs(1));
        let result = executor.execute(&call("sleepy", "{}")).await.unwrap();
        assert_eq!(result, "done");
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_timeout() {
        let pool = Arc::new(SessionPool::new());
        pool.add_session(Arc::new(SlowSession {
            delay: Duration::from_secs(5),
        }))
        .await
        .unwrap();

        let executor = ToolExecutor::new(pool, Duration::from_millis(20));
        let err = executor.execute(&call("sleepy", "{}")).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolTimeout(_)));
    }

    #[tokio::test]
    async fn test_bad_arguments_rejected_before_dispatch() {
        let pool = Arc::new(SessionPool::new());
        let executor = ToolExecutor::new(pool, Duration::from_secs(1));

        let err = executor.execute(&call("sleepy", "not json")).await.unwrap_err();
        assert!(matches!(err, AgentError::JsonParseError(_)));
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = "x".repeat(500);
        let preview = args_preview(&long);
        assert!(preview.ends_with("..."));
        assert_eq!(preview.chars().count(), ARGS_PREVIEW_CHARS + 3);
    }
}
