//! ReAct 主循环
//!
//! 推理 -> 合成 -> 执行 -> 观察回写，直到模型给出无工具请求的最终回复，
//! 或达到最大迭代数。所有失败路径都折叠为面向用户的降级文本，不向外抛错。

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::conversation::ConversationHistory;
use crate::core::error::AgentError;
use crate::core::tool_executor::ToolExecutor;
use crate::mcp::protocol::ToolSchema;
use crate::react::planner::Planner;
use crate::react::synthesizer::ToolCallSynthesizer;

/// 默认最大迭代数
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// 查询处理器：组合 Planner / 合成器 / 执行器跑完整的一次查询
pub struct QueryProcessor<'a> {
    pub planner: &'a Planner,
    pub synthesizer: &'a ToolCallSynthesizer,
    pub executor: &'a ToolExecutor,
    pub max_iterations: usize,
    pub cancel_token: CancellationToken,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(
        planner: &'a Planner,
        synthesizer: &'a ToolCallSynthesizer,
        executor: &'a ToolExecutor,
        max_iterations: usize,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            planner,
            synthesizer,
            executor,
            max_iterations: max_iterations.max(1),
            cancel_token,
        }
    }

    /// 处理一次用户查询，总是返回面向用户的文本
    pub async fn process_query(
        &self,
        history: &mut ConversationHistory,
        tools: &[ToolSchema],
        user_query: &str,
    ) -> String {
        history.add_user(user_query);

        let mut last_content = String::new();

        for iteration in 0..self.max_iterations {
            if self.cancel_token.is_cancelled() {
                warn!(iteration, "查询被取消");
                return finish(history, degraded_reply(&AgentError::Cancelled));
            }

            let output = match self.planner.execute(history, tools).await {
                Ok(output) => output,
                Err(e) => {
                    error!(iteration, "推理步失败: {}", e);
                    return finish(history, degraded_reply(&e));
                }
            };

            if let Some(reasoning) = &output.reasoning {
                debug!(iteration, "模型推理内容: {}", reasoning);
            }

            // 无工具请求即为最终回复
            if output.tool_requests.is_empty() {
                history.add_assistant(output.content.as_str(), None);
                return finish(history, output.content);
            }

            last_content = output.content.clone();
            history.add_assistant_with_requests(output.content, output.tool_requests.clone());

            // 同轮多个请求段按出现顺序串行处理
            for request in &output.tool_requests {
                let (calls, stats) = self.synthesizer.synthesize(request, tools).await;
                debug!(
                    iteration,
                    attempts = stats.attempts,
                    valid = stats.valid_calls,
                    invalid = stats.invalid_calls,
                    "工具调用合成完成"
                );

                // 合成为空时转录保持不变，直接进入下一轮推理
                if calls.is_empty() {
                    debug!(iteration, "请求段未合成出可执行调用");
                    continue;
                }

                for call in calls {
                    let tool = call.function.name.clone();
                    match self.executor.execute(&call).await {
                        Ok(observation) => {
                            history.add_tool_result(tool.as_str(), observation, Some(call.id));
                        }
                        Err(e) => {
                            warn!(tool = %tool, "工具执行失败: {}", e);
                            history.add_tool_result(
                                tool.as_str(),
                                format!("Error: {}", e),
                                Some(call.id),
                            );
                        }
                    }
                }
            }
        }

        // 达到迭代上限：带着已有进展降级收尾
        warn!(max_iterations = self.max_iterations, "达到迭代上限，降级收尾");
        let fallback = format!(
            "I spent too much time processing your request. Here's what I've gathered so far: {}",
            last_content
        );
        history.add_assistant(fallback.as_str(), None);
        finish(history, fallback)
    }
}

/// 终止路径统一出口：转录写入调试日志后返回回复
fn finish(history: &ConversationHistory, response: String) -> String {
    debug!("对话转录:\n{}", history.format_debug_output());
    response
}

/// 把循环内部的错误折叠为面向用户的降级文本
fn degraded_reply(e: &AgentError) -> String {
    match e {
        AgentError::Cancelled => "Request cancelled.".to_string(),
        e => format!(
            "Sorry, there was a technical problem processing your request. Error: {}",
            e
        ),
    }
}
