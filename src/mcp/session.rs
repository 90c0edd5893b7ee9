//! 工具服务器会话
//!
//! ToolSession 是对单个工具服务器的抽象；StdioToolSession 把服务器作为子进程拉起，
//! 走 stdin/stdout 的换行 JSON-RPC。请求串行化，响应按 id 关联（中间插入的通知行被跳过）。

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::error::AgentError;
use crate::mcp::protocol::{
    ClientInfo, InitializeParams, JsonRpcRequest, JsonRpcResponse, ToolCallParams, ToolCallResult,
    ToolDefinition,
};

/// 单个工具服务器会话的抽象（测试里可用假实现替换子进程）
#[async_trait]
pub trait ToolSession: Send + Sync {
    /// 会话名（即服务器注册名）
    fn name(&self) -> &str;

    /// 列出服务器提供的工具
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, AgentError>;

    /// 调用工具，返回规整后的文本结果
    async fn call_tool(&self, tool_name: &str, arguments: serde_json::Value)
        -> Result<String, AgentError>;

    /// 关闭会话，有界等待后强杀
    async fn shutdown(&self) -> Result<(), AgentError>;
}

struct Pipes {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// 子进程 stdio 会话
pub struct StdioToolSession {
    server_name: String,
    child: Mutex<Option<Child>>,
    pipes: Mutex<Pipes>,
    next_id: AtomicU64,
    request_timeout: Duration,
    shutdown_grace: Duration,
}

impl StdioToolSession {
    /// 拉起子进程并完成 initialize 握手
    pub async fn spawn(
        server_name: &str,
        path: &Path,
        request_timeout: Duration,
        shutdown_grace: Duration,
    ) -> Result<Self, AgentError> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                AgentError::SessionError(format!("无法启动工具服务器 {}: {}", server_name, e))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            AgentError::SessionError(format!("工具服务器 {} 没有 stdin 管道", server_name))
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            AgentError::SessionError(format!("工具服务器 {} 没有 stdout 管道", server_name))
        })?;

        // stderr 转发到日志，避免子进程写满管道阻塞
        if let Some(stderr) = child.stderr.take() {
            let name = server_name.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(server = %name, "stderr: {}", line);
                }
            });
        }

        let session = Self {
            server_name: server_name.to_string(),
            child: Mutex::new(Some(child)),
            pipes: Mutex::new(Pipes {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            next_id: AtomicU64::new(1),
            request_timeout,
            shutdown_grace,
        };

        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&self) -> Result<(), AgentError> {
        let params = InitializeParams {
            protocol_version: "2024-11-05".to_string(),
            client_info: ClientInfo {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        };
        let params = serde_json::to_value(params)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;

        self.request("initialize", Some(params)).await?;

        // 握手完成通知（无 id，不等回复）
        let note = serde_json::json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        let mut pipes = self.pipes.lock().await;
        Self::write_line(&mut pipes.stdin, &note, &self.server_name).await
    }

    async fn write_line(
        stdin: &mut ChildStdin,
        value: &serde_json::Value,
        server_name: &str,
    ) -> Result<(), AgentError> {
        let mut line = value.to_string();
        line.push('\n');
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            AgentError::SessionError(format!("写入工具服务器 {} 失败: {}", server_name, e))
        })?;
        stdin.flush().await.map_err(|e| {
            AgentError::SessionError(format!("写入工具服务器 {} 失败: {}", server_name, e))
        })
    }

    /// 发一条请求并读到对应 id 的响应；整体受 request_timeout 约束
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, AgentError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let request = serde_json::to_value(&request)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;

        let mut pipes = self.pipes.lock().await;

        let fut = async {
            Self::write_line(&mut pipes.stdin, &request, &self.server_name).await?;

            loop {
                let mut line = String::new();
                let n = pipes.stdout.read_line(&mut line).await.map_err(|e| {
                    AgentError::SessionError(format!(
                        "读取工具服务器 {} 失败: {}",
                        self.server_name, e
                    ))
                })?;
                if n == 0 {
                    return Err(AgentError::SessionError(format!(
                        "工具服务器 {} 已关闭 stdout",
                        self.server_name
                    )));
                }
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<JsonRpcResponse>(line) {
                    Ok(resp) if resp.id == Some(id) => {
                        return resp.into_result().map_err(AgentError::SessionError);
                    }
                    Ok(_) => {
                        // 其他 id 或服务端通知，跳过
                        debug!(server = %self.server_name, "跳过无关响应行");
                    }
                    Err(e) => {
                        warn!(server = %self.server_name, "无法解析的响应行: {}", e);
                    }
                }
            }
        };

        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| {
                AgentError::SessionError(format!(
                    "工具服务器 {} 请求 {} 超时",
                    self.server_name, method
                ))
            })?
    }
}

#[async_trait]
impl ToolSession for StdioToolSession {
    fn name(&self) -> &str {
        &self.server_name
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
        let result = self.request("tools/list", None).await?;
        let tools = result.get("tools").cloned().unwrap_or(serde_json::json!([]));
        serde_json::from_value(tools).map_err(|e| {
            AgentError::JsonParseError(format!(
                "工具服务器 {} 的 tools/list 结果无法解析: {}",
                self.server_name, e
            ))
        })
    }

    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, AgentError> {
        let params = ToolCallParams {
            name: tool_name.to_string(),
            arguments,
        };
        let params = serde_json::to_value(params)
            .map_err(|e| AgentError::JsonParseError(e.to_string()))?;

        let result = self.request("tools/call", Some(params)).await?;
        let result: ToolCallResult = serde_json::from_value(result).map_err(|e| {
            AgentError::JsonParseError(format!(
                "工具 {} 的调用结果无法解析: {}",
                tool_name, e
            ))
        })?;

        let text = result
            .content
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n");

        if result.is_error {
            return Err(AgentError::ToolExecutionFailed(format!(
                "{}: {}",
                tool_name, text
            )));
        }
        Ok(text)
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return Ok(()); // 已经关过
        };

        // 关闭 stdin 让服务器看到 EOF，宽限期内等自然退出，超时强杀
        {
            let mut pipes = self.pipes.lock().await;
            let _ = pipes.stdin.shutdown().await;
        }
        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!(server = %self.server_name, %status, "工具服务器已退出");
                Ok(())
            }
            Ok(Err(e)) => Err(AgentError::SessionError(format!(
                "等待工具服务器 {} 退出失败: {}",
                self.server_name, e
            ))),
            Err(_) => {
                warn!(server = %self.server_name, "工具服务器未在宽限期内退出，强制终止");
                child.kill().await.map_err(|e| {
                    AgentError::SessionError(format!(
                        "终止工具服务器 {} 失败: {}",
                        self.server_name, e
                    ))
                })
            }
        }
    }
}
