//! Agent 错误类型
//!
//! 所有边界（模型调用、合成、工具执行、会话传输）返回 Result<_, AgentError>；
//! 校验门拒绝的合成调用不是错误（丢弃并计入 RetryStats），process_query 顶层兜底不向调用方抛错。

use thiserror::Error;

/// Agent 运行过程中可能出现的错误（模型、配置、工具、子进程会话等）
#[derive(Error, Debug)]
pub enum AgentError {
    /// 推理 / 合成模型未返回可用响应（choices 为空、请求失败等）
    #[error("LLM error: {0}")]
    LlmError(String),

    /// 生命周期顺序错误（如未 start 就查询工具列表）
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    /// 工具服务器重名注册（注册期快速失败）
    #[error("Duplicate server name: {0}")]
    DuplicateServer(String),

    /// 注册时工具服务器脚本 / 可执行文件不存在（注册期快速失败）
    #[error("Server artifact not found: {0}")]
    ServerNotFound(String),

    /// 子进程会话传输层错误（spawn、管道、JSON-RPC 协议）
    #[error("Session error: {0}")]
    SessionError(String),

    #[error("JSON parse error: {0}")]
    JsonParseError(String),

    #[error("Cancelled by user")]
    Cancelled,
}
