//! Hive - Rust LLM 智能体编排核心
//!
//! 模块总览：
//! - `agent`：对外门面（add_tool / initialize / process_query / shutdown）
//! - `config`：TOML + 环境变量配置
//! - `conversation`：只追加转录与供应商历史适配
//! - `core`：错误类型、编排器、工具执行器
//! - `llm`：LLM 客户端（OpenAI 兼容 / DeepSeek / Mock）
//! - `mcp`：工具服务器接入（stdio JSON-RPC 子进程、会话池、启动器）
//! - `react`：推理 -> 合成 -> 执行 -> 观察的主循环
//! - `observability`：日志初始化

pub mod agent;
pub mod config;
pub mod conversation;
pub mod core;
pub mod llm;
pub mod mcp;
pub mod observability;
pub mod react;

pub use agent::Agent;
pub use config::{load_config, AppConfig};
pub use core::AgentError;
