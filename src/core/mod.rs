//! 核心层：错误类型、编排器与工具执行器

pub mod error;
pub mod orchestrator;
pub mod tool_executor;

pub use error::AgentError;
pub use orchestrator::Orchestrator;
pub use tool_executor::ToolExecutor;
