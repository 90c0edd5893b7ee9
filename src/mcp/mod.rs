//! 工具服务器接入层：wire 协议、子进程会话、会话池与启动器

pub mod launcher;
pub mod pool;
pub mod protocol;
pub mod session;

pub use launcher::{Launcher, SessionTimeouts};
pub use pool::SessionPool;
pub use protocol::{FunctionSchema, ToolDefinition, ToolSchema};
pub use session::{StdioToolSession, ToolSession};
