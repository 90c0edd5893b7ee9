//! Agent 门面
//!
//! 对外只暴露五个动作：add_tool / initialize / process_query / shutdown / history。
//! 未显式 initialize 时首次查询自动启动。

use std::path::PathBuf;

use crate::config::AppConfig;
use crate::conversation::ConversationHistory;
use crate::core::error::AgentError;
use crate::core::orchestrator::Orchestrator;

/// 从服务器路径推导注册名：优先取所在目录名，退而取文件名（不含扩展名）
fn derive_server_name(path: &std::path::Path) -> Option<String> {
    path.parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .map(String::from)
        .or_else(|| {
            path.file_stem()
                .and_then(|n| n.to_str())
                .map(String::from)
        })
}

/// 智能体门面：一份对话 + 一组工具服务器
pub struct Agent {
    orchestrator: Orchestrator,
}

impl Agent {
    pub fn new(config: AppConfig) -> Self {
        Self {
            orchestrator: Orchestrator::new(config),
        }
    }

    /// 附带领域 system prompt 的便捷构造
    pub fn with_system_prompt(mut config: AppConfig, prompt: &str) -> Self {
        config.agent.custom_system_prompt = Some(prompt.to_string());
        Self::new(config)
    }

    /// 测试注入口：直接用装配好的编排器
    pub fn from_orchestrator(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// 注册工具服务器；name 为 None 时从路径推导。启动后注册立即生效
    pub async fn add_tool(
        &mut self,
        path: impl Into<PathBuf>,
        name: Option<&str>,
    ) -> Result<(), AgentError> {
        let path = path.into();
        let name = match name {
            Some(n) => n.to_string(),
            None => derive_server_name(&path).ok_or_else(|| {
                AgentError::ConfigError(format!(
                    "无法从路径推导服务器名: {}",
                    path.display()
                ))
            })?,
        };
        self.orchestrator.register_server(&name, path).await
    }

    /// 启动全部工具服务器；可省略，首次查询会自动启动
    pub async fn initialize(&mut self) -> Result<(), AgentError> {
        self.orchestrator.start().await
    }

    /// 处理一次查询，总是返回面向用户的文本
    pub async fn process_query(&mut self, query: &str) -> String {
        self.orchestrator.process_query(query).await
    }

    /// 取消当前查询
    pub fn cancel(&self) {
        self.orchestrator.cancel();
    }

    /// 关闭全部工具服务器；幂等
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        self.orchestrator.shutdown().await
    }

    pub fn history(&self) -> &ConversationHistory {
        self.orchestrator.history()
    }

    pub fn clear_history(&mut self) {
        self.orchestrator.clear_history();
    }

    /// 推理模型累计 token 使用
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.orchestrator.token_usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_name_from_parent_dir() {
        let name = derive_server_name(std::path::Path::new("/opt/tools/weather/server"));
        assert_eq!(name.as_deref(), Some("weather"));
    }

    #[test]
    fn test_derive_name_falls_back_to_stem() {
        let name = derive_server_name(std::path::Path::new("weather-server"));
        assert_eq!(name.as_deref(), Some("weather-server"));
    }
}
