//! 会话注册表
//!
//! 扁平的 tool_name -> session 映射，在会话加入时做一次发现并固定下来。
//! 同名工具先到先得，后来的注册只告警不覆盖。

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::core::error::AgentError;
use crate::mcp::protocol::ToolSchema;
use crate::mcp::session::ToolSession;

/// 会话池：持有所有活跃会话，并维护工具到会话的路由表
#[derive(Default)]
pub struct SessionPool {
    sessions: RwLock<HashMap<String, Arc<dyn ToolSession>>>,
    tool_to_session: RwLock<HashMap<String, String>>,
    /// 每个会话发现到的模型侧 schema，发现后不再变化
    schemas: RwLock<HashMap<String, Vec<ToolSchema>>>,
}

impl SessionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// 加入会话并立即发现其工具；发现失败时会话不入池
    pub async fn add_session(&self, session: Arc<dyn ToolSession>) -> Result<(), AgentError> {
        let server_name = session.name().to_string();
        let tools = session.list_tools().await?;

        let schemas: Vec<ToolSchema> = tools.into_iter().map(|t| t.into_schema()).collect();

        let mut routes = self.tool_to_session.write().await;
        for schema in &schemas {
            let tool_name = &schema.function.name;
            if let Some(owner) = routes.get(tool_name) {
                warn!(tool = %tool_name, owner = %owner, newcomer = %server_name,
                    "工具名冲突，保留先注册的会话");
                continue;
            }
            routes.insert(tool_name.clone(), server_name.clone());
        }
        drop(routes);

        info!(server = %server_name, tools = schemas.len(), "工具服务器已入池");
        self.schemas.write().await.insert(server_name.clone(), schemas);
        self.sessions.write().await.insert(server_name, session);
        Ok(())
    }

    /// 所有会话的工具 schema 快照，按服务器分组
    pub async fn discover_tools(&self) -> HashMap<String, Vec<ToolSchema>> {
        self.schemas.read().await.clone()
    }

    /// 全池聚合后的工具 schema 列表
    pub async fn all_schemas(&self) -> Vec<ToolSchema> {
        self.schemas.read().await.values().flatten().cloned().collect()
    }

    /// 按工具名路由到所属会话并调用
    pub async fn call(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, AgentError> {
        let server_name = {
            let routes = self.tool_to_session.read().await;
            routes.get(tool_name).cloned()
        };
        let server_name = server_name.ok_or_else(|| {
            AgentError::ToolExecutionFailed(format!("未知工具: {}", tool_name))
        })?;

        let session = {
            let sessions = self.sessions.read().await;
            sessions.get(&server_name).cloned()
        };
        let session = session.ok_or_else(|| {
            AgentError::SessionError(format!("工具 {} 所属会话 {} 已不在池中", tool_name, server_name))
        })?;

        // 锁外调用，避免长调用阻塞注册表
        session.call_tool(tool_name, arguments).await
    }

    /// 关闭并清空全部会话；逐个关闭，失败聚合上报。空池是 no-op
    pub async fn cleanup(&self) -> Result<(), AgentError> {
        let sessions: Vec<Arc<dyn ToolSession>> =
            self.sessions.write().await.drain().map(|(_, s)| s).collect();
        self.tool_to_session.write().await.clear();
        self.schemas.write().await.clear();

        let results = futures_util::future::join_all(
            sessions.iter().map(|s| s.shutdown()),
        )
        .await;

        let mut failures = Vec::new();
        for (session, result) in sessions.iter().zip(results) {
            if let Err(e) = result {
                warn!(server = %session.name(), "会话关闭失败: {}", e);
                failures.push(format!("{}: {}", session.name(), e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AgentError::SessionError(format!(
                "部分会话关闭失败: {}",
                failures.join("; ")
            )))
        }
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::mcp::protocol::ToolDefinition;

    struct FakeSession {
        name: String,
        tools: Vec<&'static str>,
        fail_discovery: bool,
    }

    #[async_trait]
    impl ToolSession for FakeSession {
        fn name(&self) -> &str {
            &self.name
        }

        async fn list_tools(&self) -> Result<Vec<ToolDefinition>, AgentError> {
            if self.fail_discovery {
                return Err(AgentError::SessionError("discovery failed".into()));
            }
            Ok(self
                .tools
                .iter()
                .map(|t| ToolDefinition {
                    name: t.to_string(),
                    description: String::new(),
                    input_schema: serde_json::json!({"type": "object"}),
                })
                .collect())
        }

        async fn call_tool(
            &self,
            tool_name: &str,
            _arguments: serde_json::Value,
        ) -> Result<String, AgentError> {
            Ok(format!("{} handled by {}", tool_name, self.name))
        }

        async fn shutdown(&self) -> Result<(), AgentError> {
            Ok(())
        }
    }

    fn fake(name: &str, tools: Vec<&'static str>) -> Arc<dyn ToolSession> {
        Arc::new(FakeSession {
            name: name.to_string(),
            tools,
            fail_discovery: false,
        })
    }

    #[tokio::test]
    async fn test_routing_by_tool_name() {
        let pool = SessionPool::new();
        pool.add_session(fake("files", vec!["read_file"])).await.unwrap();
        pool.add_session(fake("web", vec!["fetch_url"])).await.unwrap();

        let result = pool.call("fetch_url", serde_json::json!({})).await.unwrap();
        assert_eq!(result, "fetch_url handled by web");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_error() {
        let pool = SessionPool::new();
        let err = pool.call("nope", serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecutionFailed(_)));
    }

    #[tokio::test]
    async fn test_name_conflict_keeps_first() {
        let pool = SessionPool::new();
        pool.add_session(fake("first", vec!["shared"])).await.unwrap();
        pool.add_session(fake("second", vec!["shared"])).await.unwrap();

        let result = pool.call("shared", serde_json::json!({})).await.unwrap();
        assert_eq!(result, "shared handled by first");
    }

    #[tokio::test]
    async fn test_failed_discovery_not_pooled() {
        let pool = SessionPool::new();
        let session = Arc::new(FakeSession {
            name: "broken".into(),
            tools: vec![],
            fail_discovery: true,
        });
        assert!(pool.add_session(session).await.is_err());
        assert_eq!(pool.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_cleanup_idempotent() {
        let pool = SessionPool::new();
        pool.add_session(fake("files", vec!["read_file"])).await.unwrap();
        pool.cleanup().await.unwrap();
        assert_eq!(pool.session_count().await, 0);
        // 再清一次也应成功
        pool.cleanup().await.unwrap();
    }
}
