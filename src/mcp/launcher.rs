//! 工具服务器启动器
//!
//! 注册阶段只记录 (名字, 路径) 并做快速校验；launch_all 时逐个拉起子进程入池。
//! 单个服务器启动失败不影响其余服务器，只记错误日志。

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::core::error::AgentError;
use crate::mcp::pool::SessionPool;
use crate::mcp::session::StdioToolSession;

/// 会话层超时配置
#[derive(Debug, Clone)]
pub struct SessionTimeouts {
    pub request_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(3),
        }
    }
}

/// 按注册顺序启动工具服务器子进程
pub struct Launcher {
    pool: Arc<SessionPool>,
    /// 注册顺序决定发现顺序，用 Vec 保序
    servers: Vec<(String, PathBuf)>,
    names: HashSet<String>,
    timeouts: SessionTimeouts,
}

impl Launcher {
    pub fn new(pool: Arc<SessionPool>, timeouts: SessionTimeouts) -> Self {
        Self {
            pool,
            servers: Vec::new(),
            names: HashSet::new(),
            timeouts,
        }
    }

    /// 注册服务器。重名和路径不存在立即报错
    pub fn register_server(&mut self, name: &str, path: PathBuf) -> Result<(), AgentError> {
        if self.names.contains(name) {
            return Err(AgentError::DuplicateServer(name.to_string()));
        }
        if !path.exists() {
            return Err(AgentError::ServerNotFound(format!(
                "{}: {}",
                name,
                path.display()
            )));
        }
        self.names.insert(name.to_string());
        self.servers.push((name.to_string(), path));
        Ok(())
    }

    /// 注册的服务器数
    pub fn server_count(&self) -> usize {
        self.servers.len()
    }

    /// 拉起子进程并入池（含握手与工具发现）
    async fn spawn_and_pool(&self, name: &str, path: &Path) -> Result<(), AgentError> {
        let session = StdioToolSession::spawn(
            name,
            path,
            self.timeouts.request_timeout,
            self.timeouts.shutdown_grace,
        )
        .await?;
        self.pool.add_session(Arc::new(session)).await
    }

    /// 逐个拉起已注册的服务器；失败隔离，返回成功入池的数量
    pub async fn launch_all(&self) -> usize {
        let mut launched = 0;
        for (name, path) in &self.servers {
            match self.spawn_and_pool(name, path).await {
                Ok(()) => launched += 1,
                Err(e) => error!(server = %name, "启动或发现失败，跳过该服务器: {}", e),
            }
        }
        info!(launched, total = self.servers.len(), "工具服务器启动完成");
        launched
    }

    /// 运行中注册：校验后立即拉起并入池（启动后新增的服务器走这里）
    pub async fn register_and_launch(
        &mut self,
        name: &str,
        path: PathBuf,
    ) -> Result<(), AgentError> {
        self.register_server(name, path.clone())?;
        self.spawn_and_pool(name, &path).await
    }

    /// 关闭全部会话（委托给池，幂等）
    pub async fn shutdown(&self) -> Result<(), AgentError> {
        self.pool.cleanup().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_rejected() {
        let pool = Arc::new(SessionPool::new());
        let mut launcher = Launcher::new(pool, SessionTimeouts::default());

        let artifact = tempfile::NamedTempFile::new().unwrap();
        let path = artifact.path().to_path_buf();

        launcher.register_server("srv", path.clone()).unwrap();
        let err = launcher.register_server("srv", path).unwrap_err();
        assert!(matches!(err, AgentError::DuplicateServer(_)));
    }

    #[test]
    fn test_missing_path_rejected() {
        let pool = Arc::new(SessionPool::new());
        let mut launcher = Launcher::new(pool, SessionTimeouts::default());

        let err = launcher
            .register_server("ghost", PathBuf::from("/no/such/server"))
            .unwrap_err();
        assert!(matches!(err, AgentError::ServerNotFound(_)));
        assert_eq!(launcher.server_count(), 0);
    }
}
