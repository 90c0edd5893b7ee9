//! 编排器：组件装配与生命周期
//!
//! 负责：按配置创建推理 / 合成两个 LLM 客户端，装配 Planner、合成器、会话池与
//! 执行器；启动前的注册缓冲到 start 统一拉起，启动后的注册立即拉起并刷新
//! schema 聚合。start / shutdown 幂等，process_query 永不向调用方抛错。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::conversation::ConversationHistory;
use crate::core::error::AgentError;
use crate::core::tool_executor::ToolExecutor;
use crate::llm::{DeepSeekClient, LlmClient, MockLlmClient, OpenAiClient};
use crate::mcp::{Launcher, SessionPool, SessionTimeouts, ToolSchema};
use crate::react::{Planner, QueryProcessor, ToolCallSynthesizer};

/// 根据配置与环境变量选择推理模型后端（DeepSeek / OpenAI 兼容 / Mock）
pub(crate) fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.agent.provider.to_lowercase();
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        info!("推理模型使用 DeepSeek ({})", model);
        Arc::new(DeepSeekClient::new(
            cfg.llm.base_url.as_deref(),
            &model,
            None,
            cfg.llm.request_timeout_secs,
        ))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        info!("推理模型使用 OpenAI 兼容端点 ({})", model);
        Arc::new(OpenAiClient::new(cfg.llm.base_url.as_deref(), &model, None))
    } else {
        warn!("未配置 API Key，推理模型退化为 Mock");
        Arc::new(MockLlmClient)
    }
}

/// 合成器专用客户端：固定 JSON 模式友好的非思考型模型
pub(crate) fn create_tool_calling_llm(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    if std::env::var("DEEPSEEK_API_KEY").is_ok() {
        Arc::new(DeepSeekClient::new(
            cfg.tool_calling.base_url.as_deref(),
            &cfg.tool_calling.model,
            None,
            cfg.llm.request_timeout_secs,
        ))
    } else if std::env::var("OPENAI_API_KEY").is_ok() {
        Arc::new(OpenAiClient::new(
            cfg.tool_calling.base_url.as_deref(),
            &cfg.tool_calling.model,
            None,
        ))
    } else {
        Arc::new(MockLlmClient)
    }
}

/// 编排器：持有一次对话的全部组件
pub struct Orchestrator {
    config: AppConfig,
    pool: Arc<SessionPool>,
    launcher: Launcher,
    planner: Planner,
    synthesizer: ToolCallSynthesizer,
    executor: ToolExecutor,
    history: ConversationHistory,
    /// start 时聚合；启动后再注册服务器会刷新
    tools: Vec<ToolSchema>,
    started: bool,
    cancel_token: CancellationToken,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Self {
        let planner_llm = create_llm_from_config(&config);
        let synth_llm = create_tool_calling_llm(&config);
        Self::with_clients(config, planner_llm, synth_llm)
    }

    /// 注入客户端的构造（测试用 Scripted / Mock 客户端走这里）
    pub fn with_clients(
        config: AppConfig,
        planner_llm: Arc<dyn LlmClient>,
        synth_llm: Arc<dyn LlmClient>,
    ) -> Self {
        let pool = Arc::new(SessionPool::new());
        let timeouts = SessionTimeouts {
            request_timeout: Duration::from_secs(config.session.request_timeout_secs),
            shutdown_grace: Duration::from_secs(config.session.shutdown_grace_secs),
        };
        let launcher = Launcher::new(pool.clone(), timeouts);
        let planner = Planner::new(planner_llm, config.agent.custom_system_prompt.as_deref());
        let synthesizer = ToolCallSynthesizer::new(synth_llm, config.tool_calling.max_retries);
        let executor =
            ToolExecutor::new(pool.clone(), Duration::from_secs(config.tools.tool_timeout_secs));

        Self {
            config,
            pool,
            launcher,
            planner,
            synthesizer,
            executor,
            history: ConversationHistory::new(),
            tools: Vec::new(),
            started: false,
            cancel_token: CancellationToken::new(),
        }
    }

    /// 注册工具服务器。启动前缓冲，等 start 统一拉起；启动后立即拉起并
    /// 刷新聚合的 schema 列表
    pub async fn register_server(&mut self, name: &str, path: PathBuf) -> Result<(), AgentError> {
        if self.started {
            self.launcher.register_and_launch(name, path).await?;
            self.tools = self.pool.all_schemas().await;
            info!(server = %name, tools = self.tools.len(), "运行中注册工具服务器");
            return Ok(());
        }
        self.launcher.register_server(name, path)
    }

    /// 拉起全部已注册服务器并聚合工具 schema；重复调用是 no-op
    pub async fn start(&mut self) -> Result<(), AgentError> {
        if self.started {
            return Ok(());
        }
        self.launcher.launch_all().await;
        self.tools = self.pool.all_schemas().await;
        self.started = true;
        info!(tools = self.tools.len(), "编排器已启动");
        Ok(())
    }

    /// 聚合后的工具 schema；启动前调用是配置错误
    pub fn get_available_tools(&self) -> Result<&[ToolSchema], AgentError> {
        if !self.started {
            return Err(AgentError::ConfigError(
                "编排器尚未启动，无法列出工具".to_string(),
            ));
        }
        Ok(&self.tools)
    }

    /// 处理一次查询；未启动时先启动，任何失败折叠为降级文本
    pub async fn process_query(&mut self, query: &str) -> String {
        if !self.started {
            if let Err(e) = self.start().await {
                return format!(
                    "Sorry, there was a technical problem processing your request. Error: {}",
                    e
                );
            }
        }

        // 上一轮被取消过则换新令牌
        if self.cancel_token.is_cancelled() {
            self.cancel_token = CancellationToken::new();
        }

        let processor = QueryProcessor::new(
            &self.planner,
            &self.synthesizer,
            &self.executor,
            self.config.agent.max_iterations,
            self.cancel_token.clone(),
        );
        processor
            .process_query(&mut self.history, &self.tools, query)
            .await
    }

    /// 取消当前查询
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// 关闭全部会话；幂等
    pub async fn shutdown(&mut self) -> Result<(), AgentError> {
        let result = self.launcher.shutdown().await;
        self.started = false;
        self.tools.clear();
        result
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// 推理侧 Planner（system prompt 与 token 统计入口）
    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    /// 清空对话（保留开头的 system 消息）
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// 推理模型累计 token 使用
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.planner.token_usage()
    }
}
