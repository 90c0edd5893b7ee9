//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，
//! 如 `HIVE__AGENT__MAX_ITERATIONS=5`）。

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tool_calling: ToolCallingSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub session: SessionSection,
}

/// [agent] 段：后端选择、迭代上限、追加的 system prompt
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    /// 单次查询的 ReAct 迭代上限
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 追加在默认工具约定之后的领域 prompt
    pub custom_system_prompt: Option<String>,
}

// derive(Default) 不走 serde 的 default 函数，各段手写 Default 保证
// 无配置文件时与 TOML 缺段时取值一致
impl Default for AgentSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            max_iterations: default_max_iterations(),
            custom_system_prompt: None,
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_max_iterations() -> usize {
    10
}

/// [llm] 段：推理模型后端与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_model() -> String {
    "deepseek-reasoner".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

/// [tool_calling] 段：合成器专用模型与重试上限
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallingSection {
    /// 合成器模型；通常用非思考型小模型，默认 deepseek-chat
    #[serde(default = "default_tool_calling_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
}

impl Default for ToolCallingSection {
    fn default() -> Self {
        Self {
            model: default_tool_calling_model(),
            base_url: None,
            max_retries: default_max_retries(),
        }
    }
}

fn default_tool_calling_model() -> String {
    "deepseek-chat".to_string()
}

fn default_max_retries() -> usize {
    5
}

/// [tools] 段：工具服务器与单次调用超时
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 工具服务器：注册名 -> 可执行文件路径（BTreeMap 保证遍历顺序稳定）
    #[serde(default)]
    pub servers: BTreeMap<String, PathBuf>,
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            servers: BTreeMap::new(),
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [session] 段：会话层超时
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    /// 子进程 JSON-RPC 单请求超时（秒）
    #[serde(default = "default_session_request_timeout")]
    pub request_timeout_secs: u64,
    /// 关闭时等待子进程自然退出的宽限期（秒）
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_session_request_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_session_request_timeout() -> u64 {
    30
}

fn default_shutdown_grace() -> u64 {
    3
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.agent.provider, "deepseek");
        assert_eq!(cfg.llm.model, "deepseek-reasoner");
        assert_eq!(cfg.llm.request_timeout_secs, 60);
        assert_eq!(cfg.tool_calling.model, "deepseek-chat");
        assert_eq!(cfg.tool_calling.max_retries, 5);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.session.request_timeout_secs, 30);
        assert_eq!(cfg.session.shutdown_grace_secs, 3);
        assert!(cfg.tools.servers.is_empty());
    }

    #[test]
    fn test_missing_sections_fall_back_to_documented_defaults() {
        // 空 TOML：所有段走缺省，取值必须与 default.toml 文档一致
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str("", config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.max_iterations, 10);
        assert_eq!(cfg.tool_calling.max_retries, 5);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.agent.provider, "deepseek");
    }

    #[test]
    fn test_toml_parse() {
        let toml = r#"
[agent]
provider = "openai"
max_iterations = 5

[tools]
tool_timeout_secs = 10

[tools.servers]
files = "/opt/tools/files-server"
"#;
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.agent.provider, "openai");
        assert_eq!(cfg.agent.max_iterations, 5);
        assert_eq!(cfg.tools.tool_timeout_secs, 10);
        assert_eq!(
            cfg.tools.servers.get("files"),
            Some(&PathBuf::from("/opt/tools/files-server"))
        );
    }
}
