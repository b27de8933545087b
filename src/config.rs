//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `APIARY__*` 覆盖（双下划线表示
//! 嵌套，如 `APIARY__LLM__MODEL=qwen2.5-coder:7b`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub retrieval: RetrievalSection,
    pub approval: ApprovalSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：模型端点与采样参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// Ollama 风格端点；未设置时回落到 Mock
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 是否允许模型提出工具调用
    pub tools_enabled: bool,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            base_url: None,
            model: "qwen2.5-coder:7b".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            tools_enabled: true,
            request_timeout_secs: 60,
        }
    }
}

/// [retrieval] 段：接地检索开关与范围
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrievalSection {
    pub enabled: bool,
    /// 检索服务端点；未设置时用内存关键词索引
    pub base_url: Option<String>,
    /// 每次查询的片段数
    pub top_k: usize,
    /// 查询范围（项目维度）
    pub project_id: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for RetrievalSection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            top_k: 3,
            project_id: None,
            request_timeout_secs: 15,
        }
    }
}

/// [approval] 段：审批方端点与轮询节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApprovalSection {
    /// 审批服务端点；未设置时自动批准（本地/非交互）
    pub base_url: Option<String>,
    /// 轮询间隔（秒）
    pub poll_interval_secs: u64,
    /// 绝对截止（秒），超过判超时
    pub deadline_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for ApprovalSection {
    fn default() -> Self {
        Self {
            base_url: None,
            poll_interval_secs: 3,
            deadline_secs: 300,
            request_timeout_secs: 10,
        }
    }
}

/// 从 config 目录加载配置，环境变量 APIARY__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 APIARY__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{name}.toml");
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
        config::Environment::with_prefix("APIARY")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
