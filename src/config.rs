//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `EASEL__*` 覆盖（双下划线表示嵌套，如 `EASEL__AGENT__MAX_ITERATIONS=3`）。
//! 分类表（[[categories]]）在启动时构建一次，之后只读。

use std::path::PathBuf;

use serde::Deserialize;

use crate::tools::LintKind;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub tools: ToolsSection,
    pub agent: AgentSection,
    pub fallback: FallbackSection,
    pub categories: Vec<CategorySection>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app: AppSection::default(),
            llm: LlmSection::default(),
            tools: ToolsSection::default(),
            agent: AgentSection::default(),
            fallback: FallbackSection::default(),
            categories: default_categories(),
        }
    }
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [tools] 段：远程工具服务地址、单次调用超时、传输失败重试次数
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// MCP 服务端点（streamable HTTP），未设置时读取 MCP_SERVICE_URL
    pub server_url: Option<String>,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// 仅对网络/协议错误重试；工具自身报错（is_error）不重试
    #[serde(default)]
    pub retry_attempts: u32,
    /// 启动时用 tools/list 拉取远端声明的参数 schema，覆盖内置 schema
    #[serde(default)]
    pub fetch_remote_schemas: bool,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            server_url: None,
            tool_timeout_secs: default_tool_timeout_secs(),
            retry_attempts: 0,
            fetch_remote_schemas: false,
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

/// [agent] 段：专家推理循环的边界
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    /// 单次请求内最多咨询模型的次数（think/act 轮数上限）
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// 参数校验失败后允许的纠正重试次数
    #[serde(default = "default_validation_retries")]
    pub validation_retries: usize,
    /// 整个请求的超时（秒），超时后取消模型调用并放弃在途工具调用
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            validation_retries: default_validation_retries(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}

fn default_validation_retries() -> usize {
    1
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// [fallback] 段：兜底 Agent 的提示词、道歉语与直达关键词
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackSection {
    #[serde(default = "default_fallback_prompt")]
    pub prompt: String,
    #[serde(default = "default_apology")]
    pub apology: String,
    /// 命中这些关键词的请求直接路由到兜底 Agent（在所有专家分类之后扫描）
    #[serde(default = "default_fallback_keywords")]
    pub keywords: Vec<String>,
}

impl Default for FallbackSection {
    fn default() -> Self {
        Self {
            prompt: default_fallback_prompt(),
            apology: default_apology(),
            keywords: default_fallback_keywords(),
        }
    }
}

fn default_fallback_prompt() -> String {
    "You are the assistant of a diagram generation service. The request below could not be \
     matched to a diagram type. Reply in two or three sentences: explain what you can draw \
     (cloud/infrastructure architecture diagrams, and Mermaid flowcharts, sequence, state, class \
     or ER diagrams) and ask one specific question that would let you proceed. Do not produce \
     diagram code."
        .to_string()
}

fn default_apology() -> String {
    "Sorry, I could not understand that request. Could you describe the diagram you need, \
     for example a cloud architecture or a process flowchart?"
        .to_string()
}

fn default_fallback_keywords() -> Vec<String> {
    ["clarify", "error", "unknown", "cannot", "unable", "help"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// [[categories]]：一个分类 = 一个专家 Agent = 一个绑定工具
#[derive(Debug, Clone, Deserialize)]
pub struct CategorySection {
    pub label: String,
    pub tool: String,
    pub keywords: Vec<String>,
    /// 结构化输出必须包含的字段
    #[serde(default = "default_output_fields")]
    pub output_fields: Vec<String>,
    /// 专家的系统提示词；未设置时按工具名生成
    pub prompt: Option<String>,
    /// 调用工具前对 code 参数做静态检查
    pub lint: Option<LintKind>,
}

fn default_output_fields() -> Vec<String> {
    vec!["diagram_code".to_string(), "title".to_string()]
}

fn default_categories() -> Vec<CategorySection> {
    vec![
        CategorySection {
            label: "technical".to_string(),
            tool: "draw_technical_diagram".to_string(),
            keywords: [
                "technical",
                "architecture",
                "cloud",
                "infrastructure",
                "system",
                "aws",
                "gcp",
                "azure",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            output_fields: default_output_fields(),
            prompt: None,
            lint: Some(LintKind::PythonDiagrams),
        },
        CategorySection {
            label: "mermaid".to_string(),
            tool: "draw_mermaid".to_string(),
            keywords: ["flow", "sequence", "flowchart", "process", "state", "class"]
                .into_iter()
                .map(String::from)
                .collect(),
            output_fields: default_output_fields(),
            prompt: None,
            lint: Some(LintKind::Mermaid),
        },
    ]
}

/// 从 config 目录加载配置，环境变量 EASEL__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 EASEL__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("EASEL")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
