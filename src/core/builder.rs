//! 编排器构建器：统一的初始化逻辑
//!
//! 启动时构建一次：工具目录（内置 Schema，可选 tools/list 覆盖）、分类表、Router、专家边界；
//! 之后通过 Arc 只读共享。分类表不合法时返回 ConfigError。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::{AgentError, Orchestrator, RecoveryEngine};
use crate::llm::{create_llm_from_config, LlmClient};
use crate::react::{FallbackAgent, Planner, SpecialistLimits};
use crate::router::{CategoryTable, Router};
use crate::tools::{
    builtin_tool_specs, McpHttpTransport, ToolCatalog, ToolExecutor, ToolTransport,
    UnconfiguredTransport,
};

pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    transport: Option<Arc<dyn ToolTransport>>,
    catalog: Option<ToolCatalog>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            transport: None,
            catalog: None,
        }
    }

    /// 指定 LLM；未设置时按配置与环境变量选择
    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 指定工具传输；未设置时按 tools.server_url / MCP_SERVICE_URL 创建 MCP 客户端
    pub fn with_transport(mut self, transport: Arc<dyn ToolTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// 指定工具目录；未设置时使用内置 Schema
    pub fn with_catalog(mut self, catalog: ToolCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    fn resolve_transport(&mut self) -> Arc<dyn ToolTransport> {
        if let Some(t) = &self.transport {
            return Arc::clone(t);
        }
        let url = self
            .config
            .tools
            .server_url
            .clone()
            .or_else(|| std::env::var("MCP_SERVICE_URL").ok())
            .filter(|u| !u.trim().is_empty());
        let transport: Arc<dyn ToolTransport> = match url {
            Some(url) => {
                tracing::info!("Using MCP tool server at {}", url);
                Arc::new(McpHttpTransport::new(url, self.config.tools.tool_timeout_secs))
            }
            None => {
                tracing::warn!("No tool server configured, tool calls will fail");
                Arc::new(UnconfiguredTransport)
            }
        };
        self.transport = Some(Arc::clone(&transport));
        transport
    }

    /// 用 tools/list 拉取远端 Schema 覆盖内置 Schema；失败时保留内置 Schema
    pub async fn fetch_remote_schemas(mut self) -> Self {
        let transport = self.resolve_transport();
        let mut catalog = self
            .catalog
            .take()
            .unwrap_or_else(|| ToolCatalog::from_specs(builtin_tool_specs()));
        match transport.list_tools().await {
            Ok(specs) => {
                tracing::info!(count = specs.len(), "fetched remote tool schemas");
                for spec in specs {
                    catalog.register(spec);
                }
            }
            Err(e) => tracing::warn!(error = %e, "tools/list failed, keeping built-in schemas"),
        }
        self.catalog = Some(catalog);
        self
    }

    pub fn build(mut self) -> Result<Orchestrator, AgentError> {
        let transport = self.resolve_transport();
        let cfg = &self.config;
        if cfg.agent.max_iterations == 0 {
            return Err(AgentError::ConfigError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(cfg));
        let catalog = Arc::new(
            self.catalog
                .take()
                .unwrap_or_else(|| ToolCatalog::from_specs(builtin_tool_specs())),
        );
        let table = Arc::new(CategoryTable::from_config(
            &cfg.categories,
            &cfg.fallback,
            &catalog,
        )?);
        tracing::info!(
            categories = table.categories().len(),
            tools = ?catalog.tool_names(),
            "routing table built"
        );

        let executor = Arc::new(
            ToolExecutor::new(transport, cfg.tools.tool_timeout_secs)
                .with_retry_attempts(cfg.tools.retry_attempts),
        );

        Ok(Orchestrator {
            router: Router::new(Arc::clone(&llm), table),
            planner: Planner::new(Arc::clone(&llm)),
            fallback: FallbackAgent::new(llm, &cfg.fallback),
            catalog,
            executor,
            recovery: RecoveryEngine::new(),
            limits: SpecialistLimits {
                max_iterations: cfg.agent.max_iterations,
                validation_retries: cfg.agent.validation_retries,
            },
            request_timeout: Duration::from_secs(cfg.agent.request_timeout_secs.max(1)),
            shutdown: CancellationToken::new(),
        })
    }
}

impl Orchestrator {
    /// 按配置构建（开启 fetch_remote_schemas 时先拉取远端 Schema）
    pub async fn from_config(config: AppConfig) -> Result<Self, AgentError> {
        let fetch = config.tools.fetch_remote_schemas;
        let mut builder = OrchestratorBuilder::new(config);
        if fetch {
            builder = builder.fetch_remote_schemas().await;
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::{InMemoryTransport, ToolSpec};

    #[test]
    fn test_build_rejects_unknown_tool_binding() {
        let mut cfg = AppConfig::default();
        cfg.categories[1].tool = "draw_png".into();
        let result = OrchestratorBuilder::new(cfg)
            .with_llm(Arc::new(ScriptedLlmClient::default()))
            .with_transport(Arc::new(InMemoryTransport::renderer()))
            .build();
        assert!(matches!(result, Err(AgentError::ConfigError(_))));
    }

    #[test]
    fn test_build_rejects_zero_iterations() {
        let mut cfg = AppConfig::default();
        cfg.agent.max_iterations = 0;
        let result = OrchestratorBuilder::new(cfg)
            .with_llm(Arc::new(ScriptedLlmClient::default()))
            .with_transport(Arc::new(InMemoryTransport::renderer()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_catalog_allows_extra_category() {
        let mut cfg = AppConfig::default();
        let mut extra = cfg.categories[1].clone();
        extra.label = "chart".into();
        extra.tool = "draw_chart".into();
        extra.keywords = vec!["chart".into()];
        extra.lint = None;
        cfg.categories.push(extra);

        let mut catalog = ToolCatalog::from_specs(builtin_tool_specs());
        catalog.register(ToolSpec {
            name: "draw_chart".into(),
            description: "charts".into(),
            input_schema: serde_json::json!({"type": "object"}),
        });
        let orchestrator = OrchestratorBuilder::new(cfg)
            .with_llm(Arc::new(ScriptedLlmClient::default()))
            .with_transport(Arc::new(InMemoryTransport::renderer()))
            .with_catalog(catalog)
            .build()
            .unwrap();
        assert_eq!(orchestrator.router().table().categories().len(), 3);
    }
}
