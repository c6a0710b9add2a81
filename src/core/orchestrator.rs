//! 编排器：单个请求的主控流程
//!
//! 调用方 → Router → 专家 / 兜底 Agent →（专家发出 pending 调用时）ToolBridge 批量解析 → 结果抽取 → 调用方，
//! 同时带回更新后的历史 blob。推理步骤是同步的；这里只在模型调用与 `resolve_pending` 处 await。

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::core::extractor::{self, AgentResult, Extraction};
use crate::core::{RecoveryEngine, RequestSupervisor};
use crate::memory::History;
use crate::react::{FallbackAgent, Planner, SpecialistAgent, SpecialistLimits, StepOutcome};
use crate::router::{AgentHandle, Category, Router, UNROUTABLE};
use crate::tools::{ToolBridge, ToolCatalog, ToolExecutor};

const EMPTY_REQUEST_REPLY: &str =
    "Please describe the diagram you need, for example a cloud architecture or a process flowchart.";

pub struct Orchestrator {
    pub(crate) router: Router,
    pub(crate) planner: Planner,
    pub(crate) fallback: FallbackAgent,
    pub(crate) catalog: Arc<ToolCatalog>,
    pub(crate) executor: Arc<ToolExecutor>,
    pub(crate) recovery: RecoveryEngine,
    pub(crate) limits: SpecialistLimits,
    pub(crate) request_timeout: Duration,
    pub(crate) shutdown: CancellationToken,
}

impl Orchestrator {
    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// 进程级取消令牌：取消后所有进行中的请求以 error 结束
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub async fn handle(&self, request: &str, previous_history: Option<&str>) -> AgentResult {
        self.handle_with_cancel(request, previous_history, &self.shutdown)
            .await
    }

    /// 处理一个请求；从不返回 Err，所有失败都折叠进 AgentResult
    pub async fn handle_with_cancel(
        &self,
        request: &str,
        previous_history: Option<&str>,
        cancel: &CancellationToken,
    ) -> AgentResult {
        let mut history = previous_history
            .map(History::deserialize)
            .unwrap_or_default();
        let request = request.trim();
        if request.is_empty() {
            return AgentResult {
                outcome: extractor::Outcome::NeedsClarification,
                title: String::new(),
                artifact_reference: String::new(),
                message: EMPTY_REQUEST_REPLY.to_string(),
                history_blob: history.serialize(),
            };
        }

        let supervisor = RequestSupervisor::start(cancel, self.request_timeout);
        let token = supervisor.token().clone();

        let route = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            route = self.router.route(&history, request) => Some(route),
        };
        let Some(route) = route else {
            let extraction = Extraction::error(supervisor.cancel_reason());
            return extractor::finalize(&mut history, request, extraction, UNROUTABLE);
        };
        let label = self.router.table().label_name(route.label).to_string();

        let extraction = match route.handle {
            AgentHandle::Specialist(category) => {
                self.run_specialist(category, &history, request, &supervisor)
                    .await
            }
            AgentHandle::Fallback => {
                let message = tokio::select! {
                    biased;
                    _ = token.cancelled() => self.fallback.apology().to_string(),
                    reply = self.fallback.respond(&history, request) => reply,
                };
                Extraction::clarification(message)
            }
        };

        let (prompt_tokens, completion_tokens, total_tokens) = self.planner.token_usage();
        tracing::info!(
            label = %label,
            outcome = ?extraction.outcome,
            prompt_tokens,
            completion_tokens,
            total_tokens,
            "request completed"
        );
        extractor::finalize(&mut history, request, extraction, &label)
    }

    async fn run_specialist(
        &self,
        category: &Category,
        history: &History,
        request: &str,
        supervisor: &RequestSupervisor,
    ) -> Extraction {
        let schema = self.catalog.schema_json(&category.tool);
        let mut agent = SpecialistAgent::new(category, &schema, history, request, self.limits);
        let mut bridge = ToolBridge::new(Arc::clone(&self.catalog), Arc::clone(&self.executor));
        if let Some(kind) = category.lint {
            bridge = bridge.with_lint(category.tool.clone(), kind);
        }
        let cancel = supervisor.token();

        while let Some(prompt) = agent.begin_step() {
            let completion = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    agent.fail(supervisor.cancel_reason());
                    break;
                }
                completion = self.planner.plan(&prompt) => completion,
            };
            let completion = match completion {
                Ok(c) => c,
                Err(e) => {
                    tracing::warn!(category = %category.label, error = %e, "specialist model call failed");
                    agent.fail(format!("model unavailable: {}", e));
                    break;
                }
            };
            if let StepOutcome::Acting(ids) = agent.advance(&completion, &mut bridge, &self.recovery) {
                tracing::info!(category = %category.label, calls = ids.len(), "resolving tool calls");
                let observations = bridge.resolve_pending(cancel).await;
                agent.observe(&observations, &self.recovery);
                if cancel.is_cancelled() && !agent.is_done() {
                    agent.fail(supervisor.cancel_reason());
                }
            }
        }

        let leftover = bridge.abandon_pending("request ended before the call was issued");
        if !leftover.is_empty() {
            tracing::warn!(count = leftover.len(), "abandoned unresolved tool calls");
        }
        tracing::debug!(
            category = %category.label,
            iterations = agent.iterations(),
            tool_calls = bridge.calls().len(),
            "specialist finished"
        );
        let trace = agent.into_trace();
        extractor::from_trace(&trace, category, &bridge)
    }
}
