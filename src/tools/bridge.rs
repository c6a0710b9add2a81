//! 工具调用桥：同步推理步骤与异步远程工具之间的占位符机制
//!
//! - `request_call`：推理步骤内同步调用，只记录一个 pending ToolCall，立即返回占位符
//! - `resolve_pending`：编排器在异步阶段调用，先做 Schema / 代码静态检查，
//!   再把同一批次的合法调用并发发往远端，返回 占位符 → observation
//!
//! 每个请求拥有自己的 ToolBridge（不跨请求共享，无锁）；目录与执行器通过 Arc 共享。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::tools::lint::{lint, LintKind};
use crate::tools::{ToolCatalog, ToolExecutor, ToolOutput, TransportError};

/// 尚未解析的工具调用结果的不透明令牌（单个请求内唯一）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PlaceholderId(String);

impl PlaceholderId {
    fn generate() -> Self {
        Self(format!("call_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlaceholderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    Pending,
    Resolved,
    Failed,
}

/// 失败类型，决定恢复动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// 参数与工具声明的 Schema 不符，或代码静态检查未通过
    InvalidArguments,
    /// 远端工具报错、网络/协议错误、超时
    Remote,
    /// 请求被取消或超时，在途调用被放弃
    Cancelled,
}

/// 一次工具调用的观察结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Observation {
    Resolved { content: String },
    Failed { kind: FailureKind, reason: String },
}

impl Observation {
    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failed {
            kind,
            reason: reason.into(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved { .. })
    }

    /// 喂回模型的文本
    pub fn render(&self) -> String {
        match self {
            Self::Resolved { content } => content.clone(),
            Self::Failed { kind, reason } => {
                let kind = match kind {
                    FailureKind::InvalidArguments => "invalid arguments",
                    FailureKind::Remote => "tool failure",
                    FailureKind::Cancelled => "cancelled",
                };
                format!("ERROR ({}): {}", kind, reason)
            }
        }
    }

    fn from_execution(result: Result<ToolOutput, TransportError>) -> Self {
        match result {
            Ok(out) if !out.is_error => Self::Resolved {
                content: out.content,
            },
            Ok(out) => Self::failed(FailureKind::Remote, out.content),
            Err(e) => Self::failed(FailureKind::Remote, e.to_string()),
        }
    }
}

/// 一次工具调用记录；由专家创建，由桥解析且只解析一次
#[derive(Debug, Clone, Serialize)]
pub struct ToolCall {
    pub id: PlaceholderId,
    pub tool_name: String,
    pub arguments: Map<String, Value>,
    pub status: ToolCallStatus,
    pub observation: Option<Observation>,
}

pub struct ToolBridge {
    catalog: Arc<ToolCatalog>,
    executor: Arc<ToolExecutor>,
    lints: HashMap<String, LintKind>,
    calls: Vec<ToolCall>,
    index: HashMap<PlaceholderId, usize>,
}

impl ToolBridge {
    pub fn new(catalog: Arc<ToolCatalog>, executor: Arc<ToolExecutor>) -> Self {
        Self {
            catalog,
            executor,
            lints: HashMap::new(),
            calls: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// 调用该工具前对 `code` 参数做静态检查
    pub fn with_lint(mut self, tool_name: impl Into<String>, kind: LintKind) -> Self {
        self.lints.insert(tool_name.into(), kind);
        self
    }

    /// 记录一个待解析的调用；不做任何 IO，不校验
    pub fn request_call(
        &mut self,
        tool_name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> PlaceholderId {
        let id = PlaceholderId::generate();
        let call = ToolCall {
            id: id.clone(),
            tool_name: tool_name.into(),
            arguments,
            status: ToolCallStatus::Pending,
            observation: None,
        };
        tracing::debug!(id = %id, tool = %call.tool_name, "tool call queued");
        self.index.insert(id.clone(), self.calls.len());
        self.calls.push(call);
        id
    }

    pub fn call(&self, id: &PlaceholderId) -> Option<&ToolCall> {
        self.index.get(id).map(|&i| &self.calls[i])
    }

    pub fn calls(&self) -> &[ToolCall] {
        &self.calls
    }

    pub fn pending_count(&self) -> usize {
        self.calls
            .iter()
            .filter(|c| c.status == ToolCallStatus::Pending)
            .count()
    }

    /// 解析当前批次的全部 pending 调用
    ///
    /// 参数不匹配的调用直接标记为 failed（不发往远端）；其余并发执行，完成顺序无关。
    /// `cancel` 触发时中止并排空在途调用，将它们标记为 failed（Cancelled）。
    /// 返回值覆盖本批次每一个占位符。
    pub async fn resolve_pending(
        &mut self,
        cancel: &CancellationToken,
    ) -> HashMap<PlaceholderId, Observation> {
        let batch: Vec<usize> = self
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == ToolCallStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        let mut observations = HashMap::with_capacity(batch.len());
        let mut in_flight = JoinSet::new();

        for &i in &batch {
            if let Some(reason) = self.precheck(&self.calls[i]) {
                let obs = Observation::failed(FailureKind::InvalidArguments, reason);
                self.mark(i, obs.clone());
                observations.insert(self.calls[i].id.clone(), obs);
                continue;
            }
            let executor = Arc::clone(&self.executor);
            let tool = self.calls[i].tool_name.clone();
            let args = self.calls[i].arguments.clone();
            in_flight.spawn(async move { (i, executor.execute(&tool, &args).await) });
        }

        let mut cancelled = false;
        while !in_flight.is_empty() {
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = in_flight.join_next() => joined,
            };
            match joined {
                Some(Ok((i, result))) => {
                    let obs = Observation::from_execution(result);
                    self.mark(i, obs.clone());
                    observations.insert(self.calls[i].id.clone(), obs);
                }
                Some(Err(e)) => tracing::error!(error = %e, "tool task failed to join"),
                None => break,
            }
        }

        if cancelled {
            in_flight.abort_all();
            // 已经跑完的任务照常记录结果，只有真正被中止的才算 Cancelled
            while let Some(joined) = in_flight.join_next().await {
                match joined {
                    Ok((i, result)) => {
                        let obs = Observation::from_execution(result);
                        self.mark(i, obs.clone());
                        observations.insert(self.calls[i].id.clone(), obs);
                    }
                    Err(e) if e.is_cancelled() => {}
                    Err(e) => tracing::error!(error = %e, "tool task failed to join"),
                }
            }
        }

        // 取消或任务异常后仍未解析的调用
        for &i in &batch {
            if self.calls[i].status != ToolCallStatus::Pending {
                continue;
            }
            let obs = if cancelled {
                Observation::failed(FailureKind::Cancelled, "request cancelled before the tool returned")
            } else {
                Observation::failed(FailureKind::Remote, "tool task aborted unexpectedly")
            };
            self.mark(i, obs.clone());
            observations.insert(self.calls[i].id.clone(), obs);
        }

        tracing::debug!(batch = batch.len(), cancelled, "tool batch resolved");
        observations
    }

    /// 将尚未发出的 pending 调用全部标记为 failed（请求提前结束时使用）
    pub fn abandon_pending(&mut self, reason: &str) -> HashMap<PlaceholderId, Observation> {
        let pending: Vec<usize> = self
            .calls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status == ToolCallStatus::Pending)
            .map(|(i, _)| i)
            .collect();
        let mut observations = HashMap::new();
        for i in pending {
            let obs = Observation::failed(FailureKind::Cancelled, reason);
            self.mark(i, obs.clone());
            observations.insert(self.calls[i].id.clone(), obs);
        }
        observations
    }

    /// 手动解析一个调用
    ///
    /// # Panics
    /// 占位符不存在，或该调用已经 resolved / failed 时 panic：同一调用被解析两次是编程错误，不重试。
    pub fn complete(&mut self, id: &PlaceholderId, observation: Observation) {
        let Some(&i) = self.index.get(id) else {
            panic!("unknown placeholder {}", id);
        };
        self.mark(i, observation);
    }

    fn mark(&mut self, i: usize, observation: Observation) {
        let call = &mut self.calls[i];
        assert!(
            call.status == ToolCallStatus::Pending,
            "tool call {} resolved twice",
            call.id
        );
        call.status = if observation.is_resolved() {
            ToolCallStatus::Resolved
        } else {
            ToolCallStatus::Failed
        };
        call.observation = Some(observation);
    }

    fn precheck(&self, call: &ToolCall) -> Option<String> {
        let mut problems = self.catalog.check_arguments(&call.tool_name, &call.arguments);
        let mut lint_feedback = None;
        if problems.is_empty() {
            if let (Some(&kind), Some(code)) = (
                self.lints.get(&call.tool_name),
                call.arguments.get("code").and_then(Value::as_str),
            ) {
                let report = lint(kind, code);
                if !report.is_valid() {
                    lint_feedback = Some(report.feedback());
                }
            }
        }
        if let Some(feedback) = lint_feedback {
            return Some(format!(
                "code for `{}` failed the static check:\n{}",
                call.tool_name, feedback
            ));
        }
        if problems.is_empty() {
            return None;
        }
        let head = format!("arguments for `{}` do not match its schema:", call.tool_name);
        problems.insert(0, head);
        Some(problems.join("\n  - "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{builtin_tool_specs, ToolTransport};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// 按工具名回显；code 中含 "boom" 时返回 is_error；含 "slow" 时长时间挂起
    struct EchoTransport {
        invocations: AtomicUsize,
    }

    #[async_trait]
    impl ToolTransport for EchoTransport {
        async fn invoke(
            &self,
            tool_name: &str,
            arguments: &Map<String, Value>,
        ) -> Result<ToolOutput, TransportError> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let code = arguments.get("code").and_then(Value::as_str).unwrap_or("");
            if code.contains("slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }
            if code.contains("boom") {
                return Ok(ToolOutput::error("renderer crashed"));
            }
            Ok(ToolOutput::ok(format!("{{\"uri\": \"mem://{}\"}}", tool_name)))
        }
    }

    fn bridge() -> (ToolBridge, Arc<EchoTransport>) {
        let transport = Arc::new(EchoTransport {
            invocations: AtomicUsize::new(0),
        });
        let catalog = Arc::new(ToolCatalog::from_specs(builtin_tool_specs()));
        let executor = Arc::new(ToolExecutor::new(transport.clone(), 60));
        let bridge = ToolBridge::new(catalog, executor).with_lint("draw_mermaid", LintKind::Mermaid);
        (bridge, transport)
    }

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_batch_resolves_every_placeholder_once() {
        let (mut bridge, transport) = bridge();
        let a = bridge.request_call("draw_mermaid", args(json!({"title": "a", "code": "flowchart TD\nA-->B"})));
        let b = bridge.request_call(
            "draw_technical_diagram",
            args(json!({"title": "b", "code": "lb = ELB('lb')\nlb >> ECS('x')"})),
        );
        let c = bridge.request_call("draw_mermaid", args(json!({"title": "c", "code": "graph LR\nboom-->x"})));
        assert_eq!(bridge.pending_count(), 3);
        assert_ne!(a, b);

        let obs = bridge.resolve_pending(&CancellationToken::new()).await;
        assert_eq!(obs.len(), 3);
        assert_eq!(
            obs[&a],
            Observation::Resolved {
                content: "{\"uri\": \"mem://draw_mermaid\"}".into()
            }
        );
        assert!(obs[&b].is_resolved());
        assert!(matches!(obs[&c], Observation::Failed { kind: FailureKind::Remote, .. }));
        assert_eq!(bridge.pending_count(), 0);
        assert_eq!(bridge.call(&c).unwrap().status, ToolCallStatus::Failed);
        assert_eq!(transport.invocations.load(Ordering::SeqCst), 3);

        // 已解析的调用不会再次发出
        assert!(bridge.resolve_pending(&CancellationToken::new()).await.is_empty());
        assert_eq!(transport.invocations.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_schema_mismatch_fails_without_remote_call() {
        let (mut bridge, transport) = bridge();
        let id = bridge.request_call("draw_mermaid", args(json!({"code": 42})));
        let unknown = bridge.request_call("draw_png", Map::new());
        let obs = bridge.resolve_pending(&CancellationToken::new()).await;

        let Observation::Failed { kind, reason } = &obs[&id] else {
            panic!("expected failure");
        };
        assert_eq!(*kind, FailureKind::InvalidArguments);
        assert!(reason.contains("missing required argument `title`"));
        assert!(reason.contains("`code` should be string"));
        assert!(obs[&unknown].render().contains("unknown tool `draw_png`"));
        assert_eq!(transport.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_lint_errors_are_argument_mismatches() {
        let (mut bridge, transport) = bridge();
        let id = bridge.request_call("draw_mermaid", args(json!({"title": "t", "code": "A --> B"})));
        let obs = bridge.resolve_pending(&CancellationToken::new()).await;
        let rendered = obs[&id].render();
        assert!(rendered.starts_with("ERROR (invalid arguments)"));
        assert!(rendered.contains("ERRORS:"));
        assert_eq!(transport.invocations.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_drains_in_flight_calls() {
        let (mut bridge, _) = bridge();
        let fast = bridge.request_call("draw_mermaid", args(json!({"title": "f", "code": "flowchart TD\nA-->B"})));
        let slow = bridge.request_call("draw_mermaid", args(json!({"title": "s", "code": "flowchart TD\nslow-->B"})));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.cancel();
        });

        let obs = bridge.resolve_pending(&cancel).await;
        assert_eq!(obs.len(), 2);
        assert!(obs[&fast].is_resolved());
        assert!(matches!(obs[&slow], Observation::Failed { kind: FailureKind::Cancelled, .. }));
        assert_eq!(bridge.pending_count(), 0);
    }

    /// 所有调用在 Barrier 处会合：只有同一批次并发发出时才能全部越过
    struct RendezvousTransport {
        barrier: tokio::sync::Barrier,
    }

    #[async_trait]
    impl ToolTransport for RendezvousTransport {
        async fn invoke(
            &self,
            tool_name: &str,
            _arguments: &Map<String, Value>,
        ) -> Result<ToolOutput, TransportError> {
            match tokio::time::timeout(Duration::from_secs(2), self.barrier.wait()).await {
                Ok(_) => Ok(ToolOutput::ok(format!("{{\"uri\": \"mem://{}\"}}", tool_name))),
                Err(_) => Ok(ToolOutput::error("batch was not issued concurrently")),
            }
        }
    }

    #[tokio::test]
    async fn test_batch_is_issued_concurrently() {
        let transport = Arc::new(RendezvousTransport {
            barrier: tokio::sync::Barrier::new(3),
        });
        let catalog = Arc::new(ToolCatalog::from_specs(builtin_tool_specs()));
        let executor = Arc::new(ToolExecutor::new(transport, 60));
        let mut bridge = ToolBridge::new(catalog, executor);
        let ids: Vec<PlaceholderId> = (0..3)
            .map(|n| {
                bridge.request_call(
                    "draw_mermaid",
                    args(json!({"title": format!("v{}", n), "code": "flowchart TD\nA-->B"})),
                )
            })
            .collect();

        let obs = bridge.resolve_pending(&CancellationToken::new()).await;
        for id in &ids {
            assert!(obs[id].is_resolved(), "{}", obs[id].render());
        }
    }

    /// 第一个调用完成前顺手触发取消，模拟"结果已到、取消紧随其后"
    struct CancelOnReturnTransport {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ToolTransport for CancelOnReturnTransport {
        async fn invoke(
            &self,
            tool_name: &str,
            arguments: &Map<String, Value>,
        ) -> Result<ToolOutput, TransportError> {
            let code = arguments.get("code").and_then(Value::as_str).unwrap_or("");
            if code.contains("slow") {
                tokio::time::sleep(Duration::from_secs(30)).await;
            } else {
                self.cancel.cancel();
            }
            Ok(ToolOutput::ok(format!("{{\"uri\": \"mem://{}\"}}", tool_name)))
        }
    }

    #[tokio::test]
    async fn test_finished_call_survives_cancellation() {
        let cancel = CancellationToken::new();
        let transport = Arc::new(CancelOnReturnTransport {
            cancel: cancel.clone(),
        });
        let catalog = Arc::new(ToolCatalog::from_specs(builtin_tool_specs()));
        let executor = Arc::new(ToolExecutor::new(transport, 60));
        let mut bridge = ToolBridge::new(catalog, executor);
        let done = bridge.request_call("draw_mermaid", args(json!({"title": "d", "code": "flowchart TD\nA-->B"})));
        let slow = bridge.request_call("draw_mermaid", args(json!({"title": "s", "code": "flowchart TD\nslow-->B"})));

        let obs = bridge.resolve_pending(&cancel).await;
        assert!(cancel.is_cancelled());
        assert!(obs[&done].is_resolved());
        assert_eq!(bridge.call(&done).unwrap().status, ToolCallStatus::Resolved);
        assert!(matches!(obs[&slow], Observation::Failed { kind: FailureKind::Cancelled, .. }));
    }

    #[tokio::test]
    async fn test_abandon_pending() {
        let (mut bridge, _) = bridge();
        let id = bridge.request_call("draw_mermaid", Map::new());
        let obs = bridge.abandon_pending("request ended");
        assert_eq!(obs[&id], Observation::failed(FailureKind::Cancelled, "request ended"));
        assert_eq!(bridge.pending_count(), 0);
    }

    #[test]
    #[should_panic(expected = "resolved twice")]
    fn test_double_resolution_panics() {
        let (mut bridge, _) = bridge();
        let id = bridge.request_call("draw_mermaid", Map::new());
        bridge.complete(&id, Observation::Resolved { content: "x".into() });
        bridge.complete(&id, Observation::Resolved { content: "y".into() });
    }
}
