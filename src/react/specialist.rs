//! 专家推理 Agent：绑定一个工具的 think / act / observe 有界循环
//!
//! 每次调用是一个状态机：Start → Thinking → Acting（经 ToolBridge 发出 pending 调用，拿到占位符）
//! → Thinking（带着按占位符索引的 observation 重新进入）→ … → Done。
//!
//! 这里的每一步都是同步的，从不 await：模型调用与 `resolve_pending` 由编排器在步骤之间完成。
//! 编排器的驱动方式：
//!
//! ```text
//! while let Some(prompt) = agent.begin_step() {
//!     let completion = llm.complete(&prompt).await?;
//!     if let StepOutcome::Acting(_) = agent.advance(&completion, &mut bridge, &recovery) {
//!         let observations = bridge.resolve_pending(&cancel).await;
//!         agent.observe(&observations, &recovery);
//!     }
//! }
//! ```

use std::collections::HashMap;

use serde_json::Value;

use crate::core::{RecoveryAction, RecoveryEngine};
use crate::memory::{History, Message, TurnContent};
use crate::react::{parse_decision, ActionRequest, Completion, Decision, ReasoningTrace, TraceStep};
use crate::router::Category;
use crate::tools::{FailureKind, LintKind, Observation, PlaceholderId, ToolBridge};

/// 推理边界
#[derive(Debug, Clone, Copy)]
pub struct SpecialistLimits {
    /// 最多咨询模型的次数
    pub max_iterations: usize,
    /// 参数校验失败后允许的连续纠正次数
    pub validation_retries: usize,
}

impl Default for SpecialistLimits {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            validation_retries: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecialistState {
    Start,
    Thinking,
    Acting { pending: Vec<PlaceholderId> },
    Done,
}

/// 一步之后编排器该做什么
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// 解析这些占位符，然后调用 observe
    Acting(Vec<PlaceholderId>),
    /// 再咨询一次模型
    Continue,
    Done,
}

const TECHNICAL_PERSONA: &str = "You turn requests into cloud and system architecture diagrams \
written with the Python `diagrams` library.\n\
Rules for the `code` argument:\n\
- NO import statements (imports are handled externally)\n\
- NO `with Diagram(...)` context manager\n\
- Create nodes with diagrams library classes and assign them to variables, e.g. `web = ELB('Load Balancer')`\n\
- Connect nodes with the >> operator, e.g. `web >> app >> db`\n\
- Define every variable before it is used";

const MERMAID_PERSONA: &str = "You turn requests into Mermaid diagrams (flowcharts, sequence, \
state, class, ER diagrams and similar).\n\
Rules for the `code` argument:\n\
- The first line declares the diagram type, e.g. `flowchart TD` or `sequenceDiagram`\n\
- Use valid Mermaid syntax for that type and define every node you connect\n\
- Prefer TD for processes and LR for pipelines";

const GENERIC_PERSONA: &str = "You turn requests into diagrams by calling a rendering tool.";

pub struct SpecialistAgent<'a> {
    category: &'a Category,
    limits: SpecialistLimits,
    messages: Vec<Message>,
    trace: ReasoningTrace,
    state: SpecialistState,
    iterations: usize,
    validation_failures: usize,
    last_success: Option<(PlaceholderId, String)>,
}

impl<'a> SpecialistAgent<'a> {
    /// `tool_schema` 为绑定工具的 schema JSON（来自 ToolCatalog::schema_json）
    pub fn new(
        category: &'a Category,
        tool_schema: &str,
        history: &History,
        request: &str,
        limits: SpecialistLimits,
    ) -> Self {
        let mut messages = vec![Message::system(system_prompt(category, tool_schema))];
        messages.extend(history.to_messages());
        if let Some(note) = revision_note(category, history) {
            messages.push(Message::system(note));
        }
        messages.push(Message::user(request));
        Self {
            category,
            limits,
            messages,
            trace: ReasoningTrace::new(),
            state: SpecialistState::Start,
            iterations: 0,
            validation_failures: 0,
            last_success: None,
        }
    }

    pub fn category(&self) -> &Category {
        self.category
    }

    pub fn state(&self) -> &SpecialistState {
        &self.state
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn is_done(&self) -> bool {
        self.state == SpecialistState::Done
    }

    pub fn trace(&self) -> &ReasoningTrace {
        &self.trace
    }

    pub fn into_trace(self) -> ReasoningTrace {
        self.trace
    }

    /// 开始一轮思考，返回要发给模型的消息；已结束或达到轮数上限时返回 None（后者强制 Done 并记录失败）
    pub fn begin_step(&mut self) -> Option<Vec<Message>> {
        match self.state {
            SpecialistState::Done => return None,
            SpecialistState::Acting { .. } => {
                tracing::warn!(category = %self.category.label, "begin_step called with unresolved calls");
                return None;
            }
            SpecialistState::Start | SpecialistState::Thinking => {}
        }
        if self.iterations >= self.limits.max_iterations {
            self.fail(format!(
                "reasoning stopped after {} iterations without a usable result",
                self.limits.max_iterations
            ));
            return None;
        }
        self.iterations += 1;
        self.state = SpecialistState::Thinking;
        tracing::debug!(category = %self.category.label, iteration = self.iterations, "thinking");
        Some(self.messages.clone())
    }

    /// 折叠模型的一次输出：解析决策、校验、经桥请求工具调用
    pub fn advance(
        &mut self,
        completion: &str,
        bridge: &mut ToolBridge,
        recovery: &RecoveryEngine,
    ) -> StepOutcome {
        if self.state != SpecialistState::Thinking {
            return self.outcome_for_state();
        }
        self.messages.push(Message::assistant(completion));

        let decision = match parse_decision(completion) {
            Ok(d) => d,
            Err(e) => {
                tracing::warn!(category = %self.category.label, error = %e, "unparseable decision");
                return self.apply(recovery.handle(&e));
            }
        };

        match decision {
            Decision::Act { thought, calls } => {
                self.record_thought(thought);
                self.act(calls, bridge, recovery)
            }
            Decision::Finish { thought, output } => {
                self.record_thought(thought);
                let Some((source_call, tool_content)) = self.last_success.clone() else {
                    return self.apply(recovery.on_premature_finish(&self.category.tool));
                };
                let missing: Vec<String> = self
                    .category
                    .output_fields
                    .iter()
                    .filter(|f| !has_value(output.get(f.as_str())))
                    .cloned()
                    .collect();
                if !missing.is_empty() {
                    return self.apply(recovery.on_missing_fields(&missing));
                }
                self.finish(Completion::Structured {
                    output,
                    source_call,
                    tool_content,
                });
                StepOutcome::Done
            }
            Decision::Respond { text } => {
                self.finish(Completion::FreeText { text });
                StepOutcome::Done
            }
        }
    }

    /// 带着本批次的 observation 重新进入 Thinking
    pub fn observe(
        &mut self,
        observations: &HashMap<PlaceholderId, Observation>,
        recovery: &RecoveryEngine,
    ) -> StepOutcome {
        let pending = match std::mem::replace(&mut self.state, SpecialistState::Thinking) {
            SpecialistState::Acting { pending } => pending,
            other => {
                self.state = other;
                return self.outcome_for_state();
            }
        };

        let tool = self.category.tool.clone();
        let mut lines = Vec::with_capacity(pending.len());
        let mut rejected: Option<String> = None;
        let mut abort: Option<RecoveryAction> = None;

        for id in pending {
            let obs = observations.get(&id).cloned().unwrap_or_else(|| {
                Observation::failed(FailureKind::Cancelled, "no observation was returned for this call")
            });
            lines.push(format!("Observation [{}]: {}", id, obs.render()));
            match &obs {
                Observation::Resolved { content } => {
                    self.last_success = Some((id.clone(), content.clone()));
                }
                Observation::Failed {
                    kind: FailureKind::InvalidArguments,
                    reason,
                } => {
                    rejected.get_or_insert_with(|| reason.clone());
                }
                Observation::Failed { kind, reason } => {
                    if abort.is_none() {
                        abort = Some(recovery.on_tool_failure(&tool, *kind, reason));
                    }
                }
            }
            self.trace.push(TraceStep::Observation {
                placeholder: id,
                observation: obs,
            });
        }

        self.messages.push(Message::user(lines.join("\n")));

        if let Some(action) = abort {
            return self.apply(action);
        }
        if let Some(reason) = rejected {
            let action = recovery.on_tool_failure(&tool, FailureKind::InvalidArguments, &reason);
            return self.reject(action, &reason);
        }

        self.validation_failures = 0;
        self.messages.push(Message::user(format!(
            "The tool call succeeded. If the result satisfies the request, reply with the final object \
             containing: {}.",
            self.category.output_fields.join(", ")
        )));
        StepOutcome::Continue
    }

    /// 强制结束（模型不可用、请求取消等）
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.finish(Completion::Failed {
            reason: reason.into(),
        });
    }

    fn act(
        &mut self,
        calls: Vec<ActionRequest>,
        bridge: &mut ToolBridge,
        recovery: &RecoveryEngine,
    ) -> StepOutcome {
        let (allowed, denied): (Vec<_>, Vec<_>) = calls
            .into_iter()
            .partition(|c| c.tool == self.category.tool);
        if let Some(bad) = denied.first() {
            if allowed.is_empty() {
                let reason = format!("tool `{}` is not available", bad.tool);
                let action = recovery.on_disallowed_tool(&bad.tool, &self.category.tool);
                return self.reject(action, &reason);
            }
            tracing::warn!(
                category = %self.category.label,
                ignored = denied.len(),
                "ignoring calls to tools outside the binding"
            );
        }

        let mut pending = Vec::with_capacity(allowed.len());
        for call in allowed {
            let args = Value::Object(call.args.clone());
            let id = bridge.request_call(call.tool.clone(), call.args);
            self.trace.push(TraceStep::Action {
                placeholder: id.clone(),
                tool: call.tool,
                args,
            });
            pending.push(id);
        }
        self.state = SpecialistState::Acting {
            pending: pending.clone(),
        };
        StepOutcome::Acting(pending)
    }

    /// 参数类失败：允许有限次纠正，超过后以失败结束
    fn reject(&mut self, action: RecoveryAction, reason: &str) -> StepOutcome {
        self.validation_failures += 1;
        if self.validation_failures > self.limits.validation_retries {
            self.fail(format!(
                "tool arguments were rejected {} times in a row: {}",
                self.validation_failures, reason
            ));
            return StepOutcome::Done;
        }
        self.apply(action)
    }

    fn apply(&mut self, action: RecoveryAction) -> StepOutcome {
        match action {
            RecoveryAction::RetryWithPrompt(prompt) => {
                self.messages.push(Message::user(prompt));
                self.state = SpecialistState::Thinking;
                StepOutcome::Continue
            }
            RecoveryAction::Abort(reason) => {
                self.fail(reason);
                StepOutcome::Done
            }
        }
    }

    fn finish(&mut self, completion: Completion) {
        tracing::debug!(category = %self.category.label, ?completion, "specialist done");
        self.trace.finish(completion);
        self.state = SpecialistState::Done;
    }

    fn record_thought(&mut self, thought: Option<String>) {
        if let Some(text) = thought {
            self.trace.push(TraceStep::Thought { text });
        }
    }

    fn outcome_for_state(&self) -> StepOutcome {
        match &self.state {
            SpecialistState::Done => StepOutcome::Done,
            SpecialistState::Acting { pending } => StepOutcome::Acting(pending.clone()),
            SpecialistState::Start | SpecialistState::Thinking => StepOutcome::Continue,
        }
    }
}

fn has_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(_) => true,
    }
}

/// 同类别上一次产出的图：增量修改（如「加一个缓存层」）以它为起点
fn revision_note(category: &Category, history: &History) -> Option<String> {
    match history.last_artifact()? {
        TurnContent::Artifact {
            title,
            artifact_reference,
            label,
        } if *label == category.label => Some(format!(
            "The current diagram is \"{title}\" ({artifact_reference}). If the request changes it, \
             rebuild that diagram with the change applied and keep its subject; otherwise start fresh."
        )),
        _ => None,
    }
}

fn system_prompt(category: &Category, tool_schema: &str) -> String {
    let persona = category.prompt.as_deref().unwrap_or(match category.lint {
        Some(LintKind::PythonDiagrams) => TECHNICAL_PERSONA,
        Some(LintKind::Mermaid) => MERMAID_PERSONA,
        None => GENERIC_PERSONA,
    });
    let final_example = category
        .output_fields
        .iter()
        .map(|f| format!("\"{}\": \"...\"", f))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{persona}\n\n\
         You can call exactly one tool, `{tool}`:\n{tool_schema}\n\n\
         Work step by step. Reply with ONE JSON object and nothing else, in one of these forms:\n\
         1. Call the tool: {{\"thought\": \"...\", \"tool\": \"{tool}\", \"args\": {{...}}}}\n\
         2. After the tool returned successfully: {{\"thought\": \"...\", \"final\": {{{final_example}}}}}\n\
         If the request cannot be drawn without more information, reply with one short plain-text question instead.\n\
         Tool results arrive as `Observation [call_id]: ...` messages. When a previous diagram exists in the \
         conversation, modify it rather than starting over.",
        persona = persona,
        tool = category.tool,
        tool_schema = tool_schema,
        final_example = final_example,
    )
}
