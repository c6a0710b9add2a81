//! 结果抽取：从终止的推理轨迹得到 AgentResult，并把本次交换写入对话历史
//!
//! 成功需要同时满足：轨迹以结构化输出结束、输出字段齐全、产出它的工具调用已成功解析。
//! 工具/协议失败与轮数耗尽 → error；无法路由与自由文本回答 → needs_clarification。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::memory::{History, TurnContent, TurnRole};
use crate::react::{Completion, ReasoningTrace};
use crate::router::Category;
use crate::tools::{ToolBridge, ToolCallStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    NeedsClarification,
    Error,
}

/// 返回给调用方的结果（线上格式）；没有产物时 title 与 artifact_reference 为空串
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentResult {
    pub outcome: Outcome,
    pub title: String,
    pub artifact_reference: String,
    pub message: String,
    pub history_blob: String,
}

/// 尚未写入历史的抽取结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub outcome: Outcome,
    pub title: Option<String>,
    pub artifact_reference: Option<String>,
    pub message: String,
}

impl Extraction {
    pub fn clarification(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::NeedsClarification,
            title: None,
            artifact_reference: None,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Error,
            title: None,
            artifact_reference: None,
            message: message.into(),
        }
    }
}

/// 专家 Agent 的轨迹 → 抽取结果
pub fn from_trace(trace: &ReasoningTrace, category: &Category, bridge: &ToolBridge) -> Extraction {
    match trace.completion() {
        Some(Completion::Structured {
            output,
            source_call,
            tool_content,
        }) => {
            let source_ok = bridge
                .call(source_call)
                .map(|c| c.status == ToolCallStatus::Resolved)
                .unwrap_or(false);
            if !source_ok {
                return Extraction::error(format!(
                    "the `{}` call behind the final answer did not succeed",
                    category.tool
                ));
            }
            let missing: Vec<&str> = category
                .output_fields
                .iter()
                .filter(|f| output.get(f.as_str()).map_or(true, Value::is_null))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Extraction::error(format!(
                    "structured output is missing fields: {}",
                    missing.join(", ")
                ));
            }

            let (reference, tool_title) = parse_tool_content(tool_content);
            let Some(reference) = reference else {
                return Extraction::error(format!(
                    "`{}` returned no artifact reference",
                    category.tool
                ));
            };
            let title = tool_title
                .or_else(|| non_empty_str(output.get("title")))
                .unwrap_or_else(|| format!("{} diagram", category.label));
            Extraction {
                outcome: Outcome::Success,
                message: format!("Created \"{}\".", title),
                title: Some(title),
                artifact_reference: Some(reference),
            }
        }
        Some(Completion::FreeText { text }) => Extraction::clarification(text.trim()),
        Some(Completion::Failed { reason }) => Extraction::error(reason.clone()),
        None => Extraction::error("reasoning ended without a result"),
    }
}

/// 渲染工具返回 `{"uri": ..., "title": ...}`；非 JSON 内容原样作为引用
fn parse_tool_content(content: &str) -> (Option<String>, Option<String>) {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => (
            non_empty_str(map.get("uri")).or_else(|| non_empty_str(map.get("url"))),
            non_empty_str(map.get("title")),
        ),
        _ => {
            let raw = content.trim();
            ((!raw.is_empty()).then(|| raw.to_string()), None)
        }
    }
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// 追加请求 Turn 与应答 Turn（成功时为产物引用），并生成 AgentResult
pub fn finalize(
    history: &mut History,
    request: &str,
    extraction: Extraction,
    label: &str,
) -> AgentResult {
    history.append(TurnRole::User, TurnContent::text(request));
    let agent_turn = match (&extraction.outcome, &extraction.title, &extraction.artifact_reference) {
        (Outcome::Success, Some(title), Some(reference)) => TurnContent::Artifact {
            title: title.clone(),
            artifact_reference: reference.clone(),
            label: label.to_string(),
        },
        _ => TurnContent::text(extraction.message.clone()),
    };
    history.append(TurnRole::Agent, agent_turn);

    AgentResult {
        outcome: extraction.outcome,
        title: extraction.title.unwrap_or_default(),
        artifact_reference: extraction.artifact_reference.unwrap_or_default(),
        message: extraction.message,
        history_blob: history.serialize(),
    }
}
