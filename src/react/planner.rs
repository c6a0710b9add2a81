//! Planner：调用模型，并把模型输出解析为推理决策
//!
//! 专家 Agent 的每一步都要求模型输出一个 JSON 对象：
//! - `{"thought": "...", "tool": "draw_mermaid", "args": {...}}` 或 `{"thought": "...", "tool_calls": [...]}`：调用工具
//! - `{"thought": "...", "final": {...}}`：给出结构化输出
//! - 纯文本（或 `{"answer": "..."}`）：自由文本回复，通常是澄清问题

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::AgentError;
use crate::llm::LlmClient;
use crate::memory::Message;

/// 一次工具调用请求
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub tool: String,
    pub args: Map<String, Value>,
}

/// 模型在一步中的决策
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Act {
        thought: Option<String>,
        calls: Vec<ActionRequest>,
    },
    Finish {
        thought: Option<String>,
        output: Map<String, Value>,
    },
    Respond {
        text: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawCall {
    tool: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
struct RawDecision {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Value,
    #[serde(default)]
    tool_calls: Vec<RawCall>,
    #[serde(rename = "final", default)]
    final_output: Option<Value>,
    #[serde(default)]
    answer: Option<String>,
}

/// 解析模型输出；含 JSON 但无法解析时返回 DecisionParseError（交给恢复引擎生成纠正提示）
pub fn parse_decision(output: &str) -> Result<Decision, AgentError> {
    let trimmed = output.trim();

    let json_str = if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        rest.find("```")
            .map(|end| rest[..end].trim())
            .unwrap_or(rest.trim())
    } else if let Some(start) = trimmed.find('{') {
        match trimmed.rfind('}') {
            Some(end) if end > start => &trimmed[start..=end],
            _ => &trimmed[start..],
        }
    } else {
        return Ok(Decision::Respond {
            text: trimmed.to_string(),
        });
    };

    let raw: RawDecision = serde_json::from_str(json_str)
        .map_err(|e| AgentError::DecisionParseError(format!("{}: {}", e, preview(json_str))))?;
    let thought = raw.thought.filter(|t| !t.trim().is_empty());

    if let Some(output) = raw.final_output {
        return match output {
            Value::Object(output) => Ok(Decision::Finish { thought, output }),
            other => Err(AgentError::DecisionParseError(format!(
                "`final` must be a JSON object, got {}",
                preview(&other.to_string())
            ))),
        };
    }

    let mut calls = Vec::new();
    if let Some(tool) = raw.tool.filter(|t| !t.trim().is_empty()) {
        calls.push(ActionRequest {
            tool,
            args: into_args(raw.args)?,
        });
    }
    for call in raw.tool_calls {
        calls.push(ActionRequest {
            tool: call.tool,
            args: into_args(call.args)?,
        });
    }
    if !calls.is_empty() {
        return Ok(Decision::Act { thought, calls });
    }

    match raw.answer.or(thought) {
        Some(text) if !text.trim().is_empty() => Ok(Decision::Respond { text }),
        _ => Err(AgentError::DecisionParseError(format!(
            "JSON carries no tool call, final output or answer: {}",
            preview(json_str)
        ))),
    }
}

fn into_args(args: Value) -> Result<Map<String, Value>, AgentError> {
    match args {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(Map::new()),
        other => Err(AgentError::DecisionParseError(format!(
            "`args` must be a JSON object, got {}",
            preview(&other.to_string())
        ))),
    }
}

fn preview(s: &str) -> String {
    if s.chars().count() > 300 {
        format!("{}...", s.chars().take(300).collect::<String>())
    } else {
        s.to_string()
    }
}

/// Planner：持有 LLM，负责一次模型调用
pub struct Planner {
    llm: Arc<dyn LlmClient>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// 获取 LLM 累计 token 使用统计
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.llm.token_usage()
    }

    pub async fn plan(&self, messages: &[Message]) -> Result<String, AgentError> {
        Ok(self.llm.complete(messages).await?)
    }
}
