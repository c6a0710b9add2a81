//! 推理轨迹：thought / action / observation 有序步骤，以及终止状态
//!
//! 轨迹归单个请求所有，抽取结果后丢弃；只有最终回复进入对话历史。

use serde::Serialize;
use serde_json::{Map, Value};

use crate::tools::{Observation, PlaceholderId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TraceStep {
    Thought {
        text: String,
    },
    Action {
        placeholder: PlaceholderId,
        tool: String,
        args: Value,
    },
    Observation {
        placeholder: PlaceholderId,
        observation: Observation,
    },
}

/// 推理的终止状态
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Completion {
    /// 结构化输出，source_call 为产出它的那次成功工具调用
    Structured {
        output: Map<String, Value>,
        source_call: PlaceholderId,
        tool_content: String,
    },
    /// 模型以自由文本结束（通常是澄清问题）
    FreeText { text: String },
    /// 工具失败、参数多次不合法、达到轮数上限、模型不可用或请求取消
    Failed { reason: String },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReasoningTrace {
    steps: Vec<TraceStep>,
    completion: Option<Completion>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, step: TraceStep) {
        if let Ok(json) = serde_json::to_string(&step) {
            tracing::debug!(step = %json, "trace");
        }
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    /// 只能结束一次，之后的调用被忽略
    pub fn finish(&mut self, completion: Completion) {
        if self.completion.is_none() {
            self.completion = Some(completion);
        }
    }

    pub fn completion(&self) -> Option<&Completion> {
        self.completion.as_ref()
    }

    pub fn is_done(&self) -> bool {
        self.completion.is_some()
    }

    pub fn action_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, TraceStep::Action { .. }))
            .count()
    }
}
