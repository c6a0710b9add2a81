//! 错误恢复引擎
//!
//! 把推理过程中的失败映射为 RecoveryAction，供专家循环决定是注入纠正提示重试，还是终止。
//! 参数不匹配与输出格式错误可纠正；远端工具失败与取消直接终止。

use crate::core::{AgentError, RecoveryAction};
use crate::tools::FailureKind;

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    /// 推理步骤内的错误（主要是决策解析失败）
    pub fn handle(&self, err: &AgentError) -> RecoveryAction {
        match err {
            AgentError::DecisionParseError(raw) => RecoveryAction::RetryWithPrompt(format!(
                "Your previous reply could not be parsed: {raw}\n\
                 Reply with exactly ONE JSON object and nothing else, either \
                 {{\"thought\": \"...\", \"tool\": \"<tool name>\", \"args\": {{...}}}} to call the tool, or \
                 {{\"thought\": \"...\", \"final\": {{...}}}} once the tool has succeeded."
            )),
            other => RecoveryAction::Abort(other.to_string()),
        }
    }

    /// 工具调用失败
    pub fn on_tool_failure(&self, tool: &str, kind: FailureKind, reason: &str) -> RecoveryAction {
        match kind {
            FailureKind::InvalidArguments => RecoveryAction::RetryWithPrompt(format!(
                "The call to `{tool}` was rejected before it ran:\n{reason}\n\
                 Fix the arguments so they match the tool schema and call `{tool}` again."
            )),
            FailureKind::Remote => {
                RecoveryAction::Abort(format!("tool `{tool}` failed: {reason}"))
            }
            FailureKind::Cancelled => {
                RecoveryAction::Abort(format!("tool `{tool}` was cancelled: {reason}"))
            }
        }
    }

    /// 请求了未绑定的工具
    pub fn on_disallowed_tool(&self, requested: &str, allowed: &str) -> RecoveryAction {
        RecoveryAction::RetryWithPrompt(format!(
            "Tool `{requested}` is not available to you. The only tool you can call is `{allowed}`."
        ))
    }

    /// 尚未有成功的工具调用就给出了 final
    pub fn on_premature_finish(&self, tool: &str) -> RecoveryAction {
        RecoveryAction::RetryWithPrompt(format!(
            "You must call `{tool}` and receive a successful result before giving the final answer. \
             Call `{tool}` now."
        ))
    }

    /// final 缺少输出字段
    pub fn on_missing_fields(&self, missing: &[String]) -> RecoveryAction {
        RecoveryAction::RetryWithPrompt(format!(
            "The final object is missing required fields: {}. Reply again with the complete final object.",
            missing.join(", ")
        ))
    }
}
