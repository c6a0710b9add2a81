//! Agent 错误类型与恢复动作
//!
//! 与 RecoveryEngine 配合：根据工具调用失败类型决定 RetryWithPrompt（纠正参数后重试）或 Abort（终止推理）。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误（配置、LLM、决策解析）
///
/// 工具调用失败不走这里：桥把它们记录为 Observation，由 RecoveryEngine::on_tool_failure 处理。
///
/// 单次请求内的错误都会被折叠进 AgentResult，不会抛给调用方；
/// 只有启动阶段（构建 Orchestrator）才会以 Err 形式返回。
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("LLM error: {0}")]
    LlmError(#[from] LlmError),

    #[error("Decision parse error: {0}")]
    DecisionParseError(String),
}

/// 恢复引擎根据失败类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将提示注入下一轮，让模型纠正后重试（参数不匹配、输出格式错误）
    RetryWithPrompt(String),
    /// 终止当前推理，附带诊断信息
    Abort(String),
}
