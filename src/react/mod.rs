//! 推理层：决策解析、推理轨迹、专家 Agent 状态机与兜底 Agent

pub mod fallback;
pub mod planner;
pub mod specialist;
pub mod trace;

pub use fallback::FallbackAgent;
pub use planner::{parse_decision, ActionRequest, Decision, Planner};
pub use specialist::{SpecialistAgent, SpecialistLimits, SpecialistState, StepOutcome};
pub use trace::{Completion, ReasoningTrace, TraceStep};
