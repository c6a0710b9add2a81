//! 核心编排层：错误与恢复、请求监管、结果抽取、编排器与构建器

pub mod builder;
pub mod error;
pub mod extractor;
pub mod orchestrator;
pub mod recovery;
pub mod supervisor;

pub use builder::OrchestratorBuilder;
pub use error::{AgentError, RecoveryAction};
pub use extractor::{AgentResult, Extraction, Outcome};
pub use orchestrator::Orchestrator;
pub use recovery::RecoveryEngine;
pub use supervisor::RequestSupervisor;
