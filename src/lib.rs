//! Easel - 图表助手的路由核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量），含分类表
//! - **core**: 编排器、请求监管、错误恢复、结果抽取
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 提示词消息与跨请求的对话历史
//! - **react**: 决策解析、推理轨迹、专家 Agent 状态机、兜底 Agent
//! - **router**: 关键词 + 模型分类，派发到专家或兜底
//! - **tools**: 工具目录与 Schema 校验、代码静态检查、MCP 传输、执行器与调用桥

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod react;
pub mod router;
pub mod tools;

pub use crate::core::{AgentResult, Orchestrator, OrchestratorBuilder, Outcome};
