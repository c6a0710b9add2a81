//! 远程工具：目录与参数 Schema、代码静态检查、MCP 传输、执行器与调用桥

pub mod bridge;
pub mod executor;
pub mod lint;
pub mod mcp;
pub mod registry;
pub mod schema;
pub mod transport;
pub mod validate;

pub use bridge::{FailureKind, Observation, PlaceholderId, ToolBridge, ToolCall, ToolCallStatus};
pub use executor::ToolExecutor;
pub use lint::{lint, LintKind, LintReport};
pub use mcp::McpHttpTransport;
pub use registry::{ToolCatalog, ToolSpec};
pub use schema::{builtin_tool_specs, MermaidArgs, TechnicalDiagramArgs, MERMAID_TOOL, TECHNICAL_DIAGRAM_TOOL};
pub use transport::{InMemoryTransport, ToolOutput, ToolTransport, TransportError, UnconfiguredTransport};
pub use validate::validate_arguments;
