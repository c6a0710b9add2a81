//! 内置渲染工具的参数 Schema（schemars 自动生成）
//!
//! 与远端渲染服务的参数模型一致；未开启 fetch_remote_schemas 时，Bridge 按这些 Schema 校验参数。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::tools::ToolSpec;

pub const TECHNICAL_DIAGRAM_TOOL: &str = "draw_technical_diagram";
pub const MERMAID_TOOL: &str = "draw_mermaid";

/// draw_technical_diagram 的参数
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TechnicalDiagramArgs {
    /// 图的标题，向读者说明图的内容
    pub title: String,
    /// diagrams 库代码：不含 import，不含 with Diagram(...)，用 >> 连接节点
    pub code: String,
    /// 主图渲染参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_graph_args: Option<HashMap<String, Value>>,
    /// 节点渲染参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_node_args: Option<HashMap<String, Value>>,
    /// 连线渲染参数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_edge_args: Option<HashMap<String, Value>>,
}

/// draw_mermaid 的参数
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MermaidArgs {
    /// 合法 Mermaid 代码，首行声明图类型（如 flowchart TD）
    pub code: String,
    pub title: String,
    /// 输出格式：svg（默认）或 png
    #[serde(default = "default_output_format")]
    pub output_format: String,
}

fn default_output_format() -> String {
    "svg".to_string()
}

fn schema_value<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// 内置工具目录条目
pub fn builtin_tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: TECHNICAL_DIAGRAM_TOOL.to_string(),
            description: "Draws a diagram from a `diagrams` library Python template. Best for \
                          system design and cloud architecture. Returns a URI to the rendered image."
                .to_string(),
            input_schema: schema_value::<TechnicalDiagramArgs>(),
        },
        ToolSpec {
            name: MERMAID_TOOL.to_string(),
            description: "Renders Mermaid code (flowchart, sequence, class, state, ER, gantt...) \
                          and returns a URI to view it."
                .to_string(),
            input_schema: schema_value::<MermaidArgs>(),
        },
    ]
}
