//! 工具目录
//!
//! 每个远程工具一条 ToolSpec（name / description / 参数 JSON Schema），由 ToolCatalog 按名登记与查找。
//! 目录在启动时构建（内置 Schema，或 tools/list 拉取的远端 Schema），之后只读共享。

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::tools::validate::validate_arguments;

/// 远程工具的声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// 参数 JSON Schema
    pub input_schema: Value,
}

/// 工具目录：按名称存储 ToolSpec
#[derive(Debug, Clone, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, ToolSpec>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: impl IntoIterator<Item = ToolSpec>) -> Self {
        let mut catalog = Self::new();
        for spec in specs {
            catalog.register(spec);
        }
        catalog
    }

    /// 同名工具后注册的覆盖先注册的
    pub fn register(&mut self, spec: ToolSpec) {
        self.tools.insert(spec.name.clone(), spec);
    }

    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// 按声明的 Schema 校验参数；返回不匹配描述（空表示通过）
    pub fn check_arguments(&self, name: &str, arguments: &Map<String, Value>) -> Vec<String> {
        match self.tools.get(name) {
            Some(spec) => validate_arguments(&spec.input_schema, arguments),
            None => vec![format!(
                "unknown tool `{}` (available: {})",
                name,
                self.tool_names().join(", ")
            )],
        }
    }

    /// 单个工具的 schema JSON，用于拼入专家的 system prompt
    pub fn schema_json(&self, name: &str) -> String {
        self.tools
            .get(name)
            .map(|spec| {
                serde_json::to_string_pretty(&serde_json::json!({
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.input_schema,
                }))
                .unwrap_or_default()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::builtin_tool_specs;

    #[test]
    fn test_catalog_lookup_and_unknown_tool() {
        let catalog = ToolCatalog::from_specs(builtin_tool_specs());
        assert!(catalog.contains("draw_mermaid"));
        assert_eq!(catalog.tool_names(), vec!["draw_mermaid", "draw_technical_diagram"]);

        let problems = catalog.check_arguments("draw_png", &Map::new());
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("unknown tool `draw_png`"));
        assert!(catalog.schema_json("draw_mermaid").contains("\"parameters\""));
    }
}
