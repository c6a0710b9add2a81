//! 图表代码静态检查：在请求远端渲染前拦下明显不合法的代码
//!
//! - PythonDiagrams：diagrams 库模板，禁止 import / eval / exec / open、危险模块、with 语句
//! - Mermaid：首行必须声明图类型，按类型给出结构性警告
//!
//! errors 会让 ToolCall 失败（参数不匹配），warnings 只附在诊断信息里。

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// 检查规则集
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LintKind {
    PythonDiagrams,
    Mermaid,
}

/// 检查结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LintReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl LintReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// 供模型纠正用的反馈文本
    pub fn feedback(&self) -> String {
        let mut lines = Vec::new();
        if !self.errors.is_empty() {
            lines.push("ERRORS:".to_string());
            lines.extend(self.errors.iter().map(|e| format!("  - {e}")));
        }
        if !self.warnings.is_empty() {
            lines.push("WARNINGS:".to_string());
            lines.extend(self.warnings.iter().map(|w| format!("  - {w}")));
        }
        if lines.is_empty() {
            "Code is valid".to_string()
        } else {
            lines.join("\n")
        }
    }
}

/// (模式, 诊断里显示的关键字)；按语句或调用匹配，节点标签里的普通单词不算
const FORBIDDEN_PATTERNS: &[(&str, &str)] = &[
    (r"(?m)^\s*import\s+\w", "import"),
    (r"(?m)^\s*from\s+[\w.]+\s+import\b", "from"),
    (r"__import__\s*\(", "__import__"),
    (r"\beval\s*\(", "eval("),
    (r"\bexec\s*\(", "exec("),
    (r"\bcompile\s*\(", "compile("),
    (r"\bopen\s*\(", "open("),
    (r"\bfile\s*\(", "file("),
];

const DANGEROUS_PATTERNS: &[(&str, &str)] = &[
    (r"\bos\.", "os."),
    (r"\bsys\.", "sys."),
    (r"\bsubprocess\b", "subprocess"),
    (r"\bpathlib\b", "pathlib"),
    (r"__builtins__", "__builtins__"),
    (r"__globals__", "__globals__"),
    (r"__locals__", "__locals__"),
];

const MERMAID_TYPES: &[&str] = &[
    "flowchart",
    "graph",
    "sequenceDiagram",
    "classDiagram",
    "stateDiagram",
    "erDiagram",
    "gantt",
    "pie",
    "journey",
    "gitGraph",
];

pub fn lint(kind: LintKind, code: &str) -> LintReport {
    if code.trim().is_empty() {
        return LintReport {
            errors: vec!["Code is empty".to_string()],
            warnings: Vec::new(),
        };
    }
    match kind {
        LintKind::PythonDiagrams => lint_python_diagrams(code),
        LintKind::Mermaid => lint_mermaid(code),
    }
}

fn lint_python_diagrams(code: &str) -> LintReport {
    let mut report = LintReport::default();

    for (re, kw) in forbidden_res() {
        if re.is_match(code) {
            report.errors.push(format!(
                "Code contains forbidden keyword: {kw}. Imports are handled externally."
            ));
        }
    }
    for (re, module) in dangerous_res() {
        if re.is_match(code) {
            report
                .errors
                .push(format!("Code contains dangerous module reference: {module}"));
        }
    }
    if with_statement_re().is_match(code) {
        report.errors.push(
            "Code contains 'with' statement. Diagram context manager is handled externally."
                .to_string(),
        );
    }
    if !code.contains(">>") && !code.contains("Edge(") {
        report.warnings.push(
            "No edge connections found (>> operator or Edge() calls). \
             Diagram may not show relationships between nodes."
                .to_string(),
        );
    }
    if !code.contains('=') {
        report
            .warnings
            .push("No variable assignments found. Are nodes being created?".to_string());
    }
    report
}

fn compile_all(patterns: &[(&str, &'static str)]) -> Vec<(Regex, &'static str)> {
    patterns
        .iter()
        .map(|(p, label)| (Regex::new(p).expect("static regex"), *label))
        .collect()
}

fn forbidden_res() -> &'static [(Regex, &'static str)] {
    static RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| compile_all(FORBIDDEN_PATTERNS))
}

fn dangerous_res() -> &'static [(Regex, &'static str)] {
    static RES: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    RES.get_or_init(|| compile_all(DANGEROUS_PATTERNS))
}

fn with_statement_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(async\s+)?with\s").expect("static regex"))
}

fn flowchart_node_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[.*\]|\(.*\)|\{.*\}").expect("static regex"))
}

fn er_entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+\s*\{").expect("static regex"))
}

fn lint_mermaid(code: &str) -> LintReport {
    let mut report = LintReport::default();
    let lines: Vec<&str> = code.lines().map(str::trim).filter(|l| !l.is_empty()).collect();

    let first = lines.first().map(|l| l.to_lowercase()).unwrap_or_default();
    let Some(diagram_type) = MERMAID_TYPES
        .iter()
        .find(|t| first.starts_with(&t.to_lowercase()))
    else {
        report.errors.push(format!(
            "First line must declare diagram type. Valid types: {}",
            MERMAID_TYPES.join(", ")
        ));
        return report;
    };

    match *diagram_type {
        "flowchart" | "graph" => {
            let arrows = ["-->", "---", "-.->", "==>", "->", "~~>"];
            if !arrows.iter().any(|a| code.contains(a)) {
                report
                    .warnings
                    .push("No arrow connections found in flowchart".to_string());
            }
            if !flowchart_node_re().is_match(code) {
                report.warnings.push(
                    "No node definitions found (brackets, parentheses, braces)".to_string(),
                );
            }
        }
        "sequenceDiagram" => {
            let has_participants = code.to_lowercase().contains("participant ");
            if !has_participants && !code.contains("->") {
                report.warnings.push(
                    "No participants or message arrows found in sequence diagram".to_string(),
                );
            }
        }
        "erDiagram" => {
            if !er_entity_re().is_match(code) {
                report
                    .warnings
                    .push("No entity definitions found (entity {)".to_string());
            }
            if !["}o", "}|", "||", "|o", "o{"].iter().any(|r| code.contains(r)) {
                report
                    .warnings
                    .push("No relationship symbols found".to_string());
            }
        }
        _ => {}
    }

    if lines.len() < 2 {
        report
            .warnings
            .push("Diagram only has type declaration, no content".to_string());
    }
    report
}
