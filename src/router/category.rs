//! 分类表：启动时从 [[categories]] 构建一次，之后通过 Arc 只读共享
//!
//! 每个分类绑定一个专家 Agent 与一个远程工具；分类按配置顺序排列，顺序即关键词匹配的优先级。

use std::collections::HashSet;

use serde::Serialize;

use crate::config::{CategorySection, FallbackSection};
use crate::core::AgentError;
use crate::tools::{LintKind, ToolCatalog};

/// 保留标签，不能用作分类名
pub const UNROUTABLE: &str = "unroutable";

/// 分类在表中的位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct CategoryId(usize);

impl CategoryId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// 每个请求产生一次的分类结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClassificationLabel {
    Specialist(CategoryId),
    Unroutable,
}

#[derive(Debug, Clone)]
pub struct Category {
    pub id: CategoryId,
    pub label: String,
    pub tool: String,
    /// 已转小写
    pub keywords: Vec<String>,
    pub output_fields: Vec<String>,
    pub prompt: Option<String>,
    pub lint: Option<LintKind>,
}

#[derive(Debug, Clone)]
pub struct CategoryTable {
    categories: Vec<Category>,
    fallback_keywords: Vec<String>,
}

impl CategoryTable {
    /// 构建并校验：标签唯一且非保留、关键词非空、绑定工具存在于目录中
    pub fn from_config(
        sections: &[CategorySection],
        fallback: &FallbackSection,
        catalog: &ToolCatalog,
    ) -> Result<Self, AgentError> {
        if sections.is_empty() {
            return Err(AgentError::ConfigError(
                "at least one category must be configured".into(),
            ));
        }
        let mut labels = HashSet::new();
        let mut seen_keywords = HashSet::new();
        let mut categories = Vec::with_capacity(sections.len());

        for (i, section) in sections.iter().enumerate() {
            let label = section.label.trim().to_lowercase();
            if label.is_empty() || label == UNROUTABLE {
                return Err(AgentError::ConfigError(format!(
                    "category #{} has an empty or reserved label `{}`",
                    i, section.label
                )));
            }
            if !labels.insert(label.clone()) {
                return Err(AgentError::ConfigError(format!(
                    "duplicate category label `{}`",
                    label
                )));
            }
            let keywords: Vec<String> = section
                .keywords
                .iter()
                .map(|k| normalize(k))
                .filter(|k| !k.is_empty())
                .collect();
            if keywords.is_empty() {
                return Err(AgentError::ConfigError(format!(
                    "category `{}` has no keywords",
                    label
                )));
            }
            if !catalog.contains(&section.tool) {
                return Err(AgentError::ConfigError(format!(
                    "category `{}` is bound to unknown tool `{}` (available: {})",
                    label,
                    section.tool,
                    catalog.tool_names().join(", ")
                )));
            }
            for k in &keywords {
                if !seen_keywords.insert(k.clone()) {
                    tracing::warn!(keyword = %k, category = %label, "keyword already claimed by a higher-priority category");
                }
            }
            categories.push(Category {
                id: CategoryId(i),
                label,
                tool: section.tool.clone(),
                keywords,
                output_fields: section.output_fields.clone(),
                prompt: section.prompt.clone(),
                lint: section.lint,
            });
        }

        let fallback_keywords = fallback
            .keywords
            .iter()
            .map(|k| normalize(k))
            .filter(|k| !k.is_empty())
            .collect();

        Ok(Self {
            categories,
            fallback_keywords,
        })
    }

    pub fn get(&self, id: CategoryId) -> Option<&Category> {
        self.categories.get(id.0)
    }

    pub fn categories(&self) -> &[Category] {
        &self.categories
    }

    pub fn label_name(&self, label: ClassificationLabel) -> &str {
        match label {
            ClassificationLabel::Specialist(id) => self
                .get(id)
                .map(|c| c.label.as_str())
                .unwrap_or(UNROUTABLE),
            ClassificationLabel::Unroutable => UNROUTABLE,
        }
    }

    /// 整词、大小写无关的关键词匹配
    ///
    /// 按优先级扫描分类，第一个命中的分类胜出；之后扫描兜底关键词（命中则为 Unroutable）。
    /// 都未命中返回 None，交给模型分类。
    pub fn keyword_match(&self, text: &str) -> Option<ClassificationLabel> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }
        for category in &self.categories {
            if category.keywords.iter().any(|k| contains_phrase(&tokens, k)) {
                return Some(ClassificationLabel::Specialist(category.id));
            }
        }
        if self
            .fallback_keywords
            .iter()
            .any(|k| contains_phrase(&tokens, k))
        {
            return Some(ClassificationLabel::Unroutable);
        }
        None
    }

    /// 模型分类器回答的关键词映射回分类；未知关键词为 Unroutable
    pub fn label_for_keyword(&self, keyword: &str) -> ClassificationLabel {
        let keyword = normalize(keyword);
        self.categories
            .iter()
            .find(|c| c.keywords.contains(&keyword))
            .map(|c| ClassificationLabel::Specialist(c.id))
            .unwrap_or(ClassificationLabel::Unroutable)
    }

    /// 全部分类关键词加兜底关键词（模型分类器的候选答案）
    pub fn all_keywords(&self) -> Vec<&str> {
        self.categories
            .iter()
            .flat_map(|c| c.keywords.iter())
            .chain(self.fallback_keywords.iter())
            .map(String::as_str)
            .collect()
    }
}

fn normalize(keyword: &str) -> String {
    tokenize(keyword).join(" ")
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_phrase(tokens: &[String], phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split(' ').collect();
    tokens
        .windows(words.len())
        .any(|w| w.iter().zip(&words).all(|(t, k)| t == k))
}
