//! 分类路由：请求（+ 历史）→ 分类标签 → 专家 Agent 或兜底 Agent
//!
//! 纯决策，无副作用；分类表启动时构建一次，Arc 共享。

pub mod category;
pub mod intent;

use std::sync::Arc;

pub use category::{Category, CategoryId, CategoryTable, ClassificationLabel, UNROUTABLE};
pub use intent::IntentClassifier;

use crate::llm::LlmClient;
use crate::memory::History;

/// 派发目标
#[derive(Debug, Clone, Copy)]
pub enum AgentHandle<'a> {
    Specialist(&'a Category),
    Fallback,
}

#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    pub label: ClassificationLabel,
    pub handle: AgentHandle<'a>,
}

pub struct Router {
    table: Arc<CategoryTable>,
    classifier: IntentClassifier,
}

impl Router {
    pub fn new(llm: Arc<dyn LlmClient>, table: Arc<CategoryTable>) -> Self {
        Self {
            classifier: IntentClassifier::new(llm, Arc::clone(&table)),
            table,
        }
    }

    pub fn table(&self) -> &Arc<CategoryTable> {
        &self.table
    }

    pub async fn route(&self, history: &History, request: &str) -> Route<'_> {
        let label = self.classifier.classify(history, request).await;
        let handle = match label {
            ClassificationLabel::Specialist(id) => match self.table.get(id) {
                Some(category) => AgentHandle::Specialist(category),
                None => AgentHandle::Fallback,
            },
            ClassificationLabel::Unroutable => AgentHandle::Fallback,
        };
        let label = match handle {
            AgentHandle::Specialist(_) => label,
            AgentHandle::Fallback => ClassificationLabel::Unroutable,
        };
        tracing::info!(label = self.table.label_name(label), "request routed");
        Route { label, handle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::tools::{builtin_tool_specs, ToolCatalog};

    fn router(llm: Arc<ScriptedLlmClient>) -> Router {
        let cfg = AppConfig::default();
        let catalog = ToolCatalog::from_specs(builtin_tool_specs());
        let table = CategoryTable::from_config(&cfg.categories, &cfg.fallback, &catalog).unwrap();
        Router::new(llm, Arc::new(table))
    }

    #[tokio::test]
    async fn test_route_to_specialist() {
        let router = router(Arc::new(ScriptedLlmClient::default()));
        let route = router
            .route(&History::new(), "Draw a sequence diagram for checkout")
            .await;
        let AgentHandle::Specialist(category) = route.handle else {
            panic!("expected specialist");
        };
        assert_eq!(category.tool, "draw_mermaid");
        assert_eq!(route.label, ClassificationLabel::Specialist(category.id));
    }

    #[tokio::test]
    async fn test_failing_classifier_routes_to_fallback() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_error(LlmError::Timeout(60));
        let router = router(llm);
        let route = router.route(&History::new(), "asdf qwerty").await;
        assert_eq!(route.label, ClassificationLabel::Unroutable);
        assert!(matches!(route.handle, AgentHandle::Fallback));
    }
}
