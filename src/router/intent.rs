//! 意图分类
//!
//! 先做关键词快速匹配（不调用 LLM）；未命中时请模型结合对话历史，从全部关键词中选一个作答，
//! 再映射回分类。模型不可用、回答为空或不在候选中时得到 Unroutable，从不向上传播错误。

use std::sync::Arc;

use crate::llm::LlmClient;
use crate::memory::{History, Message};
use crate::router::{CategoryTable, ClassificationLabel};

pub struct IntentClassifier {
    llm: Arc<dyn LlmClient>,
    table: Arc<CategoryTable>,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn LlmClient>, table: Arc<CategoryTable>) -> Self {
        Self { llm, table }
    }

    pub async fn classify(&self, history: &History, request: &str) -> ClassificationLabel {
        if let Some(label) = self.fast_match(request) {
            tracing::debug!(label = self.table.label_name(label), "keyword match");
            return label;
        }
        match self.llm_classify(history, request).await {
            Ok(label) => label,
            Err(e) => {
                tracing::warn!(error = %e, "intent classifier unavailable, routing to fallback");
                ClassificationLabel::Unroutable
            }
        }
    }

    /// 关键词快速匹配（不调用 LLM）
    pub fn fast_match(&self, request: &str) -> Option<ClassificationLabel> {
        self.table.keyword_match(request)
    }

    async fn llm_classify(&self, history: &History, request: &str) -> Result<ClassificationLabel, String> {
        let keywords = self.table.all_keywords();
        let system_prompt = format!(
            "You classify requests made to a diagram generation assistant.\n\
             Read the conversation history and the latest request, then answer with exactly one \
             of these keywords and nothing else:\n{}\n\n\
             Follow-up requests (\"add\", \"change\", \"remove\") usually continue the diagram type \
             of the previous turn. If the request is not about a diagram, answer `clarify`.",
            keywords.join(", ")
        );
        let history_text = if history.is_empty() {
            "(none)".to_string()
        } else {
            history.render()
        };
        let messages = vec![
            Message::system(system_prompt),
            Message::user(format!(
                "Conversation history:\n{}\n\nLatest request: {}",
                history_text, request
            )),
        ];

        let response = self
            .llm
            .complete(&messages)
            .await
            .map_err(|e| e.to_string())?;
        let answer = response
            .trim()
            .trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c == '.')
            .to_lowercase();
        if answer.is_empty() {
            return Err("empty classification".to_string());
        }

        let mut label = self.table.label_for_keyword(&answer);
        if label == ClassificationLabel::Unroutable {
            // 回答里带了解释时，取其中第一个候选关键词
            if let Some(found) = self.table.keyword_match(&answer) {
                label = found;
            }
        }
        tracing::info!(answer = %answer, label = self.table.label_name(label), "model classification");
        Ok(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::{LlmError, ScriptedLlmClient};
    use crate::memory::{TurnContent, TurnRole};
    use crate::tools::{builtin_tool_specs, ToolCatalog};

    fn table() -> Arc<CategoryTable> {
        let cfg = AppConfig::default();
        let catalog = ToolCatalog::from_specs(builtin_tool_specs());
        Arc::new(CategoryTable::from_config(&cfg.categories, &cfg.fallback, &catalog).unwrap())
    }

    #[tokio::test]
    async fn test_keyword_match_skips_model() {
        let llm = Arc::new(ScriptedLlmClient::new(Vec::<String>::new()));
        let classifier = IntentClassifier::new(llm.clone(), table());
        let label = classifier
            .classify(&History::new(), "Create a cloud architecture diagram with AWS services")
            .await;
        assert_eq!(classifier.table.label_name(label), "technical");
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_model_answer_mapped_back_with_history() {
        let llm = Arc::new(ScriptedLlmClient::new(["Architecture."]));
        let classifier = IntentClassifier::new(llm.clone(), table());
        let mut history = History::new();
        history.append(TurnRole::User, TurnContent::text("Draw my AWS setup"));
        let label = classifier.classify(&history, "Add a caching layer").await;
        assert_eq!(classifier.table.label_name(label), "technical");

        let requests = llm.requests();
        assert_eq!(requests.len(), 1);
        assert!(requests[0][1].content.contains("user: Draw my AWS setup"));
    }

    #[tokio::test]
    async fn test_unknown_answer_and_failure_are_unroutable() {
        let llm = Arc::new(ScriptedLlmClient::new(["banana"]));
        let classifier = IntentClassifier::new(llm.clone(), table());
        assert_eq!(
            classifier.classify(&History::new(), "asdf qwerty").await,
            ClassificationLabel::Unroutable
        );

        llm.push_error(LlmError::Request("503".into()));
        assert_eq!(
            classifier.classify(&History::new(), "asdf qwerty").await,
            ClassificationLabel::Unroutable
        );

        llm.push_reply("   ");
        assert_eq!(
            classifier.classify(&History::new(), "asdf qwerty").await,
            ClassificationLabel::Unroutable
        );
    }
}
