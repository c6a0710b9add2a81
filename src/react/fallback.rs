//! 兜底 Agent：无法路由到专家时，用一句自然语言请用户澄清
//!
//! 不调用工具，只咨询一次模型；任何失败都退化为固定的道歉语，返回值永远非空。

use std::sync::Arc;

use crate::config::FallbackSection;
use crate::llm::LlmClient;
use crate::memory::{History, Message};

const LAST_RESORT: &str = "Sorry, I could not work out what diagram you need. Could you describe it in more detail?";

pub struct FallbackAgent {
    llm: Arc<dyn LlmClient>,
    prompt: String,
    apology: String,
}

impl FallbackAgent {
    pub fn new(llm: Arc<dyn LlmClient>, cfg: &FallbackSection) -> Self {
        let apology = if cfg.apology.trim().is_empty() {
            LAST_RESORT.to_string()
        } else {
            cfg.apology.trim().to_string()
        };
        Self {
            llm,
            prompt: cfg.prompt.clone(),
            apology,
        }
    }

    pub fn apology(&self) -> &str {
        &self.apology
    }

    pub async fn respond(&self, history: &History, request: &str) -> String {
        let mut messages = vec![Message::system(self.prompt.clone())];
        messages.extend(history.to_messages());
        messages.push(Message::user(request));

        match self.llm.complete(&messages).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                tracing::warn!("fallback model returned an empty reply");
                self.apology.clone()
            }
            Err(e) => {
                tracing::warn!(error = %e, "fallback model unavailable");
                self.apology.clone()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, ScriptedLlmClient};

    #[tokio::test]
    async fn test_reply_passed_through() {
        let llm = Arc::new(ScriptedLlmClient::new(["  Do you want a flowchart or an architecture diagram?  "]));
        let agent = FallbackAgent::new(llm.clone(), &FallbackSection::default());
        let reply = agent.respond(&History::new(), "asdf qwerty").await;
        assert_eq!(reply, "Do you want a flowchart or an architecture diagram?");
        assert_eq!(llm.requests()[0].last().unwrap().content, "asdf qwerty");
    }

    #[tokio::test]
    async fn test_failures_become_apology() {
        let llm = Arc::new(ScriptedLlmClient::new([""]));
        llm.push_error(LlmError::Request("down".into()));
        let cfg = FallbackSection {
            apology: "  ".into(),
            ..FallbackSection::default()
        };
        let agent = FallbackAgent::new(llm, &cfg);
        assert_eq!(agent.respond(&History::new(), "x").await, LAST_RESORT);
        assert_eq!(agent.respond(&History::new(), "x").await, LAST_RESORT);
        assert!(!agent.respond(&History::new(), "x").await.is_empty());
    }
}
