//! Mock / Scripted LLM 客户端（用于离线运行与测试，无需 API）
//!
//! - MockLlmClient：未配置任何 API Key 时的兜底，总是返回一句固定说明（分类会落到 unroutable，专家得到自由文本）
//! - ScriptedLlmClient：按顺序吐出预置回复，并记录每次收到的消息，便于断言提示词内容

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, LlmError};
use crate::memory::{Message, Role};

/// 离线 Mock：不调用任何模型
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        Ok(format!(
            "No language model is configured, so I cannot work on \"{}\" yet. \
             Set DEEPSEEK_API_KEY or OPENAI_API_KEY and try again.",
            last_user.lines().last().unwrap_or_default().trim()
        ))
    }
}

/// 脚本化客户端：依次返回预置的 completion（或错误），用完后返回 LlmError::Exhausted
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|s| Ok(s.into())).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条成功回复
    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Ok(reply.into()));
        }
    }

    /// 追加一次失败（模拟模型不可用）
    pub fn push_error(&self, err: LlmError) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(err));
        }
    }

    /// 已收到的全部请求（按调用顺序）
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// 剩余未消费的回复数
    pub fn remaining(&self) -> usize {
        self.replies.lock().map(|q| q.len()).unwrap_or(0)
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, LlmError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        self.replies
            .lock()
            .map_err(|e| LlmError::Request(e.to_string()))?
            .pop_front()
            .unwrap_or(Err(LlmError::Exhausted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replies_in_order() {
        let llm = ScriptedLlmClient::new(["first", "second"]);
        llm.push_error(LlmError::Timeout(5));

        let msgs = vec![Message::user("hi")];
        assert_eq!(llm.complete(&msgs).await.unwrap(), "first");
        assert_eq!(llm.complete(&msgs).await.unwrap(), "second");
        assert_eq!(llm.complete(&msgs).await, Err(LlmError::Timeout(5)));
        assert_eq!(llm.complete(&msgs).await, Err(LlmError::Exhausted));
        assert_eq!(llm.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_mentions_request() {
        let out = MockLlmClient
            .complete(&[Message::system("sys"), Message::user("draw a thing")])
            .await
            .unwrap();
        assert!(out.contains("draw a thing"));
    }
}
