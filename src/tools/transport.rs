//! 远程工具协议抽象：invoke(tool_name, arguments) -> {content, is_error}
//!
//! 生产实现为 McpHttpTransport（MCP tools/call over streamable HTTP）；测试与离线演示用 InMemoryTransport。

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::tools::ToolSpec;

/// 一次工具调用的返回：工具自身报错时 is_error = true，content 为错误说明
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

/// 传输层 / 协议层错误（网络不可达、JSON-RPC 错误、响应格式错误、超时）
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("tool `{0}` timed out")]
    Timeout(String),

    #[error("no tool server configured")]
    NotConfigured,
}

/// 远程工具协议
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// 调用一次工具；每个 ToolCall 对应一次调用
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, TransportError>;

    /// 列出远端工具及其参数 Schema；不支持时返回空列表
    async fn list_tools(&self) -> Result<Vec<ToolSpec>, TransportError> {
        Ok(Vec::new())
    }
}

/// 未配置工具服务时使用：所有调用都以 NotConfigured 失败
#[derive(Debug, Default)]
pub struct UnconfiguredTransport;

#[async_trait]
impl ToolTransport for UnconfiguredTransport {
    async fn invoke(
        &self,
        _tool_name: &str,
        _arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, TransportError> {
        Err(TransportError::NotConfigured)
    }
}

type Handler = dyn Fn(&str, &Map<String, Value>) -> Result<ToolOutput, TransportError> + Send + Sync;

/// 进程内传输：用闭包产生结果，并记录每次调用（工具名 + 参数）
pub struct InMemoryTransport {
    handler: Box<Handler>,
    latency: Duration,
    invocations: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl InMemoryTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &Map<String, Value>) -> Result<ToolOutput, TransportError> + Send + Sync + 'static,
    {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// 模拟渲染服务：返回 `{"uri": "mem://<tool>/<n>", "title": <args.title>}`
    pub fn renderer() -> Self {
        Self::new(|tool, args| {
            let title = args.get("title").and_then(Value::as_str).unwrap_or("untitled");
            let slug: String = title
                .chars()
                .map(|c| if c.is_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
                .collect();
            Ok(ToolOutput::ok(
                serde_json::json!({"uri": format!("mem://{}/{}", tool, slug), "title": title}).to_string(),
            ))
        })
    }

    /// 每次调用前等待固定时长
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn invocations(&self) -> Vec<(String, Map<String, Value>)> {
        self.invocations.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ToolTransport for InMemoryTransport {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, TransportError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Ok(mut log) = self.invocations.lock() {
            log.push((tool_name.to_string(), arguments.clone()));
        }
        (self.handler)(tool_name, arguments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_renderer_echoes_title() {
        let transport = InMemoryTransport::renderer();
        let args = serde_json::json!({"title": "Web App", "code": "a >> b"});
        let out = transport
            .invoke("draw_technical_diagram", args.as_object().unwrap())
            .await
            .unwrap();
        let v: Value = serde_json::from_str(&out.content).unwrap();
        assert_eq!(v["uri"], "mem://draw_technical_diagram/web-app");
        assert_eq!(v["title"], "Web App");
        assert_eq!(transport.invocations().len(), 1);
    }

    #[tokio::test]
    async fn test_unconfigured_transport_fails() {
        let result = UnconfiguredTransport.invoke("draw_mermaid", &Map::new()).await;
        assert_eq!(result, Err(TransportError::NotConfigured));
    }
}
