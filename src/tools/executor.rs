//! 工具执行器
//!
//! 持有 ToolTransport、单次调用超时与传输失败重试次数；execute(tool_name, args) 在超时内调用 transport.invoke，
//! 仅对网络/协议错误重试（工具自身报错 is_error 不重试）；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::tools::{ToolOutput, ToolTransport, TransportError};

/// 工具执行器：对每次调用施加超时与有限重试
pub struct ToolExecutor {
    transport: Arc<dyn ToolTransport>,
    timeout: Duration,
    retry_attempts: u32,
}

impl ToolExecutor {
    pub fn new(transport: Arc<dyn ToolTransport>, timeout_secs: u64) -> Self {
        Self {
            transport,
            timeout: Duration::from_secs(timeout_secs),
            retry_attempts: 0,
        }
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn transport(&self) -> &Arc<dyn ToolTransport> {
        &self.transport
    }

    /// 执行指定工具；超时返回 TransportError::Timeout；输出 JSON 审计日志
    pub async fn execute(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> Result<ToolOutput, TransportError> {
        let start = Instant::now();
        let mut attempt = 0u32;
        let result = loop {
            let result = match timeout(self.timeout, self.transport.invoke(tool_name, args)).await {
                Ok(r) => r,
                Err(_) => Err(TransportError::Timeout(tool_name.to_string())),
            };
            match result {
                Err(e) if attempt < self.retry_attempts => {
                    attempt += 1;
                    tracing::warn!(tool = tool_name, attempt, error = %e, "tool transport failed, retrying");
                }
                other => break other,
            }
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(out) if !out.is_error => (true, "ok"),
            Ok(_) => (false, "tool_error"),
            Err(TransportError::Timeout(_)) => (false, "timeout"),
            Err(_) => (false, "transport_error"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "attempts": attempt + 1,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview(args),
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// 前 n 次返回网络错误，之后成功
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ToolTransport for Flaky {
        async fn invoke(
            &self,
            _tool_name: &str,
            _arguments: &Map<String, Value>,
        ) -> Result<ToolOutput, TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                Err(TransportError::Http("connection refused".into()))
            } else {
                Ok(ToolOutput::ok("{\"uri\": \"u\"}"))
            }
        }
    }

    struct Slow;

    #[async_trait]
    impl ToolTransport for Slow {
        async fn invoke(
            &self,
            _tool_name: &str,
            _arguments: &Map<String, Value>,
        ) -> Result<ToolOutput, TransportError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(ToolOutput::ok("late"))
        }
    }

    #[tokio::test]
    async fn test_no_retry_by_default() {
        let transport = Arc::new(Flaky {
            failures: 1,
            calls: AtomicU32::new(0),
        });
        let exec = ToolExecutor::new(transport.clone(), 5);
        let result = exec.execute("draw_mermaid", &Map::new()).await;
        assert!(matches!(result, Err(TransportError::Http(_))));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_recovers_transport_error() {
        let transport = Arc::new(Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        });
        let exec = ToolExecutor::new(transport.clone(), 5).with_retry_attempts(2);
        let out = exec.execute("draw_mermaid", &Map::new()).await.unwrap();
        assert!(!out.is_error);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_timeout() {
        let exec = ToolExecutor::new(Arc::new(Slow), 1);
        let result = exec.execute("draw_mermaid", &Map::new()).await;
        assert_eq!(result, Err(TransportError::Timeout("draw_mermaid".into())));
    }
}
