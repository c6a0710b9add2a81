//! 请求监管：单个请求的取消令牌与超时
//!
//! 每个请求从调用方的令牌派生一个子令牌；计时器到期时取消它，
//! 模型调用与在途工具调用都监听这个子令牌。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct RequestSupervisor {
    token: CancellationToken,
    timeout: Duration,
    timed_out: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

impl RequestSupervisor {
    /// 派生子令牌并启动超时计时器（必须在 tokio 运行时内调用）
    pub fn start(parent: &CancellationToken, timeout: Duration) -> Self {
        let token = parent.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = {
            let token = token.clone();
            let timed_out = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        timed_out.store(true, Ordering::SeqCst);
                        tracing::warn!(timeout_secs = timeout.as_secs(), "request timed out");
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            })
        };
        Self {
            token,
            timeout,
            timed_out,
            timer,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancel_reason(&self) -> String {
        if self.timed_out.load(Ordering::SeqCst) {
            format!("request timed out after {}s", self.timeout.as_secs())
        } else {
            "request cancelled".to_string()
        }
    }
}

impl Drop for RequestSupervisor {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timeout_cancels_child_only() {
        let parent = CancellationToken::new();
        let supervisor = RequestSupervisor::start(&parent, Duration::from_millis(50));
        supervisor.token().cancelled().await;
        assert!(supervisor.is_cancelled());
        assert!(!parent.is_cancelled());
        assert_eq!(supervisor.cancel_reason(), "request timed out after 0s");
    }

    #[tokio::test]
    async fn test_parent_cancel_propagates() {
        let parent = CancellationToken::new();
        let supervisor = RequestSupervisor::start(&parent, Duration::from_secs(60));
        parent.cancel();
        assert!(supervisor.is_cancelled());
        assert_eq!(supervisor.cancel_reason(), "request cancelled");
    }
}
