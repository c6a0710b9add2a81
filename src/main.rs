//! Easel 命令行入口
//!
//! `easel <request> [history-file]`：处理一个请求，把 AgentResult 以 JSON 打印到 stdout。
//! history-file 是上一次输出中的 history_blob（只读，不写回）。Ctrl+C 取消当前请求。

use anyhow::Context;
use easel::config::{load_config, AppConfig};
use easel::Orchestrator;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖；输出到 stderr，stdout 只留结果
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let request = args
        .next()
        .context("usage: easel <request> [history-file]")?;
    let history = match args.next() {
        Some(path) => Some(
            std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read history file {}", path))?,
        ),
        None => None,
    };

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    let orchestrator = Orchestrator::from_config(cfg)
        .await
        .context("Failed to build orchestrator")?;

    let shutdown = orchestrator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling request");
            shutdown.cancel();
        }
    });

    let result = orchestrator.handle(&request, history.as_deref()).await;
    println!(
        "{}",
        serde_json::to_string_pretty(&result).context("Failed to encode result")?
    );
    Ok(())
}
