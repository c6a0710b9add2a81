//! 端到端：脚本化 LLM + 内存工具传输驱动 Orchestrator

use std::sync::Arc;
use std::time::{Duration, Instant};

use easel::config::AppConfig;
use easel::llm::{LlmError, ScriptedLlmClient};
use easel::memory::{History, TurnContent};
use easel::tools::{InMemoryTransport, ToolOutput};
use easel::{Orchestrator, OrchestratorBuilder, Outcome};
use tokio_util::sync::CancellationToken;

const TECH_CALL: &str = r#"{"thought": "ALB in front of ECS with RDS", "tool": "draw_technical_diagram", "args": {"title": "Web App", "code": "lb = ELB('lb')\napp = ECS('app')\ndb = RDS('db')\nlb >> app >> db"}}"#;
const TECH_FINAL: &str = r#"{"thought": "rendered", "final": {"diagram_code": "lb >> app >> db", "title": "Web App"}}"#;
const CACHE_CALL: &str = r#"{"thought": "insert cache", "tool": "draw_technical_diagram", "args": {"title": "Web App with Cache", "code": "lb = ELB('lb')\napp = ECS('app')\ncache = ElastiCache('cache')\ndb = RDS('db')\nlb >> app >> cache >> db"}}"#;
const CACHE_FINAL: &str = r#"{"final": {"diagram_code": "lb >> app >> cache >> db", "title": "Web App with Cache"}}"#;
const MISSING_CODE: &str = r#"{"thought": "oops", "tool": "draw_technical_diagram", "args": {"title": "Web App"}}"#;

fn orchestrator(
    cfg: AppConfig,
    llm: &Arc<ScriptedLlmClient>,
    transport: &Arc<InMemoryTransport>,
) -> Orchestrator {
    OrchestratorBuilder::new(cfg)
        .with_llm(llm.clone())
        .with_transport(transport.clone())
        .build()
        .expect("default config builds")
}

#[tokio::test]
async fn cloud_architecture_request_succeeds() {
    let llm = Arc::new(ScriptedLlmClient::new([TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch
        .handle("Create a cloud architecture diagram with AWS services", None)
        .await;

    assert_eq!(result.outcome, Outcome::Success, "{}", result.message);
    assert_eq!(result.title, "Web App");
    assert_eq!(
        result.artifact_reference,
        "mem://draw_technical_diagram/web-app"
    );
    // 关键词直接命中，不咨询分类模型：两次模型调用都来自专家
    assert_eq!(llm.requests().len(), 2);
    let calls = transport.invocations();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "draw_technical_diagram");

    let history = History::try_deserialize(&result.history_blob).unwrap();
    assert_eq!(history.len(), 2);
    assert!(matches!(history.turns()[1].content, TurnContent::Artifact { .. }));
}

#[tokio::test]
async fn gibberish_needs_clarification() {
    let llm = Arc::new(ScriptedLlmClient::new([
        "clarify",
        "I can draw architecture diagrams or flowcharts. Which one do you need?",
    ]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch.handle("asdf qwerty", None).await;
    assert_eq!(result.outcome, Outcome::NeedsClarification);
    assert!(result.message.contains("Which one do you need?"));
    assert!(result.artifact_reference.is_empty());
    let wire = serde_json::to_value(&result).unwrap();
    assert!(wire["title"].is_string());
    assert!(wire["artifact_reference"].is_string());
    assert!(transport.invocations().is_empty());
}

#[tokio::test]
async fn unavailable_model_still_answers_fallback() {
    let llm = Arc::new(ScriptedLlmClient::default());
    llm.push_error(LlmError::Request("503".into()));
    let transport = Arc::new(InMemoryTransport::renderer());
    let cfg = AppConfig::default();
    let apology = cfg.fallback.apology.clone();
    let orch = orchestrator(cfg, &llm, &transport);

    let result = orch.handle("asdf qwerty", None).await;
    assert_eq!(result.outcome, Outcome::NeedsClarification);
    assert_eq!(result.message, apology);
}

#[tokio::test]
async fn validation_failing_twice_is_error() {
    let llm = Arc::new(ScriptedLlmClient::new([MISSING_CODE, MISSING_CODE, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch.handle("Draw the AWS infrastructure", None).await;
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.message.contains("missing required argument `code`"), "{}", result.message);
    assert!(transport.invocations().is_empty());
    assert_eq!(llm.remaining(), 1);
}

#[tokio::test]
async fn corrected_arguments_succeed() {
    let llm = Arc::new(ScriptedLlmClient::new([MISSING_CODE, TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch.handle("Draw the AWS infrastructure", None).await;
    assert_eq!(result.outcome, Outcome::Success, "{}", result.message);
    // 第二次咨询模型时带着参数不匹配的 observation
    let second = &llm.requests()[1];
    assert!(second.iter().any(|m| m.content.contains("ERROR (invalid arguments)")));
}

#[tokio::test]
async fn follow_up_uses_prior_history() {
    let llm = Arc::new(ScriptedLlmClient::new([TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);
    let first = orch
        .handle("Create a cloud architecture diagram with AWS services", None)
        .await;
    assert_eq!(first.outcome, Outcome::Success);

    // "Add a caching layer" 不含关键词，由模型结合历史分类
    llm.push_reply("architecture");
    llm.push_reply(CACHE_CALL);
    llm.push_reply(CACHE_FINAL);
    let second = orch
        .handle("Add a caching layer", Some(&first.history_blob))
        .await;

    assert_eq!(second.outcome, Outcome::Success, "{}", second.message);
    assert_eq!(second.title, "Web App with Cache");

    let requests = llm.requests();
    let classifier_prompt = &requests[2];
    assert!(classifier_prompt[1].content.contains("mem://draw_technical_diagram/web-app"));
    let specialist_prompt = &requests[3];
    assert!(specialist_prompt
        .iter()
        .any(|m| m.content.contains("[technical artifact \"Web App\" at mem://draw_technical_diagram/web-app]")));

    let history = History::deserialize(&second.history_blob);
    assert_eq!(history.len(), 4);
    assert_eq!(history.turns()[2].content, TurnContent::text("Add a caching layer"));
}

#[tokio::test]
async fn batch_of_calls_resolves_together() {
    let batch = r#"{"thought": "two variants", "tool_calls": [
        {"tool": "draw_mermaid", "args": {"title": "Login A", "code": "sequenceDiagram\n    participant U\n    U->>S: login"}},
        {"tool": "draw_mermaid", "args": {"title": "Login B", "code": "sequenceDiagram\n    participant U\n    U->>S: sso"}}
    ]}"#;
    let finish = r#"{"final": {"diagram_code": "sequenceDiagram", "title": "Login B"}}"#;
    let llm = Arc::new(ScriptedLlmClient::new([batch, finish]));
    let transport = Arc::new(InMemoryTransport::renderer().with_latency(Duration::from_millis(400)));
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let started = Instant::now();
    let result = orch.handle("Draw a login sequence", None).await;
    let elapsed = started.elapsed();
    assert_eq!(result.outcome, Outcome::Success, "{}", result.message);
    assert_eq!(transport.invocations().len(), 2);
    // 两次 400ms 的调用并发发出，总耗时小于两者之和
    assert!(elapsed < Duration::from_millis(750), "batch took {:?}", elapsed);
    // 两个 observation 在同一条消息里回到模型
    let second = llm.requests()[1].last().cloned().unwrap();
    let observed = llm.requests()[1]
        .iter()
        .filter(|m| m.content.contains("Observation [call_"))
        .map(|m| m.content.matches("Observation [call_").count())
        .sum::<usize>();
    assert_eq!(observed, 2);
    assert!(second.content.contains("diagram_code, title"));
}

#[tokio::test]
async fn iteration_cap_is_enforced() {
    let mut cfg = AppConfig::default();
    cfg.agent.max_iterations = 3;
    let llm = Arc::new(ScriptedLlmClient::new(["{oops", "{oops", "{oops", "{oops"]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(cfg, &llm, &transport);

    let result = orch.handle("Draw a flowchart of the build", None).await;
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.message.contains("3 iterations"), "{}", result.message);
    assert_eq!(llm.requests().len(), 3);
    assert_eq!(llm.remaining(), 1);
}

#[tokio::test]
async fn remote_failure_is_error_with_diagnostic() {
    let llm = Arc::new(ScriptedLlmClient::new([TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::new(|_, _| {
        Ok(ToolOutput::error("Graphviz exited with status 1"))
    }));
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch.handle("Draw our GCP system", None).await;
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.message.contains("Graphviz exited with status 1"));
    // 远端失败直接终止，不再咨询模型
    assert_eq!(llm.remaining(), 1);
}

#[tokio::test]
async fn request_timeout_cancels_pending_calls() {
    let mut cfg = AppConfig::default();
    cfg.agent.request_timeout_secs = 1;
    let llm = Arc::new(ScriptedLlmClient::new([TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer().with_latency(Duration::from_secs(30)));
    let orch = orchestrator(cfg, &llm, &transport);

    let started = Instant::now();
    let result = orch.handle("Draw the azure infrastructure", None).await;
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(result.outcome, Outcome::Error);
    assert!(result.message.contains("cancelled"), "{}", result.message);
}

#[tokio::test]
async fn cancelled_token_ends_request() {
    let llm = Arc::new(ScriptedLlmClient::new([TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orch
        .handle_with_cancel("Draw the cloud system", None, &cancel)
        .await;
    assert_eq!(result.outcome, Outcome::Error);
    assert!(llm.requests().is_empty());
    assert!(transport.invocations().is_empty());
    // 失败的交换同样写入历史
    assert_eq!(History::deserialize(&result.history_blob).len(), 2);
}

#[tokio::test]
async fn corrupt_history_is_discarded() {
    let llm = Arc::new(ScriptedLlmClient::new([TECH_CALL, TECH_FINAL]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch
        .handle("Create a cloud architecture diagram", Some("{not a blob"))
        .await;
    assert_eq!(result.outcome, Outcome::Success);
    assert_eq!(History::deserialize(&result.history_blob).len(), 2);
}

#[tokio::test]
async fn empty_request_asks_for_input() {
    let llm = Arc::new(ScriptedLlmClient::default());
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch.handle("   ", None).await;
    assert_eq!(result.outcome, Outcome::NeedsClarification);
    assert!(!result.message.is_empty());
    assert!(llm.requests().is_empty());
    assert!(History::deserialize(&result.history_blob).is_empty());
}

#[tokio::test]
async fn free_text_answer_needs_clarification() {
    let llm = Arc::new(ScriptedLlmClient::new(["Which states should the machine have?"]));
    let transport = Arc::new(InMemoryTransport::renderer());
    let orch = orchestrator(AppConfig::default(), &llm, &transport);

    let result = orch.handle("Draw a state machine", None).await;
    assert_eq!(result.outcome, Outcome::NeedsClarification);
    assert_eq!(result.message, "Which states should the machine have?");
}
