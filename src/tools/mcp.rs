//! MCP 客户端：JSON-RPC 2.0 over streamable HTTP
//!
//! 首次调用前完成 initialize 握手（记录 Mcp-Session-Id，发送 notifications/initialized），
//! 之后 tools/call / tools/list 都携带会话头。响应可能是 application/json，也可能是 text/event-stream。
//! 服务端以 404 宣告会话失效时重新握手并重发一次。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::tools::{ToolOutput, ToolSpec, ToolTransport, TransportError};

const PROTOCOL_VERSION: &str = "2025-03-26";
const SESSION_HEADER: &str = "mcp-session-id";
const ACCEPT_VALUE: &str = "application/json, text/event-stream";

/// MCP 请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    pub fn initialize(id: u64) -> Self {
        Self::new(
            id,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {"name": "easel", "version": env!("CARGO_PKG_VERSION")},
            })),
        )
    }

    pub fn list_tools(id: u64) -> Self {
        Self::new(id, "tools/list", None)
    }

    pub fn call_tool(id: u64, name: &str, arguments: &Map<String, Value>) -> Self {
        Self::new(
            id,
            "tools/call",
            Some(serde_json::json!({
                "name": name,
                "arguments": arguments,
            })),
        )
    }
}

/// MCP 通知（无 id，不期待响应）
#[derive(Debug, Clone, Serialize)]
struct McpNotification {
    jsonrpc: &'static str,
    method: &'static str,
}

/// MCP 响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

impl McpResponse {
    pub fn into_result(self) -> Result<Value, TransportError> {
        if let Some(err) = self.error {
            return Err(TransportError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        self.result
            .ok_or_else(|| TransportError::Protocol("response carries neither result nor error".into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
struct McpTool {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    input_schema: Value,
}

#[derive(Debug, Clone, Deserialize)]
struct ListToolsResult {
    tools: Vec<McpTool>,
}

/// tools/call 的结果
#[derive(Debug, Clone, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(rename = "structuredContent", default)]
    pub structured_content: Option<Value>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl CallToolResult {
    /// 拼接全部文本块；没有文本时退回 structuredContent 的 JSON
    pub fn into_output(self) -> ToolOutput {
        let text: String = self
            .content
            .iter()
            .filter_map(ContentBlock::as_text)
            .collect();
        let content = if text.is_empty() {
            self.structured_content
                .map(|v| v.to_string())
                .unwrap_or_default()
        } else {
            text
        };
        ToolOutput {
            content,
            is_error: self.is_error,
        }
    }
}

/// 结果中的内容块
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    #[serde(other)]
    Other,
}

impl ContentBlock {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// 握手得到的会话；服务端可能不下发 session id
#[derive(Debug, Clone, PartialEq, Eq)]
struct McpSession {
    id: Option<String>,
}

/// MCP streamable HTTP 传输
pub struct McpHttpTransport {
    client: Client,
    endpoint: String,
    next_id: AtomicU64,
    /// None 表示尚未握手，或会话已被服务端判定失效
    session: Mutex<Option<McpSession>>,
}

impl McpHttpTransport {
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
            session: Mutex::new(None),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn post(
        &self,
        body: &impl Serialize,
        session: Option<&str>,
    ) -> Result<reqwest::Response, TransportError> {
        let mut req = self
            .client
            .post(&self.endpoint)
            .header(ACCEPT, ACCEPT_VALUE)
            .json(body);
        if let Some(id) = session {
            req = req.header(SESSION_HEADER, id);
        }
        req.send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))
    }

    async fn initialize(&self) -> Result<Option<String>, TransportError> {
        let request = McpRequest::initialize(self.next_id());
        let resp = self.post(&request, None).await?;
        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        read_response(resp, request.id).await?.into_result()?;

        let note = McpNotification {
            jsonrpc: "2.0",
            method: "notifications/initialized",
        };
        self.post(&note, session.as_deref()).await?;
        tracing::info!(endpoint = %self.endpoint, session = ?session, "MCP session initialized");
        Ok(session)
    }

    /// 取当前会话，必要时先握手；同一时刻只有一个调用在握手
    async fn session(&self) -> Result<McpSession, TransportError> {
        let mut guard = self.session.lock().await;
        if let Some(session) = guard.as_ref() {
            return Ok(session.clone());
        }
        let session = McpSession {
            id: self.initialize().await?,
        };
        *guard = Some(session.clone());
        Ok(session)
    }

    /// 丢弃失效会话；其他调用已经重新握手时保留新会话
    async fn expire(&self, stale: &McpSession) {
        let mut guard = self.session.lock().await;
        if guard.as_ref() == Some(stale) {
            *guard = None;
        }
    }

    async fn rpc(&self, method: &str, request: McpRequest) -> Result<Value, TransportError> {
        let mut session = self.session().await?;
        let mut resp = self.post(&request, session.id.as_deref()).await?;
        // 服务端以 404 表示会话已过期：重新握手并重发一次
        if resp.status() == StatusCode::NOT_FOUND && session.id.is_some() {
            tracing::warn!(method, session = ?session.id, "MCP session expired, re-initializing");
            self.expire(&session).await;
            session = self.session().await?;
            resp = self.post(&request, session.id.as_deref()).await?;
        }
        tracing::debug!(method, id = request.id, "MCP request sent");
        read_response(resp, request.id).await?.into_result()
    }
}

async fn read_response(resp: reqwest::Response, id: u64) -> Result<McpResponse, TransportError> {
    let status = resp.status();
    let is_sse = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);
    let body = resp
        .text()
        .await
        .map_err(|e| TransportError::Http(e.to_string()))?;
    if !status.is_success() {
        return Err(TransportError::Http(format!(
            "status {}: {}",
            status,
            body.chars().take(200).collect::<String>()
        )));
    }
    if is_sse {
        parse_sse_response(&body, id)
    } else {
        serde_json::from_str(&body).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// 从 SSE 流中找到与请求 id 对应的 JSON-RPC 响应；一个事件可能有多行 data:
pub(crate) fn parse_sse_response(body: &str, id: u64) -> Result<McpResponse, TransportError> {
    let body = body.replace("\r\n", "\n");
    for event in body.split("\n\n") {
        let data = event
            .lines()
            .filter_map(|l| l.strip_prefix("data:"))
            .map(str::trim_start)
            .collect::<Vec<_>>()
            .join("\n");
        if data.is_empty() {
            continue;
        }
        if let Ok(resp) = serde_json::from_str::<McpResponse>(&data) {
            if resp.id == Some(id) {
                return Ok(resp);
            }
        }
    }
    Err(TransportError::Protocol(format!(
        "event stream carried no response for request {}",
        id
    )))
}

#[async_trait]
impl ToolTransport for McpHttpTransport {
    async fn invoke(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
    ) -> Result<ToolOutput, TransportError> {
        let request = McpRequest::call_tool(self.next_id(), tool_name, arguments);
        let result = self.rpc("tools/call", request).await?;
        let parsed: CallToolResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("bad tools/call result: {}", e)))?;
        Ok(parsed.into_output())
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, TransportError> {
        let request = McpRequest::list_tools(self.next_id());
        let result = self.rpc("tools/list", request).await?;
        let parsed: ListToolsResult = serde_json::from_value(result)
            .map_err(|e| TransportError::Protocol(format!("bad tools/list result: {}", e)))?;
        Ok(parsed
            .tools
            .into_iter()
            .map(|t| ToolSpec {
                name: t.name,
                description: t.description.unwrap_or_default(),
                input_schema: t.input_schema,
            })
            .collect())
    }
}
