// One MCP client session over a transport
//
// Disconnected -> Connecting -> Initialized -> {ListingTools | Calling}
// -> Initialized ... -> Closed. Any transport or protocol failure moves the
// session to Failed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use super::jsonrpc::{parse_response, JsonRpcNotification, JsonRpcRequest};
use super::transport::{Connector, Transport};
use crate::errors::{MatrixError, Result};
use crate::tools::ToolDescriptor;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Initialized,
    ListingTools,
    Calling,
    Closed,
    Failed,
}

/// MCP server implementation info
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// Result of `tools/call`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    pub tool: String,
    pub content: Vec<Value>,
    pub is_error: bool,
    /// All text content items joined by newlines
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl CallOutcome {
    fn from_result(tool: &str, result: Value) -> Self {
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let text = content
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n");

        Self {
            tool: tool.to_string(),
            is_error: result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            text,
            structured_content: result.get("structuredContent").cloned(),
            content,
        }
    }
}

pub struct McpSession {
    transport: Option<Box<dyn Transport>>,
    state: SessionState,
    next_id: u64,
    server_info: Option<ServerInfo>,
}

impl Default for McpSession {
    fn default() -> Self {
        Self::new()
    }
}

impl McpSession {
    pub fn new() -> Self {
        Self {
            transport: None,
            state: SessionState::Disconnected,
            next_id: 1,
            server_info: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    /// Open the transport and run the initialize handshake
    pub async fn connect(&mut self, connector: &dyn Connector, url: &str) -> Result<()> {
        self.state = SessionState::Connecting;
        match connector.open(url).await {
            Ok(transport) => self.transport = Some(transport),
            Err(e) => {
                self.state = SessionState::Failed;
                return Err(e);
            }
        }
        let initialized = self.initialize().await;
        self.settle(initialized, SessionState::Initialized)
    }

    async fn initialize(&mut self) -> Result<()> {
        let response = self
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "matrix",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        self.server_info = response
            .get("serverInfo")
            .and_then(|info| serde_json::from_value(info.clone()).ok());

        self.notify("notifications/initialized", None).await
    }

    /// Every advertised tool, following `nextCursor` pages
    pub async fn list_tools(&mut self) -> Result<Vec<ToolDescriptor>> {
        self.expect_initialized()?;
        self.state = SessionState::ListingTools;
        let listed = self.list_all_pages().await;
        self.settle(listed, SessionState::Initialized)
    }

    async fn list_all_pages(&mut self) -> Result<Vec<ToolDescriptor>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.as_ref().map(|c| json!({ "cursor": c }));
            let page = self.request("tools/list", params).await?;

            if let Some(items) = page.get("tools") {
                let batch: Vec<ToolDescriptor> = serde_json::from_value(items.clone())
                    .map_err(|e| MatrixError::Protocol(format!("bad tools/list result: {}", e)))?;
                tools.extend(batch);
            }

            cursor = page
                .get("nextCursor")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(String::from);
            if cursor.is_none() {
                break;
            }
        }
        debug!(count = tools.len(), "Discovered tools");
        Ok(tools)
    }

    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<CallOutcome> {
        self.expect_initialized()?;
        self.state = SessionState::Calling;
        let called = self
            .request(
                "tools/call",
                Some(json!({ "name": name, "arguments": arguments })),
            )
            .await
            .map(|result| CallOutcome::from_result(name, result))
            .map_err(|e| match e {
                MatrixError::Protocol(message) => MatrixError::ToolCallFailed {
                    tool: name.to_string(),
                    message,
                },
                other => other,
            });
        self.settle(called, SessionState::Initialized)
    }

    /// Close the transport. Safe to call in any state.
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            transport.close().await;
        }
        self.state = SessionState::Closed;
    }

    fn settle<T>(&mut self, result: Result<T>, next: SessionState) -> Result<T> {
        self.state = if result.is_ok() {
            next
        } else {
            SessionState::Failed
        };
        result
    }

    fn expect_initialized(&self) -> Result<()> {
        if self.state == SessionState::Initialized {
            Ok(())
        } else {
            Err(MatrixError::Protocol(format!(
                "session is {:?}, not initialized",
                self.state
            )))
        }
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport
            .as_mut()
            .ok_or_else(|| MatrixError::Protocol("session is not connected".to_string()))
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let message = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        debug!(method = %method, id, "MCP request");

        let transport = self.transport()?;
        transport.send(message).await?;

        loop {
            let Some(frame) = transport.recv().await? else {
                return Err(MatrixError::Protocol(format!(
                    "connection closed while waiting for {}",
                    method
                )));
            };
            let Some(response) = parse_response(&frame) else {
                continue;
            };
            if response.numeric_id() != Some(id) {
                debug!(method = %method, "Skipping response for another request");
                continue;
            }
            return response.into_result().map_err(|error| {
                MatrixError::Protocol(format!(
                    "{} (code {})",
                    error.message, error.code
                ))
            });
        }
    }

    async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<()> {
        let message = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        debug!(method = %method, "MCP notification");
        self.transport()?.send(message).await
    }
}
