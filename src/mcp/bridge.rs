// Protocol bridge: probe and call against one server URL
//
// Opening a session is a two-step pipeline. If connect or handshake fails on
// `/sse/` the same server is tried once on `/messages/` (and the reverse).
// Anything that fails after the handshake is reported as is. Ctrl-C while a
// session is open closes it before returning.

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::session::{CallOutcome, McpSession, ServerInfo};
use super::transport::{Connector, DefaultConnector};
use crate::errors::{MatrixError, Result};
use crate::tools::{find_tool, ToolDescriptor};

const SSE_SUFFIX: &str = "/sse/";
const MESSAGES_SUFFIX: &str = "/messages/";

/// Which step of the open pipeline produced the value
#[derive(Debug)]
pub enum Attempted<T> {
    First(T),
    Fallback(T),
}

impl<T> Attempted<T> {
    pub fn used_fallback(&self) -> bool {
        matches!(self, Attempted::Fallback(_))
    }

    pub fn into_inner(self) -> T {
        match self {
            Attempted::First(value) | Attempted::Fallback(value) => value,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    /// URL that answered
    pub url: String,
    pub used_fallback: bool,
    pub server_info: Option<ServerInfo>,
    pub tools: Vec<ToolDescriptor>,
}

/// `http://h:1/sse` -> `http://h:1/sse/`. WebSocket URLs are left alone.
pub fn normalize_http_url(url: &str) -> String {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) || url.contains('?') {
        return url.to_string();
    }
    format!("{}/", url.trim_end_matches('/'))
}

/// The other endpoint shape of the same server, if there is one
pub fn alternate_url(url: &str) -> Option<String> {
    let normalized = normalize_http_url(url);
    if let Some(base) = normalized.strip_suffix(SSE_SUFFIX) {
        Some(format!("{}{}", base, MESSAGES_SUFFIX))
    } else {
        normalized
            .strip_suffix(MESSAGES_SUFFIX)
            .map(|base| format!("{}{}", base, SSE_SUFFIX))
    }
}

/// Resolves when the user abandons the session in flight
pub type Interrupt = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

fn ctrl_c() -> Interrupt {
    Arc::new(|| -> BoxFuture<'static, ()> {
        Box::pin(async {
            // No signal handler means no interrupt, not an immediate one
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        })
    })
}

#[derive(Clone)]
pub struct Bridge {
    connector: Arc<dyn Connector>,
    interrupt: Interrupt,
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(Arc::new(DefaultConnector::new()))
    }
}

impl Bridge {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            interrupt: ctrl_c(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Handshake and list tools
    pub async fn probe(&self, url: &str, timeout: Duration) -> Result<ProbeReport> {
        let attempted = self.open(url, timeout).await?;
        let used_fallback = attempted.used_fallback();
        let (mut session, url) = attempted.into_inner();

        let listed = tokio::select! {
            listed = tokio::time::timeout(timeout, session.list_tools()) => Some(listed),
            _ = (self.interrupt)() => None,
        };
        let server_info = session.server_info().cloned();
        session.close().await;

        let tools = match listed {
            Some(Ok(tools)) => tools?,
            Some(Err(_)) => {
                return Err(MatrixError::CallTimeout {
                    tool: "tools/list".to_string(),
                    url,
                    timeout,
                })
            }
            None => return Err(MatrixError::CallInterrupted { url }),
        };
        info!(url = %url, tools = tools.len(), "Probe succeeded");

        Ok(ProbeReport {
            url,
            used_fallback,
            server_info,
            tools,
        })
    }

    /// Call `tool` with a ready-made argument object
    pub async fn call(
        &self,
        tool: &str,
        url: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<CallOutcome> {
        self.call_with(url, timeout, |tools| {
            let found = find_tool(tools, tool)?;
            Ok((found.name.clone(), arguments))
        })
        .await
    }

    /// Call whichever tool `plan` picks once the advertised list is known
    pub async fn call_with<F>(&self, url: &str, timeout: Duration, plan: F) -> Result<CallOutcome>
    where
        F: FnOnce(&[ToolDescriptor]) -> Result<(String, Value)>,
    {
        let (mut session, url) = self.open(url, timeout).await?.into_inner();
        let result = tokio::select! {
            result = run_call(&mut session, &url, timeout, plan) => result,
            _ = (self.interrupt)() => Err(MatrixError::CallInterrupted { url: url.clone() }),
        };
        session.close().await;
        result
    }

    async fn open(&self, url: &str, timeout: Duration) -> Result<Attempted<(McpSession, String)>> {
        let first = normalize_http_url(url);
        let first_err = match self.handshake(&first, timeout).await {
            Ok(session) => return Ok(Attempted::First((session, first))),
            Err(e @ MatrixError::CallInterrupted { .. }) => return Err(e),
            Err(e) => e,
        };

        let Some(second) = alternate_url(&first) else {
            return Err(MatrixError::TransportUnreachable {
                first_url: first,
                fallback_url: None,
                reason: first_err.to_string(),
            });
        };

        warn!(url = %first, fallback = %second, error = %first_err, "Handshake failed, retrying on alternate endpoint");
        match self.handshake(&second, timeout).await {
            Ok(session) => Ok(Attempted::Fallback((session, second))),
            Err(second_err) => Err(MatrixError::TransportUnreachable {
                first_url: first,
                fallback_url: Some(second),
                reason: format!("{}; {}", first_err, second_err),
            }),
        }
    }

    async fn handshake(&self, url: &str, timeout: Duration) -> Result<McpSession> {
        debug!(url = %url, "Opening session");
        let mut session = McpSession::new();
        let connected = tokio::select! {
            connected = tokio::time::timeout(timeout, session.connect(self.connector.as_ref(), url)) => Some(connected),
            _ = (self.interrupt)() => None,
        };
        let err = match connected {
            Some(Ok(Ok(()))) => return Ok(session),
            Some(Ok(Err(e))) => e,
            Some(Err(_)) => MatrixError::Protocol(format!(
                "handshake timed out after {}s",
                timeout.as_secs()
            )),
            None => MatrixError::CallInterrupted {
                url: url.to_string(),
            },
        };
        session.close().await;
        Err(err)
    }
}

async fn run_call<F>(
    session: &mut McpSession,
    url: &str,
    timeout: Duration,
    plan: F,
) -> Result<CallOutcome>
where
    F: FnOnce(&[ToolDescriptor]) -> Result<(String, Value)>,
{
    let tools = tokio::time::timeout(timeout, session.list_tools())
        .await
        .map_err(|_| MatrixError::CallTimeout {
            tool: "tools/list".to_string(),
            url: url.to_string(),
            timeout,
        })??;

    let (tool, arguments) = plan(&tools)?;
    debug!(tool = %tool, arguments = %arguments, "Calling tool");

    let outcome = tokio::time::timeout(timeout, session.call_tool(&tool, arguments))
        .await
        .map_err(|_| MatrixError::CallTimeout {
            tool: tool.clone(),
            url: url.to_string(),
            timeout,
        })??;

    if outcome.is_error {
        return Err(MatrixError::ToolCallFailed {
            tool,
            message: outcome.text,
        });
    }
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::session::tests::ScriptedTransport;
    use crate::mcp::transport::Transport;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Serves a scripted session only on URLs ending in `live_suffix`
    struct SuffixConnector {
        live_suffix: &'static str,
        tools: Value,
        call_result: Value,
        opens: AtomicUsize,
    }

    impl SuffixConnector {
        fn new(live_suffix: &'static str) -> Self {
            Self {
                live_suffix,
                tools: json!([
                    {"name": "chat", "inputSchema": {"properties": {"query": {"type": "string"}}, "required": ["query"]}},
                    {"name": "search", "inputSchema": {}}
                ]),
                call_result: json!({"content": [{"type": "text", "text": "ok"}]}),
                opens: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connector for SuffixConnector {
        async fn open(&self, url: &str) -> Result<Box<dyn Transport>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if !url.ends_with(self.live_suffix) {
                return Err(MatrixError::Protocol(format!("GET {} returned 404", url)));
            }
            let script = VecDeque::from(vec![
                ("initialize".to_string(), json!({"serverInfo": {"name": "hello", "version": "1"}})),
                ("tools/list".to_string(), json!({"tools": self.tools})),
                ("tools/call".to_string(), self.call_result.clone()),
            ]);
            Ok(Box::new(ScriptedTransport {
                script,
                pending: VecDeque::new(),
                sent: Arc::new(Mutex::new(Vec::new())),
            }))
        }
    }

    #[test]
    fn test_normalize_and_alternate() {
        assert_eq!(normalize_http_url("http://h:1/sse"), "http://h:1/sse/");
        assert_eq!(normalize_http_url("http://h:1/sse///"), "http://h:1/sse/");
        assert_eq!(normalize_http_url("ws://h:1/ws"), "ws://h:1/ws");
        assert_eq!(alternate_url("http://h:1/sse").as_deref(), Some("http://h:1/messages/"));
        assert_eq!(alternate_url("http://h:1/messages/").as_deref(), Some("http://h:1/sse/"));
        assert_eq!(alternate_url("http://h:1/mcp/"), None);
        assert_eq!(alternate_url("ws://h:1/sse/"), None);
    }

    #[tokio::test]
    async fn test_probe_falls_back_exactly_once() {
        let connector = Arc::new(SuffixConnector::new("/sse/"));
        let bridge = Bridge::new(connector.clone());

        let report = bridge
            .probe("http://127.0.0.1:9/messages", Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(report.url, "http://127.0.0.1:9/sse/");
        assert!(report.used_fallback);
        assert_eq!(report.tools.len(), 2);
        assert_eq!(connector.opens.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_both_shapes_failing_names_both_urls() {
        let bridge = Bridge::new(Arc::new(SuffixConnector::new("/nowhere/")));
        match bridge.probe("http://h:9/sse/", Duration::from_secs(1)).await {
            Err(MatrixError::TransportUnreachable {
                first_url,
                fallback_url,
                ..
            }) => {
                assert_eq!(first_url, "http://h:9/sse/");
                assert_eq!(fallback_url.as_deref(), Some("http://h:9/messages/"));
            }
            other => panic!("expected TransportUnreachable, got {:?}", other.map(|r| r.url)),
        }
    }

    #[tokio::test]
    async fn test_unknown_tool_does_not_retry() {
        let connector = Arc::new(SuffixConnector::new("/sse/"));
        let bridge = Bridge::new(connector.clone());

        let err = bridge
            .call("nope", "http://h:9/sse/", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            MatrixError::UnknownTool { available, .. } => {
                assert_eq!(available, vec!["chat", "search"])
            }
            other => panic!("expected UnknownTool, got {:?}", other),
        }
        assert_eq!(connector.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_tool_error_result_is_failure() {
        let mut connector = SuffixConnector::new("/sse/");
        connector.call_result = json!({"isError": true, "content": [{"type": "text", "text": "bad input"}]});
        let bridge = Bridge::new(Arc::new(connector));

        match bridge
            .call("chat", "http://h:9/sse/", json!({"query": "x"}), Duration::from_secs(1))
            .await
        {
            Err(MatrixError::ToolCallFailed { tool, message }) => {
                assert_eq!(tool, "chat");
                assert_eq!(message, "bad input");
            }
            other => panic!("expected ToolCallFailed, got {:?}", other),
        }
    }

    /// Answers the handshake and tools/list, then never replies to a call
    struct StallingTransport {
        inner: ScriptedTransport,
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Transport for StallingTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            if message.contains("\"tools/call\"") {
                return Ok(());
            }
            self.inner.send(message).await
        }

        async fn recv(&mut self) -> Result<Option<String>> {
            match self.inner.pending.pop_front() {
                Some(message) => Ok(Some(message)),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    struct StallingConnector {
        closed: Arc<std::sync::atomic::AtomicBool>,
    }

    #[async_trait]
    impl Connector for StallingConnector {
        async fn open(&self, _url: &str) -> Result<Box<dyn Transport>> {
            let script = VecDeque::from(vec![
                ("initialize".to_string(), json!({})),
                ("tools/list".to_string(), json!({"tools": [{"name": "chat"}]})),
            ]);
            Ok(Box::new(StallingTransport {
                inner: ScriptedTransport {
                    script,
                    pending: VecDeque::new(),
                    sent: Arc::new(Mutex::new(Vec::new())),
                },
                closed: self.closed.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_interrupt_closes_session() {
        let closed = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let interrupt: Interrupt =
            Arc::new(|| -> BoxFuture<'static, ()> {
                Box::pin(tokio::time::sleep(Duration::from_millis(100)))
            });
        let bridge = Bridge::new(Arc::new(StallingConnector {
            closed: closed.clone(),
        }))
        .with_interrupt(interrupt);

        let err = bridge
            .call("chat", "ws://h:9/ws", json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, MatrixError::CallInterrupted { .. }));
        assert!(closed.load(Ordering::SeqCst));
    }
}
