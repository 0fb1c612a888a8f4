// Wire transports: HTTP + SSE and WebSocket
//
// A transport moves raw JSON-RPC text in both directions. Request/response
// matching lives in the session.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use std::collections::VecDeque;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::debug;

use super::sse::{SseDecoder, SseEvent};
use crate::errors::{MatrixError, Result};

#[async_trait]
pub trait Transport: Send {
    /// Deliver one JSON-RPC message
    async fn send(&mut self, message: String) -> Result<()>;

    /// Next inbound JSON-RPC message; `None` once the peer has gone away
    async fn recv(&mut self) -> Result<Option<String>>;

    async fn close(&mut self);
}

/// Opens a transport for a URL
#[async_trait]
pub trait Connector: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>>;
}

/// SSE for http(s) URLs, WebSocket for ws(s)
#[derive(Debug, Clone, Default)]
pub struct DefaultConnector {
    client: reqwest::Client,
}

impl DefaultConnector {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Connector for DefaultConnector {
    async fn open(&self, url: &str) -> Result<Box<dyn Transport>> {
        if url.starts_with("ws://") || url.starts_with("wss://") {
            Ok(Box::new(WsTransport::connect(url).await?))
        } else {
            Ok(Box::new(SseTransport::connect(self.client.clone(), url).await?))
        }
    }
}

/// GET opens the event stream; the server names the POST endpoint in its
/// first `endpoint` event and answers on the stream as `message` events.
pub struct SseTransport {
    client: reqwest::Client,
    post_url: Url,
    events: mpsc::Receiver<SseEvent>,
    reader: JoinHandle<()>,
    /// Responses that came back in a POST body instead of on the stream
    inline: VecDeque<String>,
}

impl SseTransport {
    pub async fn connect(client: reqwest::Client, url: &str) -> Result<Self> {
        let base = Url::parse(url)
            .map_err(|e| MatrixError::Protocol(format!("invalid url {}: {}", url, e)))?;

        let resp = client
            .get(base.clone())
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| MatrixError::Protocol(format!("GET {}: {}", url, e)))?;

        if !resp.status().is_success() {
            return Err(MatrixError::Protocol(format!(
                "GET {} returned {}",
                url,
                resp.status()
            )));
        }
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with("text/event-stream") {
            return Err(MatrixError::Protocol(format!(
                "GET {} is not an event stream (content-type '{}')",
                url, content_type
            )));
        }

        let (tx, mut events) = mpsc::channel(64);
        let reader = tokio::spawn(async move {
            let mut stream = resp.bytes_stream();
            let mut decoder = SseDecoder::new();
            while let Some(Ok(chunk)) = stream.next().await {
                for event in decoder.feed(&chunk) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });

        let endpoint = loop {
            match events.recv().await {
                Some(event) if event.event == "endpoint" => break event.data,
                Some(_) => continue,
                None => {
                    reader.abort();
                    return Err(MatrixError::Protocol(format!(
                        "{} closed before announcing its endpoint",
                        url
                    )));
                }
            }
        };

        let post_url = match base.join(endpoint.trim()) {
            Ok(post_url) => post_url,
            Err(e) => {
                reader.abort();
                return Err(MatrixError::Protocol(format!(
                    "bad endpoint '{}': {}",
                    endpoint, e
                )));
            }
        };
        debug!(stream = %url, post = %post_url, "SSE session established");

        Ok(Self {
            client,
            post_url,
            events,
            reader,
            inline: VecDeque::new(),
        })
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        let resp = self
            .client
            .post(self.post_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message)
            .send()
            .await
            .map_err(|e| MatrixError::Protocol(format!("POST {}: {}", self.post_url, e)))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(MatrixError::Protocol(format!(
                "POST {} returned {}",
                self.post_url, status
            )));
        }

        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("application/json"));
        if is_json {
            let body = resp
                .text()
                .await
                .map_err(|e| MatrixError::Protocol(e.to_string()))?;
            if !body.trim().is_empty() {
                self.inline.push_back(body);
            }
        }
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        if let Some(message) = self.inline.pop_front() {
            return Ok(Some(message));
        }
        while let Some(event) = self.events.recv().await {
            if event.event == "message" {
                return Ok(Some(event.data));
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        self.reader.abort();
        self.events.close();
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// One JSON-RPC message per text frame
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsTransport {
    pub async fn connect(url: &str) -> Result<Self> {
        let (stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| MatrixError::Protocol(format!("websocket {}: {}", url, e)))?;
        debug!(url = %url, "WebSocket session established");
        Ok(Self { stream })
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, message: String) -> Result<()> {
        self.stream
            .send(Message::Text(message))
            .await
            .map_err(|e| MatrixError::Protocol(format!("websocket send: {}", e)))
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Ok(Some(text)),
                Ok(Message::Binary(bytes)) => {
                    return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(MatrixError::Protocol(format!("websocket recv: {}", e))),
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
