// MCP client: transports, sessions, and the probe/call bridge

pub mod bridge;
pub mod endpoint;
pub mod jsonrpc;
pub mod session;
pub mod sse;
pub mod transport;

pub use bridge::{alternate_url, normalize_http_url, Attempted, Bridge, ProbeReport};
pub use endpoint::EndpointResolver;
pub use session::{CallOutcome, McpSession, ServerInfo, SessionState};
pub use transport::{Connector, DefaultConnector, SseTransport, Transport, WsTransport};
