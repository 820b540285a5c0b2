//! Protocol constants and configuration defaults

/// Default Asterisk HTTP port (ARI REST and WebSocket share it)
pub const DEFAULT_ARI_PORT: u16 = 8088;

/// Socket read size for the command transport (16KB)
pub const SOCKET_BUF_SIZE: usize = 16 * 1024;

/// Initial response buffer allocation
pub const BUF_CHUNK: usize = 16 * 1024;

/// Maximum accepted response body (8MB). `/ari/sounds` on a large install is well below this.
pub const MAX_BODY_SIZE: usize = 8 * 1024 * 1024;

/// Maximum bytes buffered while waiting for a complete response
pub const MAX_BUFFER_SIZE: usize = 16 * 1024 * 1024;

/// Maximum size of the status line plus headers
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// HTTP framing
pub const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";
pub const CRLF: &str = "\r\n";
pub const HTTP_VERSION: &str = "HTTP/1.1";

/// Header names
pub const HEADER_HOST: &str = "Host";
pub const HEADER_AUTHORIZATION: &str = "Authorization";
pub const HEADER_USER_AGENT: &str = "User-Agent";
pub const HEADER_CONTENT_TYPE: &str = "Content-Type";
pub const HEADER_CONTENT_LENGTH: &str = "Content-Length";
pub const HEADER_TRANSFER_ENCODING: &str = "Transfer-Encoding";
pub const HEADER_CONNECTION: &str = "Connection";

/// Every command body is sent as JSON
pub const CONTENT_TYPE_JSON: &str = "application/json";

pub const DEFAULT_USER_AGENT: &str = concat!("asterisk-ari-tokio/", env!("CARGO_PKG_VERSION"));

/// ARI resource paths
pub const ARI_EVENTS_PATH: &str = "/ari/events";
pub const ARI_APPLICATIONS_PATH: &str = "/ari/applications";

/// JSON field carrying the event type name
pub const EVENT_TYPE_FIELD: &str = "type";

/// Event sources requested by the finalizing subscription command
pub const DEFAULT_EVENT_SOURCES: &[&str] = &["channel:", "endpoint:", "bridge:", "deviceState:"];

/// TCP connect timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;
