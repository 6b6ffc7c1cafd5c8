/*!
Network Client Crate

Client für das MCP-über-QUIC-Protokoll des Chassis:
- QUIC-Verbindung mit ALPN `horos-mcp-v1` (TLS 1.3)
- Magic-Bytes auf dem Control-Stream, danach zeilenweises JSON-RPC
- Zuordnung von Antworten per Request-ID, Server-Notifications über einen eigenen Kanal

Öffentliche API:
- [`McpQuicClient`] + [`ClientOptions`]
- [`client_tls_config`] / [`Verification`]
- [`RpcPeer`]: transportunabhängige Request/Response-Korrelation
*/

pub mod client;
pub mod error;
pub mod peer;
pub mod tls;

pub use client::{ClientOptions, McpQuicClient, DEFAULT_REQUEST_TIMEOUT};
pub use error::{ClientError, ClientResult};
pub use peer::RpcPeer;
pub use tls::{client_tls_config, client_tls_config_with_alpn, Verification};
