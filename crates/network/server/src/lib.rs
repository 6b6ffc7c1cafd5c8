/*!
Network Server Crate

Ein Endpoint, ein Port, zwei Sockets:
- TCP: TLS + HTTP/1.1 / HTTP/2 (hyper, axum Router)
- UDP: QUIC, nach ALPN verteilt auf HTTP/3 (`h3`) oder das MCP-Protokoll (`horos-mcp-v1`)

Öffentliche API:
- [`Chassis`] + [`ChassisConfig`]: Start, Lauf und Shutdown des Dual-Transport-Servers
- [`McpListener`]: reiner MCP-Listener ohne HTTP
- [`McpConnectionHandler`]: eine QUIC-Verbindung als MCP-Session bedienen
- Prelude: `network_server::prelude::*`
*/

pub mod chassis;
pub mod config;
pub mod connection;
pub mod demux;
pub mod error;
pub mod http3;
pub mod listener;
pub mod middleware;
pub mod session;
mod tcp;
pub mod tls;

pub use chassis::Chassis;
pub use config::{ChassisConfig, ShutdownPolicy, TlsSource};
pub use connection::McpConnectionHandler;
pub use error::{ChassisError, TlsError};
pub use http3::{H3Engine, H3_NO_ERROR};
pub use listener::McpListener;
pub use session::McpSession;

pub mod prelude {
    pub use crate::{Chassis, ChassisConfig, ChassisError, McpListener, ShutdownPolicy, TlsSource};
}
