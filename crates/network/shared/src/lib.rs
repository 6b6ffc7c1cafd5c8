//! Shared wire primitives for the Touchstone network stack.
//!
//! This crate hosts everything client and server must agree on:
//! - `codes`: the closed set of numeric close/reset codes sent on the wire
//! - `handshake`: the in-band magic-byte check run on the control stream
//! - `codec`: newline-delimited JSON framing with a hard size ceiling
//! - `session`: session identities
//! - `transport`: QUIC transport parameters shared by both endpoints
//!
//! Keep this crate free of TLS and HTTP concerns.

use std::time::Duration;

pub mod codec;
pub mod codes;
pub mod handshake;
pub mod session;
pub mod transport;

pub use codec::{FrameError, LineReader};
pub use codes::{ConnectionCode, StreamCode};
pub use handshake::HandshakeError;
pub use session::SessionId;
pub use transport::QuicTransportParams;

/// ALPN token of the custom RPC protocol (QUIC only).
pub const ALPN_MCP: &str = "horos-mcp-v1";
/// ALPN token of HTTP/3 (QUIC only).
pub const ALPN_H3: &str = "h3";
/// ALPN tokens offered on the TCP listener.
pub const ALPN_H2: &str = "h2";
pub const ALPN_HTTP11: &str = "http/1.1";

/// First four bytes on every custom-protocol control stream.
pub const MAGIC_BYTES: &[u8; 4] = b"MCP1";

/// Largest single JSON-RPC message accepted on a stream (excluding the newline).
pub const MAX_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

/// Bounds accepting the control stream and reading the magic bytes.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of a session's outbound notification queue.
pub const NOTIFICATION_QUEUE_CAPACITY: usize = 100;

/// Convenience prelude for downstream crates.
pub mod prelude {
    pub use crate::codec::{write_line, FrameError, LineReader};
    pub use crate::codes::{ConnectionCode, StreamCode};
    pub use crate::handshake::{send_magic, validate_magic, HandshakeError};
    pub use crate::session::SessionId;
    pub use crate::transport::QuicTransportParams;
    pub use crate::{ALPN_H3, ALPN_MCP, MAGIC_BYTES, MAX_MESSAGE_SIZE};
}
