//! Fehler-Typen für clientseitige Netzwerkoperationen.

use std::time::Duration;

use mcp::JsonRpcError;
use network_shared::transport::TransportParamsError;
use network_shared::{FrameError, HandshakeError};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("tls configuration: {0}")]
    Tls(#[from] rustls::Error),
    #[error("quic client configuration: {0}")]
    QuicConfig(String),
    #[error(transparent)]
    Transport(#[from] TransportParamsError),
    #[error("client endpoint: {0}")]
    Endpoint(#[source] std::io::Error),
    #[error("connect: {0}")]
    Connect(#[from] quinn::ConnectError),
    #[error("connection: {0}")]
    Connection(#[from] quinn::ConnectionError),
    #[error("server negotiated unsupported ALPN {0:?}")]
    UnsupportedAlpn(Option<String>),
    #[error("handshake: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("framing: {0}")]
    Frame(#[from] FrameError),
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(JsonRpcError),
    #[error("unexpected result: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed")]
    Closed,
}

pub type ClientResult<T> = Result<T, ClientError>;
