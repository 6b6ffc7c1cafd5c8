use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use axum::Router;
use mcp::SessionServer;
use network_shared::{QuicTransportParams, DEFAULT_HANDSHAKE_TIMEOUT, MAX_MESSAGE_SIZE};

/// Where the chassis gets its certificate from.
#[derive(Clone)]
pub enum TlsSource {
    /// A ready config; its ALPN list is used for QUIC as is.
    Explicit(Arc<rustls::ServerConfig>),
    /// PEM certificate chain and private key.
    Files { cert: PathBuf, key: PathBuf },
    /// Ephemeral self-signed certificate, regenerated on every start.
    SelfSigned,
}

impl std::fmt::Debug for TlsSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsSource::Explicit(_) => f.write_str("Explicit(..)"),
            TlsSource::Files { cert, key } => f
                .debug_struct("Files")
                .field("cert", cert)
                .field("key", key)
                .finish(),
            TlsSource::SelfSigned => f.write_str("SelfSigned"),
        }
    }
}

/// How long shutdown lets custom-protocol sessions finish.
///
/// `quic_drain_timeout` of zero closes the QUIC endpoint right away; anything
/// larger waits (bounded by the shutdown deadline) for sessions to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownPolicy {
    pub quic_drain_timeout: Duration,
}

impl ShutdownPolicy {
    pub fn with_quic_drain_timeout(mut self, timeout: Duration) -> Self {
        self.quic_drain_timeout = timeout;
        self
    }
}

/// Immutable chassis configuration.
#[derive(Clone)]
pub struct ChassisConfig {
    pub addr: SocketAddr,
    pub tls: TlsSource,
    /// Served over TCP (h1/h2) and HTTP/3.
    pub router: Router,
    /// `None` disables the custom protocol.
    pub rpc: Option<Arc<dyn SessionServer>>,
    pub transport: QuicTransportParams,
    pub shutdown: ShutdownPolicy,
    /// Bounds the TLS handshake on TCP, and accepting the control stream and
    /// reading the magic bytes on QUIC.
    pub handshake_timeout: Duration,
    pub max_message_size: usize,
}

impl ChassisConfig {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self {
            addr,
            tls: TlsSource::SelfSigned,
            router,
            rpc: None,
            transport: QuicTransportParams::default(),
            shutdown: ShutdownPolicy::default(),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    pub fn with_tls(mut self, tls: TlsSource) -> Self {
        self.tls = tls;
        self
    }

    pub fn with_rpc_server(mut self, rpc: Arc<dyn SessionServer>) -> Self {
        self.rpc = Some(rpc);
        self
    }

    pub fn with_transport(mut self, transport: QuicTransportParams) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_shutdown_policy(mut self, shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }
}
