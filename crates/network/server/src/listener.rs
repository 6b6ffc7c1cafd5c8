//! QUIC listener serving only the custom protocol, without HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use mcp::SessionServer;
use network_shared::{ConnectionCode, QuicTransportParams};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::connection::McpConnectionHandler;
use crate::demux::{accept_loop, QuicDemux};
use crate::error::ChassisError;
use crate::tls;

pub struct McpListener {
    endpoint: quinn::Endpoint,
    demux: QuicDemux,
    tasks: TaskTracker,
}

impl McpListener {
    /// Binds a QUIC endpoint whose TLS config advertises only the custom
    /// protocol, regardless of the ALPN list in `tls`.
    pub fn bind(
        addr: SocketAddr,
        tls: &rustls::ServerConfig,
        server: Arc<dyn SessionServer>,
        params: &QuicTransportParams,
    ) -> Result<Self, ChassisError> {
        let mut config = quinn::ServerConfig::with_crypto(tls::quic_crypto(tls::mcp_only(tls))?);
        config.transport_config(Arc::new(params.to_transport_config()?));
        let endpoint = quinn::Endpoint::server(config, addr).map_err(|source| ChassisError::Bind {
            proto: "udp",
            addr,
            source,
        })?;

        let tasks = TaskTracker::new();
        let handler = McpConnectionHandler::new(server).with_task_tracker(tasks.clone());
        Ok(Self {
            endpoint,
            demux: QuicDemux::new(None, Some(Arc::new(handler))),
            tasks,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChassisError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Accepts connections until `cancel` fires, then cancels open sessions
    /// and waits for them to wind down.
    pub async fn serve(&self, cancel: CancellationToken) {
        tracing::info!(target: "network::quic", addr = ?self.endpoint.local_addr().ok(), "custom-protocol listener started");
        let sessions = cancel.child_token();
        accept_loop(
            self.endpoint.clone(),
            self.demux.clone(),
            cancel.clone(),
            sessions.clone(),
            self.tasks.clone(),
        )
        .await;
        sessions.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Closes the endpoint; a running `serve` returns once its sessions end.
    pub fn close(&self) {
        self.endpoint
            .close(ConnectionCode::NoError.into(), b"listener closed");
    }
}
