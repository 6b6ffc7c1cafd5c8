//! Routing of established QUIC connections by negotiated ALPN.

use std::sync::Arc;

use network_shared::{ConnectionCode, ALPN_H3, ALPN_MCP};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::connection::{close, McpConnectionHandler};
use crate::http3::H3Engine;

/// ALPN protocol the TLS handshake settled on, if any.
pub fn negotiated_alpn(conn: &quinn::Connection) -> Option<Vec<u8>> {
    conn.handshake_data()?
        .downcast::<quinn::crypto::rustls::HandshakeData>()
        .ok()?
        .protocol
}

#[derive(Clone)]
pub struct QuicDemux {
    h3: Option<Arc<H3Engine>>,
    /// `None` refuses custom-protocol connections with `McpDisabled`.
    mcp: Option<Arc<McpConnectionHandler>>,
}

impl QuicDemux {
    pub fn new(h3: Option<Arc<H3Engine>>, mcp: Option<Arc<McpConnectionHandler>>) -> Self {
        Self { h3, mcp }
    }

    /// Completes the QUIC handshake of `incoming` and hands the connection on.
    pub async fn accept(&self, incoming: quinn::Incoming, cancel: CancellationToken) {
        let remote = incoming.remote_address();
        let conn = match incoming.await {
            Ok(conn) => conn,
            Err(err) => {
                tracing::debug!(target: "network::quic", %remote, error = %err, "handshake failed");
                return;
            }
        };
        self.route(conn, cancel).await;
    }

    pub async fn route(&self, conn: quinn::Connection, cancel: CancellationToken) {
        let remote = conn.remote_address();
        let alpn = negotiated_alpn(&conn);
        match alpn.as_deref() {
            Some(p) if p == ALPN_H3.as_bytes() => match &self.h3 {
                Some(h3) => h3.serve(conn, cancel).await,
                None => refuse_unsupported(&conn, Some(p)),
            },
            Some(p) if p == ALPN_MCP.as_bytes() => match &self.mcp {
                Some(handler) => handler.serve(conn, cancel).await,
                None => {
                    let code = ConnectionCode::McpDisabled;
                    tracing::warn!(target: "network::quic", %remote, %code, "custom protocol not enabled, closing");
                    close(&conn, code);
                }
            },
            other => refuse_unsupported(&conn, other),
        }
    }
}

/// Accepts QUIC connections until `accept` fires or the endpoint closes.
/// Each connection runs on `tasks` under a child of `sessions`.
pub(crate) async fn accept_loop(
    endpoint: quinn::Endpoint,
    demux: QuicDemux,
    accept: CancellationToken,
    sessions: CancellationToken,
    tasks: TaskTracker,
) {
    loop {
        let incoming = tokio::select! {
            _ = accept.cancelled() => break,
            incoming = endpoint.accept() => incoming,
        };
        let Some(incoming) = incoming else {
            tracing::debug!(target: "network::quic", "endpoint closed");
            break;
        };
        let demux = demux.clone();
        let cancel = sessions.child_token();
        tasks.spawn(async move { demux.accept(incoming, cancel).await });
    }
    tracing::debug!(target: "network::quic", "accept loop stopped");
}

fn refuse_unsupported(conn: &quinn::Connection, alpn: Option<&[u8]>) {
    let code = ConnectionCode::UnsupportedAlpn;
    let alpn = alpn.map(|p| String::from_utf8_lossy(p).into_owned());
    tracing::warn!(target: "network::quic", remote = %conn.remote_address(), ?alpn, %code, "unknown ALPN, closing");
    close(conn, code);
}
