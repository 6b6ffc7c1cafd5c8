//! TLS over TCP serving HTTP/1.1 and HTTP/2 through hyper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Delay before retrying after a failed `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Signals shared by every TCP connection task.
#[derive(Clone)]
pub(crate) struct TcpSignals {
    /// Stop accepting.
    pub accept: CancellationToken,
    /// Finish in-flight requests, then close.
    pub graceful: CancellationToken,
    /// Drop connections immediately.
    pub force: CancellationToken,
}

pub(crate) struct TcpServer {
    pub listener: TcpListener,
    pub tls: Arc<rustls::ServerConfig>,
    pub router: Router,
    pub handshake_timeout: Duration,
    pub tasks: TaskTracker,
}

impl TcpServer {
    /// Accepts until `signals.accept` fires. Accept errors after startup are
    /// logged and retried.
    pub async fn run(self, signals: TcpSignals) {
        let acceptor = TlsAcceptor::from(self.tls);
        loop {
            let accepted = tokio::select! {
                _ = signals.accept.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, remote)) => {
                    self.tasks.spawn(serve_connection(
                        stream,
                        remote,
                        acceptor.clone(),
                        self.router.clone(),
                        self.handshake_timeout,
                        signals.clone(),
                    ));
                }
                Err(err) => {
                    tracing::warn!(target: "network::tcp", error = %err, "accept failed, retrying");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
        tracing::debug!(target: "network::tcp", "accept loop stopped");
    }
}

async fn serve_connection(
    stream: TcpStream,
    remote: SocketAddr,
    acceptor: TlsAcceptor,
    router: Router,
    handshake_timeout: Duration,
    signals: TcpSignals,
) {
    let handshake = tokio::select! {
        _ = signals.graceful.cancelled() => return,
        res = tokio::time::timeout(handshake_timeout, acceptor.accept(stream)) => res,
    };
    let tls = match handshake {
        Ok(Ok(tls)) => tls,
        Ok(Err(err)) => {
            tracing::debug!(target: "network::tcp", %remote, error = %err, "tls handshake failed");
            return;
        }
        Err(_) => {
            tracing::debug!(target: "network::tcp", %remote, "tls handshake timed out");
            return;
        }
    };

    let builder = auto::Builder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(tls), TowerToHyperService::new(router));
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = signals.graceful.cancelled() => {
            conn.as_mut().graceful_shutdown();
            tokio::select! {
                res = conn.as_mut() => res,
                _ = signals.force.cancelled() => {
                    tracing::debug!(target: "network::tcp", %remote, "connection dropped at shutdown deadline");
                    return;
                }
            }
        }
    };
    if let Err(err) = result {
        tracing::debug!(target: "network::tcp", %remote, error = %err, "connection ended with error");
    }
}
