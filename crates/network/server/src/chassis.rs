//! The dual-transport chassis.
//!
//! One address, two sockets:
//! - TCP: TLS with ALPN `h2`/`http/1.1`, served by hyper with the router
//! - UDP: QUIC with ALPN `h3` (same router, via the HTTP/3 bridge) or the
//!   custom protocol (connection handler)
//!
//! Every HTTP response, whatever the transport, carries the security headers
//! and an `Alt-Svc` entry for the QUIC port.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use network_shared::ConnectionCode;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ChassisConfig;
use crate::connection::McpConnectionHandler;
use crate::demux::{accept_loop, QuicDemux};
use crate::error::ChassisError;
use crate::http3::H3Engine;
use crate::tcp::{TcpServer, TcpSignals};
use crate::{middleware, tls};

struct Running {
    local_addr: SocketAddr,
    endpoint: quinn::Endpoint,
    /// Stops both accept loops.
    accept: CancellationToken,
    /// Parent of every QUIC connection's token. Only `shutdown` cancels it,
    /// once the drain window is over.
    sessions: CancellationToken,
    tcp: TcpSignals,
    tcp_tasks: TaskTracker,
    quic_tasks: TaskTracker,
    h3: Arc<H3Engine>,
    loops: Vec<(&'static str, JoinHandle<()>)>,
}

pub struct Chassis {
    config: ChassisConfig,
    tls: Arc<rustls::ServerConfig>,
    state: Mutex<Option<Running>>,
}

impl Chassis {
    /// Resolves TLS material; nothing is bound yet.
    pub fn new(config: ChassisConfig) -> Result<Self, ChassisError> {
        let tls = tls::resolve(&config.tls)?;
        Ok(Self {
            config,
            tls,
            state: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Option<Running>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().as_ref().map(|r| r.local_addr)
    }

    /// Binds UDP and TCP on the same port and spawns both accept loops.
    ///
    /// Cancelling `cancel` stops accepting and starts the TCP graceful drain.
    /// Open QUIC connections keep running until [`Chassis::shutdown`] ends
    /// them after `ShutdownPolicy::quic_drain_timeout`.
    pub fn start(&self, cancel: &CancellationToken) -> Result<SocketAddr, ChassisError> {
        let mut state = self.lock();
        if state.is_some() {
            return Err(ChassisError::AlreadyStarted);
        }

        let mut server_config = quinn::ServerConfig::with_crypto(tls::quic_crypto(self.tls.clone())?);
        server_config.transport_config(Arc::new(self.config.transport.to_transport_config()?));
        // UDP first so that port 0 resolves before TCP binds
        let endpoint = quinn::Endpoint::server(server_config, self.config.addr).map_err(|source| {
            ChassisError::Bind {
                proto: "udp",
                addr: self.config.addr,
                source,
            }
        })?;
        let local_addr = endpoint.local_addr()?;
        let listener = match bind_tcp(local_addr) {
            Ok(listener) => listener,
            Err(source) => {
                endpoint.close(ConnectionCode::NoError.into(), b"");
                return Err(ChassisError::Bind {
                    proto: "tcp",
                    addr: local_addr,
                    source,
                });
            }
        };

        let router = middleware::apply(self.config.router.clone(), local_addr.port());
        let accept = cancel.child_token();
        let sessions = CancellationToken::new();
        let tcp = TcpSignals {
            accept: accept.clone(),
            graceful: cancel.child_token(),
            force: CancellationToken::new(),
        };
        let tcp_tasks = TaskTracker::new();
        let quic_tasks = TaskTracker::new();

        let h3 = Arc::new(H3Engine::new(
            router.clone(),
            self.config.max_message_size,
            quic_tasks.clone(),
        ));
        let mcp = self.config.rpc.clone().map(|rpc| {
            Arc::new(
                McpConnectionHandler::new(rpc)
                    .with_handshake_timeout(self.config.handshake_timeout)
                    .with_max_message_size(self.config.max_message_size)
                    .with_task_tracker(quic_tasks.clone()),
            )
        });
        let mcp_enabled = mcp.is_some();
        let demux = QuicDemux::new(Some(h3.clone()), mcp);

        let tcp_server = TcpServer {
            listener,
            tls: tls::tcp_variant(&self.tls),
            router,
            handshake_timeout: self.config.handshake_timeout,
            tasks: tcp_tasks.clone(),
        };
        let loops = vec![
            ("tcp accept loop", tokio::spawn(tcp_server.run(tcp.clone()))),
            (
                "quic accept loop",
                tokio::spawn(accept_loop(
                    endpoint.clone(),
                    demux,
                    accept.clone(),
                    sessions.clone(),
                    quic_tasks.clone(),
                )),
            ),
        ];

        tracing::info!(
            target: "network::chassis",
            addr = %local_addr,
            tcp = "HTTP/1.1+HTTP/2 (TLS)",
            udp = "QUIC (HTTP/3 + MCP)",
            mcp_enabled,
            "chassis started"
        );

        *state = Some(Running {
            local_addr,
            endpoint,
            accept,
            sessions,
            tcp,
            tcp_tasks,
            quic_tasks,
            h3,
            loops,
        });
        Ok(local_addr)
    }

    /// Starts, serves until `cancel` fires, then shuts down within `timeout`.
    pub async fn run(&self, cancel: CancellationToken, timeout: Duration) -> Result<(), ChassisError> {
        self.start(&cancel)?;
        cancel.cancelled().await;
        self.shutdown(timeout).await
    }

    /// Stops everything within `timeout`.
    ///
    /// TCP drains gracefully until the deadline. QUIC stops accepting, lets
    /// sessions run for `ShutdownPolicy::quic_drain_timeout` (bounded by the
    /// deadline), closes HTTP/3 connections with `H3_NO_ERROR` and then the
    /// endpoint. Every part runs; the first error is returned. Calling this
    /// again after it returned is a no-op.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), ChassisError> {
        let Some(running) = self.lock().take() else {
            tracing::debug!(target: "network::chassis", "shutdown: chassis not running");
            return Ok(());
        };
        tracing::info!(target: "network::chassis", addr = %running.local_addr, "chassis stopping");
        let deadline = Instant::now() + timeout;

        running.accept.cancel();
        let mut first_err = None;
        for (name, handle) in running.loops {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    first_err.get_or_insert(ChassisError::Task(name, err.to_string()));
                }
                Err(_) => {
                    first_err.get_or_insert(ChassisError::DrainTimeout(name));
                }
            }
        }
        running.tcp_tasks.close();
        running.quic_tasks.close();

        let tcp = async {
            running.tcp.graceful.cancel();
            if tokio::time::timeout_at(deadline, running.tcp_tasks.wait()).await.is_err() {
                running.tcp.force.cancel();
                running.tcp_tasks.wait().await;
                return Err(ChassisError::DrainTimeout("tcp connections"));
            }
            Ok(())
        };

        let quic = async {
            running.endpoint.set_server_config(None);
            let drain = self.config.shutdown.quic_drain_timeout;
            if !drain.is_zero() {
                let until = deadline.min(Instant::now() + drain);
                if tokio::time::timeout_at(until, running.quic_tasks.wait()).await.is_err() {
                    tracing::debug!(target: "network::chassis", "quic drain timeout elapsed, closing sessions");
                }
            }
            running.h3.close();
            running.sessions.cancel();
            running
                .endpoint
                .close(ConnectionCode::NoError.into(), b"server shutting down");
            let idle = async {
                running.quic_tasks.wait().await;
                running.endpoint.wait_idle().await;
            };
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return Err(ChassisError::DrainTimeout("quic connections"));
            }
            Ok(())
        };

        let (tcp_res, quic_res) = tokio::join!(tcp, quic);
        for res in [tcp_res, quic_res] {
            if let Err(err) = res {
                first_err.get_or_insert(err);
            }
        }

        tracing::info!(target: "network::chassis", "chassis stopped");
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn bind_tcp(addr: SocketAddr) -> std::io::Result<tokio::net::TcpListener> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    tokio::net::TcpListener::from_std(listener)
}
