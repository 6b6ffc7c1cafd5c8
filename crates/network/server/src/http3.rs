//! Bridge from QUIC connections that negotiated `h3` into the axum router.
//!
//! Framing is done by the `h3` crate; this module only moves requests and
//! responses between it and the router and keeps track of live connections
//! so shutdown can close them with `H3_NO_ERROR`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use axum::body::Body;
use axum::Router;
use bytes::{Buf, Bytes, BytesMut};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use kit::BoxError;
use quinn::VarInt;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower::ServiceExt;

/// HTTP/3 application error code for a graceful close.
pub const H3_NO_ERROR: u32 = 0x100;

type H3Stream = h3::server::RequestStream<h3_quinn::BidiStream<Bytes>, Bytes>;

pub struct H3Engine {
    router: Router,
    max_body_size: usize,
    connections: Mutex<HashMap<usize, quinn::Connection>>,
    tasks: TaskTracker,
}

impl H3Engine {
    pub fn new(router: Router, max_body_size: usize, tasks: TaskTracker) -> Self {
        Self {
            router,
            max_body_size,
            connections: Mutex::new(HashMap::new()),
            tasks,
        }
    }

    pub fn active_connections(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<usize, quinn::Connection>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Serves requests on `conn` until the peer goes away or `cancel` fires.
    pub async fn serve(&self, conn: quinn::Connection, cancel: CancellationToken) {
        let remote = conn.remote_address();
        let id = conn.stable_id();
        self.lock().insert(id, conn.clone());

        let h3_conn = h3::server::Connection::<_, Bytes>::new(h3_quinn::Connection::new(conn)).await;
        let mut h3_conn = match h3_conn {
            Ok(c) => c,
            Err(err) => {
                tracing::debug!(target: "network::h3", %remote, error = %err, "http/3 setup failed");
                self.lock().remove(&id);
                return;
            }
        };

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = h3_conn.accept() => next,
            };
            match next {
                Ok(Some(resolver)) => {
                    let router = self.router.clone();
                    let limit = self.max_body_size;
                    self.tasks.spawn(async move {
                        let (req, stream) = match resolver.resolve_request().await {
                            Ok(pair) => pair,
                            Err(err) => {
                                tracing::debug!(target: "network::h3", %remote, error = %err, "bad request headers");
                                return;
                            }
                        };
                        if let Err(err) = serve_request(router, req, stream, limit).await {
                            tracing::debug!(target: "network::h3", %remote, error = %err, "request failed");
                        }
                    });
                }
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(target: "network::h3", %remote, error = %err, "http/3 connection ended");
                    break;
                }
            }
        }

        self.lock().remove(&id);
    }

    /// Closes every tracked connection with `H3_NO_ERROR`.
    pub fn close(&self) {
        let connections: Vec<_> = self.lock().drain().map(|(_, c)| c).collect();
        if !connections.is_empty() {
            tracing::debug!(target: "network::h3", count = connections.len(), "closing http/3 connections");
        }
        for conn in connections {
            conn.close(VarInt::from_u32(H3_NO_ERROR), b"server shutting down");
        }
    }
}

async fn serve_request(
    router: Router,
    req: Request<()>,
    mut stream: H3Stream,
    limit: usize,
) -> Result<(), BoxError> {
    let mut body = BytesMut::new();
    while let Some(mut chunk) = stream.recv_data().await? {
        if body.len() + chunk.remaining() > limit {
            let resp = Response::builder()
                .status(StatusCode::PAYLOAD_TOO_LARGE)
                .body(())?;
            stream.send_response(resp).await?;
            stream.finish().await?;
            return Ok(());
        }
        while chunk.has_remaining() {
            let part = chunk.chunk();
            let n = part.len();
            body.extend_from_slice(part);
            chunk.advance(n);
        }
    }

    let (parts, ()) = req.into_parts();
    let req = Request::from_parts(parts, Body::from(body.freeze()));
    let resp = match router.oneshot(req).await {
        Ok(resp) => resp,
        Err(never) => match never {},
    };

    let (parts, mut body) = resp.into_parts();
    stream.send_response(Response::from_parts(parts, ())).await?;
    while let Some(frame) = body.frame().await {
        let frame = frame?;
        match frame.into_data() {
            Ok(data) => stream.send_data(data).await?,
            Err(frame) => {
                if let Ok(trailers) = frame.into_trailers() {
                    stream.send_trailers(trailers).await?;
                }
            }
        }
    }
    stream.finish().await?;
    Ok(())
}
