//! Shared helpers for the chassis integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::{Json, Router};
use bytes::{BufMut, Bytes, BytesMut};
use kit::{BoxError, Endpoint};
use mcp::{decode_json, ServerInfo, Tool, ToolServer};
use network_client::{client_tls_config, client_tls_config_with_alpn, ClientOptions, McpQuicClient, Verification};
use network_server::{Chassis, ChassisConfig};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub fn router() -> Router {
    Router::new().route("/v1/health", get(|| async { Json(json!({"status": "ok"})) }))
}

/// Tool server with an `echo` tool.
pub fn tool_server() -> Arc<ToolServer> {
    let server = ToolServer::new(ServerInfo::new("chassis-test", "0.0.1"));
    let echo = Endpoint::new(|_ctx, args: Value| async move { Ok::<_, BoxError>(args) });
    server.add_endpoint_tool(
        Tool::new("echo", "Returns its arguments").with_property("text", "string", "Text to echo"),
        echo,
        decode_json::<Value>(),
    );
    Arc::new(server)
}

pub fn local_config() -> ChassisConfig {
    ChassisConfig::new(SocketAddr::from(([127, 0, 0, 1], 0)), router())
}

pub struct Running {
    pub chassis: Chassis,
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
}

impl Running {
    pub async fn stop(self) {
        self.cancel.cancel();
        self.chassis
            .shutdown(SHUTDOWN_TIMEOUT)
            .await
            .expect("shutdown");
    }
}

pub fn start(config: ChassisConfig) -> Running {
    let chassis = Chassis::new(config).expect("chassis");
    let cancel = CancellationToken::new();
    let addr = chassis.start(&cancel).expect("start");
    Running { chassis, addr, cancel }
}

pub async fn mcp_client(addr: SocketAddr) -> McpQuicClient {
    let tls = client_tls_config(Verification::Insecure).unwrap();
    McpQuicClient::connect(addr, tls, ClientOptions::default())
        .await
        .expect("connect")
}

/// QUIC connection without any protocol logic on top.
pub async fn raw_connect(addr: SocketAddr, alpn: &[&str]) -> (quinn::Endpoint, quinn::Connection) {
    let tls = client_tls_config_with_alpn(Verification::Insecure, alpn).unwrap();
    let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls).unwrap();
    let mut endpoint = quinn::Endpoint::client(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
    endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));
    let conn = endpoint.connect(addr, "localhost").unwrap().await.unwrap();
    (endpoint, conn)
}

/// Code of the `RESET_STREAM` the server sent on `recv`.
pub async fn reset_code(recv: &mut quinn::RecvStream) -> u64 {
    let mut buf = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), recv.read(&mut buf))
        .await
        .expect("server did not reset the stream");
    match read {
        Err(quinn::ReadError::Reset(code)) => code.into_inner(),
        other => panic!("expected stream reset, got {other:?}"),
    }
}

pub struct H3Client {
    pub conn: quinn::Connection,
    requests: h3::client::SendRequest<h3_quinn::OpenStreams, Bytes>,
    _endpoint: quinn::Endpoint,
}

/// HTTP/3 client over a fresh `h3` connection; the driver runs in the background.
pub async fn h3_client(addr: SocketAddr) -> H3Client {
    let (endpoint, conn) = raw_connect(addr, &["h3"]).await;
    let (mut driver, requests) = h3::client::new(h3_quinn::Connection::new(conn.clone()))
        .await
        .expect("h3 handshake");
    tokio::spawn(async move {
        let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
    });
    H3Client {
        conn,
        requests,
        _endpoint: endpoint,
    }
}

impl H3Client {
    /// Sends `req` with `body` and collects the whole response.
    pub async fn send(&mut self, req: http::Request<()>, body: Bytes) -> (http::Response<()>, Bytes) {
        let mut stream = self.requests.send_request(req).await.unwrap();
        if !body.is_empty() {
            stream.send_data(body).await.unwrap();
        }
        stream.finish().await.unwrap();

        let resp = stream.recv_response().await.unwrap();
        let mut collected = BytesMut::new();
        while let Some(chunk) = stream.recv_data().await.unwrap() {
            collected.put(chunk);
        }
        (resp, collected.freeze())
    }
}

pub fn h3_request(method: http::Method, path: &str) -> http::Request<()> {
    http::Request::builder()
        .method(method)
        .uri(format!("https://localhost{path}"))
        .body(())
        .unwrap()
}

/// Application close code the server sent, waiting at most five seconds.
pub async fn close_code(conn: &quinn::Connection) -> u64 {
    let err = tokio::time::timeout(Duration::from_secs(5), conn.closed())
        .await
        .expect("server did not close the connection");
    match err {
        quinn::ConnectionError::ApplicationClosed(close) => close.error_code.into_inner(),
        other => panic!("expected application close, got {other:?}"),
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
