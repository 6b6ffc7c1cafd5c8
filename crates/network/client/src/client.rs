//! QUIC client for the custom protocol.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use mcp::{Tool, ToolResult, LATEST_PROTOCOL_VERSION};
use network_shared::handshake::send_magic;
use network_shared::{ConnectionCode, QuicTransportParams, ALPN_MCP, MAX_MESSAGE_SIZE};
use serde_json::{json, Value};

use crate::error::{ClientError, ClientResult};
use crate::peer::RpcPeer;

/// Bound on every request, including `initialize`.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How long `close` waits for the close frame to be delivered.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// TLS server name (SNI and certificate check).
    pub server_name: String,
    pub transport: QuicTransportParams,
    pub request_timeout: Duration,
    pub max_message_size: usize,
    /// Reported as `clientInfo.name` in `initialize`.
    pub client_name: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_name: "localhost".into(),
            transport: QuicTransportParams::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
            client_name: env!("CARGO_PKG_NAME").into(),
        }
    }
}

impl ClientOptions {
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// An initialized custom-protocol session.
pub struct McpQuicClient {
    endpoint: quinn::Endpoint,
    conn: quinn::Connection,
    peer: RpcPeer<quinn::SendStream>,
    server_info: Value,
}

impl McpQuicClient {
    /// Dials `addr`, runs the magic-byte handshake and the `initialize`
    /// exchange. `tls` must offer the custom ALPN token.
    pub async fn connect(
        addr: SocketAddr,
        tls: rustls::ClientConfig,
        options: ClientOptions,
    ) -> ClientResult<Self> {
        let crypto = quinn::crypto::rustls::QuicClientConfig::try_from(tls)
            .map_err(|e| ClientError::QuicConfig(e.to_string()))?;
        let mut config = quinn::ClientConfig::new(Arc::new(crypto));
        config.transport_config(Arc::new(options.transport.to_transport_config()?));

        let bind: SocketAddr = if addr.is_ipv6() {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let endpoint = quinn::Endpoint::client(bind).map_err(ClientError::Endpoint)?;
        let conn = endpoint
            .connect_with(config, addr, &options.server_name)?
            .await?;
        tracing::debug!(target: "network::client", remote = %addr, "quic connection established");

        let alpn = conn
            .handshake_data()
            .and_then(|data| data.downcast::<quinn::crypto::rustls::HandshakeData>().ok())
            .and_then(|data| data.protocol);
        if alpn.as_deref() != Some(ALPN_MCP.as_bytes()) {
            let code = ConnectionCode::UnsupportedAlpn;
            conn.close(code.into(), code.reason().as_bytes());
            return Err(ClientError::UnsupportedAlpn(
                alpn.map(|p| String::from_utf8_lossy(&p).into_owned()),
            ));
        }

        let (mut send, recv) = conn.open_bi().await?;
        if let Err(err) = send_magic(&mut send).await {
            let code = ConnectionCode::ProtocolViolation;
            conn.close(code.into(), code.reason().as_bytes());
            return Err(err.into());
        }

        let peer = RpcPeer::new(recv, send, options.request_timeout, options.max_message_size);
        let mut client = Self {
            endpoint,
            conn,
            peer,
            server_info: Value::Null,
        };
        if let Err(err) = client.initialize(&options.client_name).await {
            client.close().await;
            return Err(err);
        }
        Ok(client)
    }

    async fn initialize(&mut self, client_name: &str) -> ClientResult<()> {
        let result = self
            .peer
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": LATEST_PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {"name": client_name, "version": env!("CARGO_PKG_VERSION")},
                })),
            )
            .await?;
        self.peer.notify("notifications/initialized", None).await?;
        let server = result.get("serverInfo").cloned().unwrap_or_default();
        tracing::info!(
            target: "network::client",
            remote = %self.conn.remote_address(),
            %server,
            "session initialized"
        );
        self.server_info = result;
        Ok(())
    }

    /// Result of the `initialize` request.
    pub fn server_info(&self) -> &Value {
        &self.server_info
    }

    pub fn remote_address(&self) -> SocketAddr {
        self.conn.remote_address()
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        self.peer.request(method, params).await
    }

    pub async fn ping(&self) -> ClientResult<()> {
        self.peer.request("ping", None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> ClientResult<Vec<Tool>> {
        let mut result = self.peer.request("tools/list", None).await?;
        let tools = result.get_mut("tools").map(Value::take).unwrap_or_default();
        Ok(serde_json::from_value(tools)?)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<ToolResult> {
        let result = self
            .peer
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Next server-pushed notification; `None` once the session ended.
    pub async fn next_notification(&self) -> Option<mcp::JsonRpcNotification> {
        self.peer.next_notification().await
    }

    /// Finishes the control stream and closes the connection with no-error.
    pub async fn close(self) {
        let _ = self.peer.lock_writer().await.finish();
        let code = ConnectionCode::NoError;
        self.conn.close(code.into(), code.reason().as_bytes());
        let _ = tokio::time::timeout(CLOSE_LINGER, self.endpoint.wait_idle()).await;
        tracing::debug!(target: "network::client", remote = %self.conn.remote_address(), "client closed");
    }
}
