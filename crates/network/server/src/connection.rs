//! Lifecycle of one inbound custom-protocol connection.
//!
//! Order of events per connection:
//! 1. accept the control stream (the first bidirectional stream the client opens)
//! 2. validate the magic bytes
//! 3. create and register the session
//! 4. start the notification drain task
//! 5. read loop: one JSON-RPC message per line, replies written in order
//! 6. unregister the session, settle the stream, close the connection
//!
//! Handshake and registration failures end here; they are logged with the
//! remote address and the close code and never reach the chassis.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kit::{RequestContext, Transport};
use mcp::SessionServer;
use network_shared::codec::FrameError;
use network_shared::handshake::validate_magic_within;
use network_shared::{
    ConnectionCode, LineReader, SessionId, StreamCode, DEFAULT_HANDSHAKE_TIMEOUT, MAX_MESSAGE_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::session::{drain_notifications, McpSession};

/// How long a finished send side may take to be acknowledged before the
/// connection is closed anyway.
const STREAM_LINGER: Duration = Duration::from_secs(2);

/// Head start for stop/reset frames before the connection close that would
/// otherwise discard them.
const RESET_LINGER: Duration = Duration::from_millis(50);

/// Why a session's read loop stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer finished its side of the stream.
    Eof,
    Cancelled,
    /// A line exceeded the size ceiling.
    MessageTooLarge,
    ReadFailed(FrameError),
    WriteFailed(std::io::Error),
}

/// Read loop of one session: dispatch each line, write each reply, in order.
pub async fn run_session<R, W>(
    reader: &mut LineReader<R>,
    session: &McpSession<W>,
    server: &dyn SessionServer,
    ctx: &RequestContext,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send,
{
    let cancel = ctx.cancellation();
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            next = reader.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => return SessionEnd::Eof,
            Err(FrameError::TooLarge { .. }) => return SessionEnd::MessageTooLarge,
            Err(err) => return SessionEnd::ReadFailed(err),
        };

        let response = tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            response = server.handle_message(ctx, &line) => response,
        };
        let Some(response) = response else {
            continue;
        };

        match session.write_message(&response).await {
            Ok(()) => {}
            Err(FrameError::Io(err)) => return SessionEnd::WriteFailed(err),
            Err(err) => {
                // the request still gets an answer, just not this one
                tracing::warn!(
                    target: "network::mcp",
                    session = %session.id(),
                    error = %err,
                    "reply not sendable, answering with internal error"
                );
                let fallback = mcp::JsonRpcResponse::failure(
                    response.id.clone(),
                    mcp::RpcError::internal(err.to_string()),
                );
                if let Err(FrameError::Io(err)) = session.write_message(&fallback).await {
                    return SessionEnd::WriteFailed(err);
                }
            }
        }
    }
}

/// Serves custom-protocol connections against one RPC server.
pub struct McpConnectionHandler {
    server: Arc<dyn SessionServer>,
    handshake_timeout: Duration,
    max_message_size: usize,
    tasks: TaskTracker,
}

impl McpConnectionHandler {
    pub fn new(server: Arc<dyn SessionServer>) -> Self {
        Self {
            server,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            max_message_size: MAX_MESSAGE_SIZE,
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = limit;
        self
    }

    pub fn with_task_tracker(mut self, tasks: TaskTracker) -> Self {
        self.tasks = tasks;
        self
    }

    /// Owns `conn` until it is closed. `cancel` ends the session from outside.
    pub async fn serve(&self, conn: quinn::Connection, cancel: CancellationToken) {
        let remote = conn.remote_address();
        tracing::info!(target: "network::mcp", %remote, "connection accepted");

        let accepted = tokio::select! {
            _ = cancel.cancelled() => {
                close(&conn, ConnectionCode::NoError);
                return;
            }
            accepted = tokio::time::timeout(self.handshake_timeout, conn.accept_bi()) => accepted,
        };
        let (mut send, mut recv) = match accepted {
            Ok(Ok(streams)) => streams,
            Ok(Err(err)) => {
                reject(&conn, remote, &err, "control stream accept failed");
                return;
            }
            Err(_) => {
                reject(&conn, remote, &"timed out", "control stream accept failed");
                return;
            }
        };

        if let Err(err) = validate_magic_within(&mut recv, self.handshake_timeout).await {
            if err.is_protocol_confusion() {
                abort_stream(&mut recv, &mut send, StreamCode::ProtocolConfusion).await;
            }
            reject(&conn, remote, &err, "handshake failed");
            return;
        }

        let id = SessionId::new_quic();
        let (session, queue) = McpSession::new(id.clone(), send, self.max_message_size);
        if let Err(err) = self.server.register_session(session.clone()) {
            tracing::error!(target: "network::mcp", %remote, session = %id, error = %err, "session registration failed");
            let _ = session.lock_writer().await.finish();
            let _ = recv.stop(StreamCode::NoError.into());
            close(&conn, ConnectionCode::NoError);
            return;
        }
        tracing::info!(target: "network::mcp", %remote, session = %id, "session started");

        let ctx = RequestContext::new()
            .with_transport(Transport::McpQuic)
            .with_cancellation(cancel.child_token());
        let ctx = self.server.session_context(ctx, session.as_ref());

        let drain_cancel = ctx.cancellation().child_token();
        let drain = self
            .tasks
            .spawn(drain_notifications(session.clone(), queue, drain_cancel.clone()));

        let mut reader = LineReader::new(recv, self.max_message_size);
        let end = run_session(&mut reader, &session, self.server.as_ref(), &ctx).await;

        drain_cancel.cancel();
        let _ = drain.await;
        self.server.unregister_session(id.as_str());

        match end {
            SessionEnd::Eof => {
                tracing::info!(target: "network::mcp", %remote, session = %id, "session ended by peer");
                let mut send = session.lock_writer().await;
                if send.finish().is_ok() {
                    let _ = tokio::time::timeout(STREAM_LINGER, send.stopped()).await;
                }
                close(&conn, ConnectionCode::NoError);
            }
            SessionEnd::Cancelled => {
                tracing::info!(target: "network::mcp", %remote, session = %id, "session cancelled");
                close(&conn, ConnectionCode::NoError);
            }
            SessionEnd::MessageTooLarge => {
                tracing::warn!(
                    target: "network::mcp",
                    %remote,
                    session = %id,
                    code = %ConnectionCode::ProtocolViolation,
                    limit = self.max_message_size,
                    "message too large"
                );
                let mut send = session.lock_writer().await;
                abort_stream(reader.get_mut(), &mut send, StreamCode::MessageTooLarge).await;
                close(&conn, ConnectionCode::ProtocolViolation);
            }
            SessionEnd::ReadFailed(err) => {
                log_transport_end(remote, &id, "read", &err);
                close(&conn, ConnectionCode::NoError);
            }
            SessionEnd::WriteFailed(err) => {
                log_transport_end(remote, &id, "write", &err);
                close(&conn, ConnectionCode::NoError);
            }
        }
    }
}

async fn abort_stream(recv: &mut quinn::RecvStream, send: &mut quinn::SendStream, code: StreamCode) {
    let code = code.into();
    let _ = recv.stop(code);
    let _ = send.reset(code);
    tokio::time::sleep(RESET_LINGER).await;
}

fn log_transport_end(remote: SocketAddr, id: &SessionId, op: &str, err: &dyn std::fmt::Display) {
    tracing::error!(target: "network::mcp", %remote, session = %id, op, error = %err, "session transport error");
}

fn reject(conn: &quinn::Connection, remote: SocketAddr, err: &dyn std::fmt::Display, what: &str) {
    let code = ConnectionCode::ProtocolViolation;
    tracing::warn!(target: "network::mcp", %remote, %code, error = %err, "{what}");
    close(conn, code);
}

pub(crate) fn close(conn: &quinn::Connection, code: ConnectionCode) {
    conn.close(code.into(), code.reason().as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use kit::{BoxError, Endpoint};
    use mcp::{decode_json, ClientSession, ServerInfo, Tool, ToolServer};
    use serde_json::{json, Value};
    use tokio::io::{duplex, AsyncWriteExt, DuplexStream};

    fn tool_server() -> Arc<ToolServer> {
        let server = ToolServer::new(ServerInfo::new("test", "0.0.1"));
        let echo = Endpoint::new(|_ctx, v: Value| async move { Ok::<_, BoxError>(v) });
        server.add_endpoint_tool(Tool::new("echo", "Echo"), echo, decode_json::<Value>());
        Arc::new(server)
    }

    struct Harness {
        client_in: DuplexStream,
        client_out: LineReader<DuplexStream>,
        session: Arc<McpSession<DuplexStream>>,
        reader: LineReader<DuplexStream>,
        ctx: RequestContext,
    }

    fn harness(server: &Arc<ToolServer>, limit: usize) -> Harness {
        let (client_in, server_in) = duplex(64 * 1024);
        let (server_out, client_out) = duplex(64 * 1024);
        let (session, _queue) = McpSession::new(SessionId::new_quic(), server_out, limit);
        server.register_session(session.clone()).unwrap();
        let ctx = server.session_context(
            RequestContext::new().with_transport(Transport::McpQuic),
            session.as_ref(),
        );
        Harness {
            client_in,
            client_out: LineReader::new(client_out, 1024 * 1024),
            session,
            reader: LineReader::new(server_in, limit),
            ctx,
        }
    }

    async fn next_json(reader: &mut LineReader<DuplexStream>) -> Value {
        let line = reader.next_line().await.unwrap().unwrap();
        serde_json::from_slice(&line).unwrap()
    }

    #[tokio::test]
    async fn replies_in_request_order() {
        let server = tool_server();
        let mut h = harness(&server, MAX_MESSAGE_SIZE);

        let mut batch = String::new();
        for i in 0..10 {
            batch.push_str(&format!(
                "{{\"jsonrpc\":\"2.0\",\"id\":{i},\"method\":\"tools/call\",\"params\":{{\"name\":\"echo\",\"arguments\":{{\"i\":{i}}}}}}}\n"
            ));
        }
        h.client_in.write_all(batch.as_bytes()).await.unwrap();
        drop(h.client_in);

        let end = run_session(&mut h.reader, &h.session, server.as_ref(), &h.ctx).await;
        assert!(matches!(end, SessionEnd::Eof));

        for i in 0..10 {
            let v = next_json(&mut h.client_out).await;
            assert_eq!(v["id"], i);
            assert_eq!(v["result"]["isError"], false);
        }
    }

    #[tokio::test]
    async fn blank_lines_and_notifications_get_no_reply() {
        let server = tool_server();
        let mut h = harness(&server, MAX_MESSAGE_SIZE);

        h.client_in
            .write_all(
                b"\n\n{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\n{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n",
            )
            .await
            .unwrap();
        drop(h.client_in);

        let end = run_session(&mut h.reader, &h.session, server.as_ref(), &h.ctx).await;
        assert!(matches!(end, SessionEnd::Eof));
        assert!(h.session.initialized());

        let v = next_json(&mut h.client_out).await;
        assert_eq!(v, json!({"jsonrpc": "2.0", "id": 1, "result": {}}));
    }

    #[tokio::test]
    async fn malformed_line_is_answered_and_loop_continues() {
        let server = tool_server();
        let mut h = harness(&server, MAX_MESSAGE_SIZE);

        h.client_in
            .write_all(b"{oops\n{\"jsonrpc\":\"2.0\",\"id\":2,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        drop(h.client_in);

        run_session(&mut h.reader, &h.session, server.as_ref(), &h.ctx).await;

        let v = next_json(&mut h.client_out).await;
        assert_eq!(v["error"]["code"], -32700);
        let v = next_json(&mut h.client_out).await;
        assert_eq!(v["id"], 2);
    }

    #[tokio::test]
    async fn oversized_line_ends_session() {
        let server = tool_server();
        let mut h = harness(&server, 64);

        h.client_in.write_all(&[b'x'; 65]).await.unwrap();

        let end = run_session(&mut h.reader, &h.session, server.as_ref(), &h.ctx).await;
        assert!(matches!(end, SessionEnd::MessageTooLarge));
    }

    #[tokio::test]
    async fn cancellation_stops_idle_session() {
        let server = tool_server();
        let mut h = harness(&server, MAX_MESSAGE_SIZE);
        let token = h.ctx.cancellation().clone();

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        });
        let end = run_session(&mut h.reader, &h.session, server.as_ref(), &h.ctx).await;
        canceller.await.unwrap();
        assert!(matches!(end, SessionEnd::Cancelled));
    }

    #[tokio::test]
    async fn notifications_and_replies_share_the_stream() {
        let server = tool_server();
        let (client_in, server_in) = duplex(64 * 1024);
        let (server_out, client_out) = duplex(64 * 1024);
        let (session, queue) = McpSession::new(SessionId::new_quic(), server_out, MAX_MESSAGE_SIZE);
        server.register_session(session.clone()).unwrap();
        let ctx = server.session_context(RequestContext::new(), session.as_ref());
        let drain_cancel = CancellationToken::new();
        let drain = tokio::spawn(drain_notifications(session.clone(), queue, drain_cancel.clone()));

        server
            .notify(
                session.session_id(),
                mcp::JsonRpcNotification::new("notifications/message", Some(json!({"level": "info"}))),
            )
            .unwrap();

        let mut client_in = client_in;
        client_in
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        drop(client_in);

        let mut reader = LineReader::new(server_in, MAX_MESSAGE_SIZE);
        run_session(&mut reader, &session, server.as_ref(), &ctx).await;
        drain_cancel.cancel();
        drain.await.unwrap();

        let mut client_out = LineReader::new(client_out, MAX_MESSAGE_SIZE);
        let mut seen = Vec::new();
        for _ in 0..2 {
            seen.push(next_json(&mut client_out).await);
        }
        assert!(seen.iter().any(|v| v["method"] == "notifications/message"));
        assert!(seen.iter().any(|v| v["id"] == 1));
    }
}
