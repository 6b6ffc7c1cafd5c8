//! End-to-end tests against a chassis bound on loopback.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::*;
use http::Method;
use kit::{BoxError, Endpoint};
use mcp::{decode_json, Tool};
use network_client::McpQuicClient;
use network_server::{
    tls, Chassis, ChassisConfig, ChassisError, ShutdownPolicy, TlsSource, H3_NO_ERROR,
};
use network_shared::codec::write_line;
use network_shared::{LineReader, ALPN_MCP, MAGIC_BYTES, MAX_MESSAGE_SIZE};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_initialize_registers_session() {
    let rpc = tool_server();
    let running = start(local_config().with_rpc_server(rpc.clone()));
    assert_eq!(rpc.session_count(), 0);

    let client = mcp_client(running.addr).await;
    assert_eq!(client.server_info()["serverInfo"]["name"], "chassis-test");
    assert!(eventually(|| rpc.session_count() == 1).await);

    // Session is initialized once the notification went through
    assert!(
        eventually(|| {
            rpc.broadcast(mcp::JsonRpcNotification::new("notifications/tools/list_changed", None)) == 1
        })
        .await
    );
    let pushed = tokio::time::timeout(Duration::from_secs(5), client.next_notification())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pushed.method, "notifications/tools/list_changed");

    let tools = client.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo");

    let result = client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
    assert!(!result.is_error);
    let echoed: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
    assert_eq!(echoed, json!({"text": "hi"}));

    client.ping().await.unwrap();
    client.close().await;
    running.stop().await;
}

#[tokio::test]
async fn test_wrong_magic_closes_with_protocol_violation() {
    let rpc = tool_server();
    let running = start(local_config().with_rpc_server(rpc.clone()));

    let (_endpoint, conn) = raw_connect(running.addr, &[ALPN_MCP]).await;
    let (mut send, mut recv) = conn.open_bi().await.unwrap();
    send.write_all(b"XXXX").await.unwrap();

    // Both directions of the control stream carry protocol-confusion
    assert_eq!(reset_code(&mut recv).await, 0x02);
    let stopped = send.stopped().await.unwrap();
    assert_eq!(stopped.map(quinn::VarInt::into_inner), Some(0x02));

    assert_eq!(close_code(&conn).await, 0x03);
    assert_eq!(rpc.session_count(), 0);
    running.stop().await;
}

#[tokio::test]
async fn test_oversized_message_resets_stream_and_closes() {
    let rpc = tool_server();
    let running = start(local_config().with_rpc_server(rpc.clone()).with_max_message_size(64));

    let (_endpoint, conn) = raw_connect(running.addr, &[ALPN_MCP]).await;
    let (mut send, mut recv) = conn.open_bi().await.unwrap();
    send.write_all(MAGIC_BYTES).await.unwrap();
    assert!(eventually(|| rpc.session_count() == 1).await);

    send.write_all(&[b'x'; 100]).await.unwrap();
    assert_eq!(reset_code(&mut recv).await, 0x03);
    assert_eq!(close_code(&conn).await, 0x03);
    assert!(eventually(|| rpc.session_count() == 0).await);

    running.stop().await;
}

#[tokio::test]
async fn test_unrouted_alpn_closes_with_unsupported_alpn() {
    // Explicit config that advertises a protocol the chassis does not route
    let identity = tls::self_signed().unwrap();
    let server_tls = tls::server_config(identity, &["h3", ALPN_MCP, "ftp"]).unwrap();
    let running = start(
        local_config()
            .with_tls(TlsSource::Explicit(Arc::new(server_tls)))
            .with_rpc_server(tool_server()),
    );

    let (_endpoint, conn) = raw_connect(running.addr, &["ftp"]).await;
    assert_eq!(close_code(&conn).await, 0x01);
    running.stop().await;
}

#[tokio::test]
async fn test_custom_protocol_disabled_without_rpc_server() {
    let running = start(local_config());

    let (_endpoint, conn) = raw_connect(running.addr, &[ALPN_MCP]).await;
    assert_eq!(close_code(&conn).await, 0x10);
    running.stop().await;
}

#[tokio::test]
async fn test_pipelined_requests_answered_in_order() {
    let running = start(local_config().with_rpc_server(tool_server()));

    let (_endpoint, conn) = raw_connect(running.addr, &[ALPN_MCP]).await;
    let (mut send, recv) = conn.open_bi().await.unwrap();
    send.write_all(MAGIC_BYTES).await.unwrap();

    // Ten requests back to back, then read ten replies
    for id in 1..=10 {
        write_line(
            &mut send,
            &json!({"jsonrpc": "2.0", "id": id, "method": "ping"}),
            MAX_MESSAGE_SIZE,
        )
        .await
        .unwrap();
    }
    let mut reader = LineReader::new(recv, MAX_MESSAGE_SIZE);
    for id in 1..=10 {
        let line = reader.next_line().await.unwrap().unwrap();
        let reply: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(reply["id"], id);
        assert_eq!(reply["result"], json!({}));
    }

    conn.close(0u32.into(), b"");
    running.stop().await;
}

async fn echo_sequence(client: &McpQuicClient, tag: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for i in 0..20 {
        let result = client
            .call_tool("echo", json!({"text": format!("{tag}-{i}")}))
            .await
            .unwrap();
        let v: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
        seen.push(v["text"].as_str().unwrap().to_string());
    }
    seen
}

#[tokio::test]
async fn test_concurrent_clients_keep_their_own_order() {
    let rpc = tool_server();
    let running = start(local_config().with_rpc_server(rpc.clone()));

    let (a, b) = tokio::join!(mcp_client(running.addr), mcp_client(running.addr));
    assert!(eventually(|| rpc.session_count() == 2).await);

    let (seen_a, seen_b) = tokio::join!(echo_sequence(&a, "a"), echo_sequence(&b, "b"));
    assert_eq!(seen_a, (0..20).map(|i| format!("a-{i}")).collect::<Vec<_>>());
    assert_eq!(seen_b, (0..20).map(|i| format!("b-{i}")).collect::<Vec<_>>());

    a.close().await;
    b.close().await;
    running.stop().await;
}

#[tokio::test]
async fn test_session_unregistered_when_client_leaves() {
    let rpc = tool_server();
    let running = start(local_config().with_rpc_server(rpc.clone()));

    let client = mcp_client(running.addr).await;
    assert!(eventually(|| rpc.session_count() == 1).await);
    client.close().await;
    assert!(eventually(|| rpc.session_count() == 0).await);

    running.stop().await;
}

#[tokio::test]
async fn test_https_over_tcp_carries_security_headers() {
    let running = start(local_config());
    let port = running.addr.port();

    let http = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .build()
        .unwrap();
    let resp = http
        .get(format!("https://127.0.0.1:{port}/v1/health"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 200);
    let headers = resp.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert_eq!(headers["referrer-policy"], "strict-origin-when-cross-origin");
    assert!(headers.contains_key("content-security-policy"));
    assert!(headers.contains_key("permissions-policy"));
    assert_eq!(headers["alt-svc"], format!("h3=\":{port}\"; ma=86400"));
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    running.stop().await;
}

#[tokio::test]
async fn test_shutdown_is_idempotent() {
    let chassis = Chassis::new(local_config().with_rpc_server(tool_server())).unwrap();
    let cancel = CancellationToken::new();
    let addr = chassis.start(&cancel).unwrap();
    assert_eq!(chassis.local_addr(), Some(addr));

    assert!(matches!(chassis.start(&cancel), Err(ChassisError::AlreadyStarted)));

    chassis.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();
    assert_eq!(chassis.local_addr(), None);
    chassis.shutdown(SHUTDOWN_TIMEOUT).await.unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_open_sessions() {
    let rpc = tool_server();
    let config = ChassisConfig::new(([127, 0, 0, 1], 0).into(), router())
        .with_rpc_server(rpc.clone())
        .with_shutdown_policy(ShutdownPolicy::default().with_quic_drain_timeout(Duration::from_millis(100)));
    let running = start(config);

    let client = mcp_client(running.addr).await;
    assert!(eventually(|| rpc.session_count() == 1).await);

    running.stop().await;
    assert_eq!(rpc.session_count(), 0);
    assert!(client.ping().await.is_err());
}

#[tokio::test]
async fn test_in_flight_call_completes_during_drain() {
    let rpc = tool_server();
    let slow = Endpoint::new(|_ctx, _args: Value| async move {
        tokio::time::sleep(Duration::from_millis(400)).await;
        Ok::<_, BoxError>(json!({"done": true}))
    });
    rpc.add_endpoint_tool(Tool::new("slow", "Answers after a while"), slow, decode_json::<Value>());
    let config = local_config()
        .with_rpc_server(rpc.clone())
        .with_shutdown_policy(ShutdownPolicy::default().with_quic_drain_timeout(Duration::from_secs(3)));
    let running = start(config);
    let client = mcp_client(running.addr).await;

    let call = async move {
        let result = client.call_tool("slow", json!({})).await;
        client.close().await;
        result
    };
    // Same order as the binary: root token first, then shutdown
    let stop = async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        running.stop().await;
    };
    let (result, ()) = tokio::join!(call, stop);

    let result = result.unwrap();
    assert!(!result.is_error);
    let body: Value = serde_json::from_str(result.first_text().unwrap()).unwrap();
    assert_eq!(body, json!({"done": true}));
    assert_eq!(rpc.session_count(), 0);
}

#[tokio::test]
async fn test_run_shuts_down_when_cancelled() {
    let chassis = Chassis::new(local_config()).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    let (res, ()) = tokio::join!(chassis.run(cancel, SHUTDOWN_TIMEOUT), async {
        assert!(eventually(|| chassis.local_addr().is_some()).await);
        trigger.cancel();
    });
    res.unwrap();
    assert_eq!(chassis.local_addr(), None);
}

#[tokio::test]
async fn test_http3_serves_router_with_security_headers() {
    let running = start(local_config());
    let port = running.addr.port();
    let mut client = h3_client(running.addr).await;

    let (resp, body) = client.send(h3_request(Method::GET, "/v1/health"), Bytes::new()).await;
    assert_eq!(resp.status(), 200);
    let headers = resp.headers();
    assert_eq!(headers["x-content-type-options"], "nosniff");
    assert_eq!(headers["x-frame-options"], "DENY");
    assert!(headers.contains_key("content-security-policy"));
    assert_eq!(headers["alt-svc"], format!("h3=\":{port}\"; ma=86400"));
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "ok");

    running.stop().await;
}

#[tokio::test]
async fn test_http3_rejects_oversized_body() {
    let running = start(local_config().with_max_message_size(64));
    let mut client = h3_client(running.addr).await;

    let (resp, _) = client
        .send(h3_request(Method::POST, "/v1/health"), Bytes::from(vec![b'x'; 256]))
        .await;
    assert_eq!(resp.status(), 413);

    running.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_http3_with_no_error() {
    let running = start(local_config());
    let mut client = h3_client(running.addr).await;
    let (resp, _) = client.send(h3_request(Method::GET, "/v1/health"), Bytes::new()).await;
    assert_eq!(resp.status(), 200);

    running.stop().await;
    assert_eq!(close_code(&client.conn).await, u64::from(H3_NO_ERROR));
}
