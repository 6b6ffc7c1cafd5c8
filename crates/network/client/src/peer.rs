//! JSON-RPC request/response correlation over one line-framed stream.
//!
//! Transport-independent so it can run over an in-memory duplex in tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use mcp::jsonrpc::JsonRpcRequest;
use mcp::{JsonRpcNotification, JsonRpcResponse};
use network_shared::codec::write_line;
use network_shared::LineReader;
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::error::{ClientError, ClientResult};

#[derive(Default)]
struct Pending {
    closed: bool,
    waiters: HashMap<u64, oneshot::Sender<JsonRpcResponse>>,
}

#[derive(Clone, Default)]
struct PendingTable(Arc<Mutex<Pending>>);

impl PendingTable {
    fn insert(&self, id: u64) -> Option<oneshot::Receiver<JsonRpcResponse>> {
        let mut pending = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.closed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        pending.waiters.insert(id, tx);
        Some(rx)
    }

    fn remove(&self, id: u64) -> Option<oneshot::Sender<JsonRpcResponse>> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .remove(&id)
    }

    /// Fails every outstanding request and refuses new ones.
    fn close(&self) {
        let mut pending = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        pending.closed = true;
        pending.waiters.clear();
    }
}

/// Client half of a JSON-RPC conversation.
pub struct RpcPeer<W> {
    writer: tokio::sync::Mutex<W>,
    pending: PendingTable,
    next_id: AtomicU64,
    notifications: tokio::sync::Mutex<mpsc::Receiver<JsonRpcNotification>>,
    reader: JoinHandle<()>,
    timeout: Duration,
    max_message_size: usize,
}

impl<W> RpcPeer<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Spawns the reader task on `reader`; requests go out on `writer`.
    pub fn new<R>(reader: R, writer: W, timeout: Duration, max_message_size: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let pending = PendingTable::default();
        let (notify_tx, notify_rx) = mpsc::channel(network_shared::NOTIFICATION_QUEUE_CAPACITY);
        let reader = tokio::spawn(read_loop(
            LineReader::new(reader, max_message_size),
            pending.clone(),
            notify_tx,
        ));
        Self {
            writer: tokio::sync::Mutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
            notifications: tokio::sync::Mutex::new(notify_rx),
            reader,
            timeout,
            max_message_size,
        }
    }

    /// Sends a request and waits for the response with the same id.
    pub async fn request(&self, method: &str, params: Option<Value>) -> ClientResult<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.pending.insert(id).ok_or(ClientError::Closed)?;
        if let Err(err) = self.send(&JsonRpcRequest::new(id, method, params)).await {
            self.pending.remove(id);
            return Err(err);
        }

        let response = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(response)) => response,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                self.pending.remove(id);
                return Err(ClientError::Timeout(self.timeout));
            }
        };
        match response.error {
            Some(err) => Err(ClientError::Rpc(err)),
            None => Ok(response.result.unwrap_or(Value::Null)),
        }
    }

    /// Sends a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()> {
        self.send(&JsonRpcNotification::new(method, params)).await
    }

    async fn send<T: Serialize>(&self, message: &T) -> ClientResult<()> {
        let mut writer = self.writer.lock().await;
        write_line(&mut *writer, message, self.max_message_size).await?;
        Ok(())
    }

    /// Next server-initiated notification; `None` once the stream ended.
    pub async fn next_notification(&self) -> Option<JsonRpcNotification> {
        self.notifications.lock().await.recv().await
    }

    pub(crate) async fn lock_writer(&self) -> tokio::sync::MutexGuard<'_, W> {
        self.writer.lock().await
    }
}

impl<W> Drop for RpcPeer<W> {
    fn drop(&mut self) {
        self.reader.abort();
        self.pending.close();
    }
}

async fn read_loop<R>(
    mut reader: LineReader<R>,
    pending: PendingTable,
    notifications: mpsc::Sender<JsonRpcNotification>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let line = match reader.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                tracing::debug!(target: "network::client", "server closed the stream");
                break;
            }
            Err(err) => {
                tracing::warn!(target: "network::client", error = %err, "read failed");
                break;
            }
        };
        dispatch(&line, &pending, &notifications);
    }
    pending.close();
}

fn dispatch(line: &[u8], pending: &PendingTable, notifications: &mpsc::Sender<JsonRpcNotification>) {
    let value: Value = match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!(target: "network::client", error = %err, "unparseable message from server");
            return;
        }
    };

    let is_response = value.get("result").is_some() || value.get("error").is_some();
    if is_response {
        let response: JsonRpcResponse = match serde_json::from_value(value) {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(target: "network::client", error = %err, "malformed response");
                return;
            }
        };
        let Some(id) = response.id.as_u64() else {
            tracing::warn!(target: "network::client", id = %response.id, "response without numeric id");
            return;
        };
        match pending.remove(id) {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => tracing::debug!(target: "network::client", id, "response for unknown or expired request"),
        }
        return;
    }

    if value.get("id").is_none() && value.get("method").is_some() {
        match serde_json::from_value::<JsonRpcNotification>(value) {
            Ok(notification) => match notifications.try_send(notification) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(n)) => {
                    tracing::warn!(target: "network::client", method = %n.method, "notification queue full, dropping");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            },
            Err(err) => tracing::warn!(target: "network::client", error = %err, "malformed notification"),
        }
        return;
    }

    tracing::debug!(target: "network::client", "ignoring server-initiated request");
}
