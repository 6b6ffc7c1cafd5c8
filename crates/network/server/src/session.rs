//! Server-side state of one custom-protocol connection.
//!
//! The read loop never writes. Replies and the notification drain task are
//! the only writers and take turns through `writer`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mcp::{ClientSession, JsonRpcNotification};
use network_shared::codec::{encode_line, FrameError};
use network_shared::{SessionId, NOTIFICATION_QUEUE_CAPACITY};
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

pub struct McpSession<W> {
    id: SessionId,
    notifications: mpsc::Sender<JsonRpcNotification>,
    initialized: AtomicBool,
    writer: Mutex<W>,
    max_message_size: usize,
}

impl<W> McpSession<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Returns the session and the receiving end of its notification queue.
    pub fn new(
        id: SessionId,
        writer: W,
        max_message_size: usize,
    ) -> (Arc<Self>, mpsc::Receiver<JsonRpcNotification>) {
        let (tx, rx) = mpsc::channel(NOTIFICATION_QUEUE_CAPACITY);
        let session = Arc::new(Self {
            id,
            notifications: tx,
            initialized: AtomicBool::new(false),
            writer: Mutex::new(writer),
            max_message_size,
        });
        (session, rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Writes one message as a single line under the write lock.
    pub async fn write_message<T>(&self, message: &T) -> Result<(), FrameError>
    where
        T: Serialize + ?Sized,
    {
        let line = encode_line(message, self.max_message_size)?;
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Exclusive access to the stream writer, e.g. to finish or reset it.
    pub async fn lock_writer(&self) -> tokio::sync::MutexGuard<'_, W> {
        self.writer.lock().await
    }
}

impl<W> ClientSession for McpSession<W>
where
    W: Send,
{
    fn session_id(&self) -> &str {
        self.id.as_str()
    }

    fn notification_sender(&self) -> mpsc::Sender<JsonRpcNotification> {
        self.notifications.clone()
    }

    fn initialize(&self) {
        self.initialized.store(true, Ordering::Release);
    }

    fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }
}

/// Writes queued notifications until `cancel` fires or the stream breaks.
///
/// A notification that cannot be encoded is dropped; notifications are best effort.
pub async fn drain_notifications<W>(
    session: Arc<McpSession<W>>,
    mut queue: mpsc::Receiver<JsonRpcNotification>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let notification = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.recv() => match next {
                Some(n) => n,
                None => break,
            },
        };
        match session.write_message(&notification).await {
            Ok(()) => {}
            Err(FrameError::Io(err)) => {
                tracing::debug!(
                    target: "network::session",
                    session = %session.id(),
                    error = %err,
                    "notification write failed, stopping drain"
                );
                break;
            }
            Err(err) => {
                tracing::warn!(
                    target: "network::session",
                    session = %session.id(),
                    method = %notification.method,
                    error = %err,
                    "dropping notification"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use network_shared::LineReader;
    use serde_json::{json, Value};
    use tokio::io::duplex;

    #[tokio::test]
    async fn initialized_flag_starts_false() {
        let (w, _r) = duplex(64);
        let (session, _rx) = McpSession::new(SessionId::new_quic(), w, 1024);
        assert!(!session.initialized());
        session.initialize();
        assert!(session.initialized());
        assert!(session.session_id().starts_with("quic_"));
    }

    #[tokio::test]
    async fn drains_queued_notifications_as_lines() {
        let (w, r) = duplex(64 * 1024);
        let (session, rx) = McpSession::new(SessionId::new_quic(), w, 1024);
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(drain_notifications(session.clone(), rx, cancel.clone()));

        let tx = session.notification_sender();
        tx.send(JsonRpcNotification::new("notifications/message", Some(json!({"n": 1}))))
            .await
            .unwrap();
        tx.send(JsonRpcNotification::new("notifications/message", Some(json!({"n": 2}))))
            .await
            .unwrap();

        let mut reader = LineReader::new(r, 1024);
        for n in 1..=2 {
            let line = reader.next_line().await.unwrap().unwrap();
            let v: Value = serde_json::from_slice(&line).unwrap();
            assert_eq!(v["params"]["n"], n);
        }

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_notification_is_dropped_not_fatal() {
        let (w, r) = duplex(64 * 1024);
        let (session, rx) = McpSession::new(SessionId::new_quic(), w, 128);
        let cancel = CancellationToken::new();
        let drain = tokio::spawn(drain_notifications(session.clone(), rx, cancel.clone()));

        let tx = session.notification_sender();
        tx.send(JsonRpcNotification::new("big", Some(json!("x".repeat(512)))))
            .await
            .unwrap();
        tx.send(JsonRpcNotification::new("small", None)).await.unwrap();

        let mut reader = LineReader::new(r, 1024);
        let line = reader.next_line().await.unwrap().unwrap();
        let v: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(v["method"], "small");

        cancel.cancel();
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn queue_is_bounded() {
        let (w, _r) = duplex(64);
        let (session, _rx) = McpSession::new(SessionId::new_quic(), w, 1024);
        let tx = session.notification_sender();
        for _ in 0..NOTIFICATION_QUEUE_CAPACITY {
            tx.try_send(JsonRpcNotification::new("n", None)).unwrap();
        }
        assert!(tx.try_send(JsonRpcNotification::new("n", None)).is_err());
    }
}
