use tokio::sync::mpsc;

use crate::JsonRpcNotification;

/// What an RPC server needs from one connected client.
///
/// Implemented by the transport: the QUIC connection handler creates one per
/// connection, registers it, and drains `notification_sender`'s receiving end.
pub trait ClientSession: Send + Sync {
    fn session_id(&self) -> &str;

    /// Sending half of the session's bounded outbound queue.
    fn notification_sender(&self) -> mpsc::Sender<JsonRpcNotification>;

    /// Marks the session initialized (client sent `notifications/initialized`).
    fn initialize(&self);

    fn initialized(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("session {0} already registered")]
    AlreadyRegistered(String),
    #[error("session {0} not found")]
    NotFound(String),
    #[error("notification queue of session {0} is full")]
    QueueFull(String),
    #[error("session {0} is closed")]
    Closed(String),
}
