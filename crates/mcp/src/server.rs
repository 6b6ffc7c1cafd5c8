use std::sync::Arc;

use async_trait::async_trait;
use kit::RequestContext;

use crate::{ClientSession, JsonRpcResponse, SessionError};

/// Collaborator boundary between the network layer and an RPC server.
///
/// Implementations keep their own session table and must be safe to call
/// from many connections at once.
#[async_trait]
pub trait SessionServer: Send + Sync + 'static {
    fn register_session(&self, session: Arc<dyn ClientSession>) -> Result<(), SessionError>;

    /// Idempotent; unknown ids are ignored.
    fn unregister_session(&self, session_id: &str);

    /// Decorates the connection context once per session.
    fn session_context(&self, ctx: RequestContext, session: &dyn ClientSession) -> RequestContext {
        ctx.with_session_id(session.session_id())
    }

    /// Handles one raw inbound message. `None` means nothing is sent back
    /// (notifications, or responses to server-initiated requests).
    async fn handle_message(&self, ctx: &RequestContext, message: &[u8]) -> Option<JsonRpcResponse>;
}
