use std::fmt;

use tokio_util::sync::CancellationToken;

/// Transport a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Transport {
    #[default]
    Http,
    McpQuic,
}

impl Transport {
    pub const fn as_str(self) -> &'static str {
        match self {
            Transport::Http => "http",
            Transport::McpQuic => "mcp_quic",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-request metadata handed to every endpoint.
///
/// Cloning is cheap; the cancellation token is shared with the clone, so a
/// connection-scoped context can be handed to each request it serves.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    transport: Option<Transport>,
    user_id: Option<String>,
    handle: Option<String>,
    request_id: Option<String>,
    trace_id: Option<String>,
    session_id: Option<String>,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Transport the request came in on; `Http` when never set.
    pub fn transport(&self) -> Transport {
        self.transport.unwrap_or_default()
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn handle(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Child context whose token is cancelled with ours but can also be cancelled alone.
    pub fn child(&self) -> Self {
        let mut ctx = self.clone();
        ctx.cancellation = self.cancellation.child_token();
        ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_defaults_to_http() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.transport(), Transport::Http);
        assert_eq!(ctx.transport().to_string(), "http");
        assert!(ctx.session_id().is_none());
    }

    #[test]
    fn builder_sets_metadata() {
        let ctx = RequestContext::new()
            .with_transport(Transport::McpQuic)
            .with_user_id("u-1")
            .with_handle("alice")
            .with_request_id("r-9")
            .with_trace_id("t-3")
            .with_session_id("quic_00");

        assert_eq!(ctx.transport(), Transport::McpQuic);
        assert_eq!(ctx.user_id(), Some("u-1"));
        assert_eq!(ctx.handle(), Some("alice"));
        assert_eq!(ctx.request_id(), Some("r-9"));
        assert_eq!(ctx.trace_id(), Some("t-3"));
        assert_eq!(ctx.session_id(), Some("quic_00"));
    }

    #[test]
    fn child_follows_parent_cancellation() {
        let parent = RequestContext::new();
        let child = parent.child();
        let sibling = parent.child();

        child.cancellation().cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        parent.cancellation().cancel();
        assert!(sibling.is_cancelled());
    }
}
