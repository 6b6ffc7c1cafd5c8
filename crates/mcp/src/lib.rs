//! RPC server side of the custom QUIC protocol.
//!
//! The network layer only talks to an RPC server through [`SessionServer`] and
//! hands it [`ClientSession`]s. [`ToolServer`] is the implementation used by
//! the binary: a JSON-RPC 2.0 tool server in the MCP dialect, whose tools are
//! usually [`kit::Endpoint`]s registered via [`ToolServer::add_endpoint_tool`].

pub mod jsonrpc;
pub mod server;
pub mod session;
pub mod tools;

pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcResponse, RpcError};
pub use server::SessionServer;
pub use session::{ClientSession, SessionError};
pub use tools::{decode_json, Content, ServerInfo, Tool, ToolResult, ToolServer};

/// Protocol revision answered to `initialize` when the client does not ask for one.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-03-26";
