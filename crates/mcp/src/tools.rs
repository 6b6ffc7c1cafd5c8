//! Minimal MCP tool server.
//!
//! Supports `initialize`, `notifications/initialized`, `ping`, `tools/list`
//! and `tools/call`. Anything else is answered with method-not-found.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use kit::{BoxError, Endpoint, RequestContext};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::mpsc::error::TrySendError;

use crate::jsonrpc::{JsonRpcNotification, JsonRpcResponse, RpcError, JSONRPC_VERSION};
use crate::{ClientSession, SessionError, SessionServer, LATEST_PROTOCOL_VERSION};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({ "type": "object" }),
        }
    }

    pub fn with_property(mut self, name: &str, ty: &str, description: &str) -> Self {
        self.input_schema["properties"][name] = json!({
            "type": ty,
            "description": description,
        });
        self
    }

    pub fn with_required(mut self, name: &str) -> Self {
        if !self.input_schema["required"].is_array() {
            self.input_schema["required"] = json!([]);
        }
        if let Some(required) = self.input_schema["required"].as_array_mut() {
            required.push(json!(name));
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: Vec<Content>,
    #[serde(rename = "isError", default)]
    pub is_error: bool,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: false,
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::Text { text: text.into() }],
            is_error: true,
        }
    }

    pub fn first_text(&self) -> Option<&str> {
        self.content.iter().map(|Content::Text { text }| text.as_str()).next()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

type ToolHandler = Arc<dyn Fn(RequestContext, Value) -> BoxFuture<'static, ToolResult> + Send + Sync>;

struct RegisteredTool {
    tool: Tool,
    handler: ToolHandler,
}

/// Thread-safe tool server with its own session table.
pub struct ToolServer {
    info: ServerInfo,
    tools: RwLock<Vec<RegisteredTool>>,
    sessions: RwLock<HashMap<String, Arc<dyn ClientSession>>>,
}

impl ToolServer {
    pub fn new(info: ServerInfo) -> Self {
        Self {
            info,
            tools: RwLock::new(Vec::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Registers a tool; a tool with the same name is replaced.
    pub fn add_tool<F, Fut>(&self, tool: Tool, handler: F)
    where
        F: Fn(RequestContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        let handler: ToolHandler = Arc::new(
            move |ctx: RequestContext, args: Value| -> BoxFuture<'static, ToolResult> {
                handler(ctx, args).boxed()
            },
        );
        let mut tools = self.tools.write().unwrap_or_else(PoisonError::into_inner);
        match tools.iter_mut().find(|t| t.tool.name == tool.name) {
            Some(existing) => {
                existing.tool = tool;
                existing.handler = handler;
            }
            None => tools.push(RegisteredTool { tool, handler }),
        }
    }

    /// Exposes an endpoint as a tool. `decode` turns the call arguments into the
    /// endpoint request; the response is returned as JSON text.
    pub fn add_endpoint_tool<Req, Resp, D>(&self, tool: Tool, endpoint: Endpoint<Req, Resp>, decode: D)
    where
        Req: Send + 'static,
        Resp: Serialize + Send + 'static,
        D: Fn(Value) -> Result<Req, BoxError> + Send + Sync + 'static,
    {
        let decode = Arc::new(decode);
        self.add_tool(tool, move |ctx, args| {
            let endpoint = endpoint.clone();
            let decode = decode.clone();
            async move {
                let req = match decode(args) {
                    Ok(req) => req,
                    Err(err) => return ToolResult::error(format!("invalid arguments: {err}")),
                };
                match endpoint.call(ctx, req).await {
                    Ok(resp) => match serde_json::to_string(&resp) {
                        Ok(text) => ToolResult::text(text),
                        Err(err) => ToolResult::error(format!("marshal: {err}")),
                    },
                    Err(err) => ToolResult::error(err.to_string()),
                }
            }
        });
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|t| t.tool.clone())
            .collect()
    }

    pub fn session_count(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn session(&self, session_id: &str) -> Option<Arc<dyn ClientSession>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Queues a notification for one session without waiting.
    pub fn notify(&self, session_id: &str, notification: JsonRpcNotification) -> Result<(), SessionError> {
        let session = self
            .session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
        match session.notification_sender().try_send(notification) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(
                    target: "mcp::server",
                    session = session_id,
                    method = %dropped.method,
                    "notification queue full, dropping notification"
                );
                Err(SessionError::QueueFull(session_id.to_string()))
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::Closed(session_id.to_string())),
        }
    }

    /// Queues a notification for every initialized session; returns how many accepted it.
    pub fn broadcast(&self, notification: JsonRpcNotification) -> usize {
        let targets: Vec<String> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|s| s.initialized())
            .map(|s| s.session_id().to_string())
            .collect();
        targets
            .iter()
            .filter(|id| self.notify(id, notification.clone()).is_ok())
            .count()
    }

    fn find_handler(&self, name: &str) -> Option<ToolHandler> {
        self.tools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|t| t.tool.name == name)
            .map(|t| t.handler.clone())
    }

    async fn handle_request(
        &self,
        ctx: &RequestContext,
        method: &str,
        params: Option<Value>,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => {
                let requested = params
                    .as_ref()
                    .and_then(|p| p.get("protocolVersion"))
                    .and_then(Value::as_str)
                    .unwrap_or(LATEST_PROTOCOL_VERSION);
                Ok(json!({
                    "protocolVersion": requested,
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": self.info,
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.tools() })),
            "tools/call" => {
                let params = params.unwrap_or(Value::Null);
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| RpcError::invalid_params("missing tool name"))?;
                let handler = self
                    .find_handler(name)
                    .ok_or_else(|| RpcError::invalid_params(format!("unknown tool: {name}")))?;
                let args = match params.get("arguments") {
                    None | Some(Value::Null) => Value::Object(Map::new()),
                    Some(args @ Value::Object(_)) => args.clone(),
                    Some(_) => return Err(RpcError::invalid_params("arguments must be an object")),
                };
                let result = handler(ctx.clone(), args).await;
                serde_json::to_value(result).map_err(|e| RpcError::internal(e.to_string()))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }

    fn handle_notification(&self, ctx: &RequestContext, method: &str) {
        match method {
            "notifications/initialized" => {
                let session = ctx.session_id().and_then(|id| self.session(id));
                match session {
                    Some(session) => session.initialize(),
                    None => tracing::debug!(
                        target: "mcp::server",
                        "initialized notification without a registered session"
                    ),
                }
            }
            other => tracing::debug!(target: "mcp::server", method = other, "ignoring notification"),
        }
    }
}

#[async_trait]
impl SessionServer for ToolServer {
    fn register_session(&self, session: Arc<dyn ClientSession>) -> Result<(), SessionError> {
        let id = session.session_id().to_string();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&id) {
            return Err(SessionError::AlreadyRegistered(id));
        }
        sessions.insert(id.clone(), session);
        tracing::debug!(target: "mcp::server", session = %id, total = sessions.len(), "session registered");
        Ok(())
    }

    fn unregister_session(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.remove(session_id).is_some() {
            tracing::debug!(target: "mcp::server", session = session_id, total = sessions.len(), "session unregistered");
        }
    }

    async fn handle_message(&self, ctx: &RequestContext, message: &[u8]) -> Option<JsonRpcResponse> {
        let value: Value = match serde_json::from_slice(message) {
            Ok(v) => v,
            Err(err) => {
                return Some(JsonRpcResponse::failure(
                    Value::Null,
                    RpcError::parse_error(format!("parse error: {err}")),
                ))
            }
        };
        let Value::Object(mut obj) = value else {
            return Some(JsonRpcResponse::failure(
                Value::Null,
                RpcError::invalid_request("message must be a JSON object"),
            ));
        };

        let id = obj.remove("id");
        let method = match obj.get("method").and_then(Value::as_str) {
            Some(m) => m.to_string(),
            None => {
                if id.is_some() && (obj.contains_key("result") || obj.contains_key("error")) {
                    tracing::debug!(target: "mcp::server", "ignoring response from client");
                    return None;
                }
                return Some(JsonRpcResponse::failure(
                    id.unwrap_or(Value::Null),
                    RpcError::invalid_request("missing method"),
                ));
            }
        };
        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Some(JsonRpcResponse::failure(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("jsonrpc must be \"2.0\""),
            ));
        }
        let params = obj.remove("params");

        match id {
            None => {
                self.handle_notification(ctx, &method);
                None
            }
            Some(id) => Some(match self.handle_request(ctx, &method, params).await {
                Ok(result) => JsonRpcResponse::success(id, result),
                Err(err) => JsonRpcResponse::failure(id, err),
            }),
        }
    }
}

/// Decoder for [`ToolServer::add_endpoint_tool`] that deserializes the arguments as `Req`.
pub fn decode_json<Req>() -> impl Fn(Value) -> Result<Req, BoxError> + Send + Sync + 'static
where
    Req: DeserializeOwned,
{
    |args| serde_json::from_value(args).map_err(BoxError::from)
}
