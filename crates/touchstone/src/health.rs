//! Health check, served as `GET /v1/health` and as the `health` tool.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use kit::middleware::{cancellable, logging};
use kit::{chain, BoxError, Endpoint, RequestContext};
use mcp::{decode_json, Tool, ToolServer};
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Deserialize)]
pub struct HealthRequest {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub transport: String,
}

pub type HealthEndpoint = Endpoint<HealthRequest, HealthResponse>;

pub fn endpoint() -> HealthEndpoint {
    let inner = Endpoint::new(|ctx: RequestContext, _req: HealthRequest| async move {
        Ok::<_, BoxError>(HealthResponse {
            status: "ok".into(),
            transport: ctx.transport().as_str().into(),
        })
    });
    chain(logging("health"), [cancellable()]).wrap(inner)
}

pub fn router(health: HealthEndpoint) -> Router {
    Router::new()
        .route("/v1/health", get(http_health))
        .with_state(health)
}

async fn http_health(State(health): State<HealthEndpoint>) -> Response {
    match health.call(RequestContext::new(), HealthRequest::default()).await {
        Ok(resp) => Json(resp).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

pub fn register_tool(tools: &ToolServer, health: HealthEndpoint) {
    tools.add_endpoint_tool(
        Tool::new("health", "Reports server health and the transport the call arrived on"),
        health,
        decode_json::<HealthRequest>(),
    );
}
