//! HTTP transport: JSON-RPC over POST /mcp behind an optional bearer token, plus /health.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};

use crate::protocol::ProtocolHandler;
use crate::types::{mcp_error_codes, error_codes, McpError, McpResult};

pub struct ServerState {
    pub token: Option<String>,
    pub handler: Arc<ProtocolHandler>,
}

pub struct SseTransport {
    state: Arc<ServerState>,
}

fn rpc_error(status: StatusCode, code: i32, message: &str) -> Response {
    (
        status,
        AxumJson(json!({
            "jsonrpc": "2.0",
            "id": null,
            "error": { "code": code, "message": message }
        })),
    )
        .into_response()
}

impl SseTransport {
    pub fn new(handler: ProtocolHandler, token: Option<String>) -> Self {
        Self {
            state: Arc::new(ServerState {
                token,
                handler: Arc::new(handler),
            }),
        }
    }

    pub fn router(&self) -> Router {
        let state = self.state.clone();
        Router::new()
            .route("/mcp", post(handle_request))
            .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
            .route("/health", get(handle_health))
            .with_state(state)
    }

    pub async fn run(&self, addr: &str) -> McpResult<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        if self.state.token.is_none() {
            tracing::warn!("HTTP transport has no bearer token; any client on {addr} can call tools");
        }
        tracing::info!("HTTP transport listening on {addr}");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| McpError::Transport(e.to_string()))
    }
}

/// Bearer check for /mcp. /health is routed outside this layer.
async fn auth_layer(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    request: axum::extract::Request,
    next: middleware::Next,
) -> Response {
    if let Some(expected) = &state.token {
        let authorized = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected);
        if !authorized {
            return rpc_error(
                StatusCode::UNAUTHORIZED,
                mcp_error_codes::UNAUTHORIZED,
                "Unauthorized",
            );
        }
    }
    next.run(request).await
}

async fn handle_request(
    State(state): State<Arc<ServerState>>,
    AxumJson(body): AxumJson<Value>,
) -> Response {
    let msg: crate::types::JsonRpcMessage = match serde_json::from_value(body) {
        Ok(msg) => msg,
        Err(_) => return rpc_error(StatusCode::BAD_REQUEST, error_codes::PARSE_ERROR, "Parse error"),
    };
    match state.handler.handle_message(msg).await {
        Some(response) => AxumJson(response).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn handle_health(State(state): State<Arc<ServerState>>) -> AxumJson<Value> {
    let session = state.handler.session().lock().await;
    AxumJson(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "extractor": session.capability().kind,
        "degraded": session.capability().degraded,
    }))
}
