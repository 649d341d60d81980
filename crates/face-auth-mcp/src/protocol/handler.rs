//! Request dispatcher: validates JSON-RPC messages and routes them to the tool registry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::session::AuthSessionManager;
use crate::tools::ToolRegistry;
use crate::types::*;

pub struct ProtocolHandler {
    session: Arc<Mutex<AuthSessionManager>>,
    client: Mutex<Option<Implementation>>,
    initialized: AtomicBool,
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>, what: &str) -> McpResult<T> {
    let value =
        params.ok_or_else(|| McpError::InvalidParams(format!("{what} params required")))?;
    serde_json::from_value(value).map_err(|e| McpError::InvalidParams(e.to_string()))
}

fn to_value(value: impl serde::Serialize) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

fn empty() -> Value {
    Value::Object(serde_json::Map::new())
}

fn validate_request(request: &JsonRpcRequest) -> McpResult<()> {
    if request.jsonrpc != JSONRPC_VERSION {
        return Err(McpError::InvalidRequest(format!(
            "Expected jsonrpc version \"{JSONRPC_VERSION}\", got \"{}\"",
            request.jsonrpc
        )));
    }
    if request.method.is_empty() {
        return Err(McpError::InvalidRequest(
            "Method name must not be empty".to_string(),
        ));
    }
    Ok(())
}

impl ProtocolHandler {
    pub fn new(session: Arc<Mutex<AuthSessionManager>>) -> Self {
        Self {
            session,
            client: Mutex::new(None),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &Arc<Mutex<AuthSessionManager>> {
        &self.session
    }

    /// The client that sent `initialize`, if any.
    pub async fn client_info(&self) -> Option<Implementation> {
        self.client.lock().await.clone()
    }

    /// Whether the client has sent `initialized`.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Handle one inbound message. Notifications produce no response.
    pub async fn handle_message(&self, msg: JsonRpcMessage) -> Option<Value> {
        match msg {
            JsonRpcMessage::Request(req) => Some(self.handle_request(req).await),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif);
                None
            }
            _ => {
                tracing::warn!("Ignoring response-type message from client");
                None
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> Value {
        let id = request.id.clone();
        let result = match validate_request(&request) {
            Ok(()) => self.dispatch_request(request).await,
            Err(e) => Err(e),
        };

        let response = match result {
            Ok(value) => serde_json::to_value(JsonRpcResponse::new(id, value)),
            Err(e) => {
                tracing::debug!("Request failed: {e}");
                serde_json::to_value(e.to_json_rpc_error(id))
            }
        };
        response.unwrap_or_default()
    }

    async fn dispatch_request(&self, request: JsonRpcRequest) -> McpResult<Value> {
        match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "shutdown" => self.handle_shutdown().await,
            "tools/list" => to_value(ToolListResult {
                tools: ToolRegistry::list_tools(),
            }),
            "tools/call" => {
                let call: ToolCallParams = parse_params(request.params, "Tool call")?;
                let result = ToolRegistry::call(&call.name, call.arguments, &self.session).await?;
                to_value(result)
            }
            "ping" => Ok(empty()),
            _ => Err(McpError::MethodNotFound(request.method)),
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            "initialized" | "notifications/initialized" => {
                self.initialized.store(true, Ordering::Release);
                tracing::info!("MCP handshake complete");
            }
            "notifications/cancelled" | "$/cancelRequest" => {
                tracing::info!("Received cancellation notification");
            }
            other => tracing::debug!("Unknown notification: {other}"),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = parse_params(params, "Initialize")?;
        if params.protocol_version != MCP_VERSION {
            tracing::warn!(
                "Client requested protocol version {}, server supports {}. Proceeding with server version.",
                params.protocol_version,
                MCP_VERSION
            );
        }
        tracing::info!(
            "Initialized with client: {} v{}",
            params.client_info.name,
            params.client_info.version
        );
        *self.client.lock().await = Some(params.client_info);
        to_value(InitializeResult::default_result())
    }

    async fn handle_shutdown(&self) -> McpResult<Value> {
        let session = self.session.lock().await;
        tracing::info!(
            "Shutdown requested with {} pending login(s) and {} open stream(s)",
            session.login_count(),
            session.stream_count()
        );
        Ok(empty())
    }
}
