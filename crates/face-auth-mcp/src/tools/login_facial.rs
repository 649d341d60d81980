//! The `login_facial` tool: answer the facial challenge of a pending login.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, ImageArg};

#[derive(Debug, Deserialize)]
struct LoginFacialParams {
    session_id: String,
    image: ImageArg,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "login_facial".to_string(),
        description: "Submit a live capture for a login's facial challenge".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "session_id": { "type": "string", "description": "From login_start" },
                "image": image_arg::schema("Live capture")
            },
            "required": ["session_id", "image"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: LoginFacialParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let bytes = params.image.bytes()?;

    let mut session = session.lock().await;
    let step = session.facial_login(&params.session_id, &bytes)?;
    Ok(ToolCallResult::json(&step))
}
