//! The `face_remove` tool: delete a user's template and reference image.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

#[derive(Debug, Deserialize)]
struct RemoveParams {
    user_id: String,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_remove".to_string(),
        description: "Remove a user's facial enrollment".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "user_id": { "type": "string" } },
            "required": ["user_id"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: RemoveParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let session = session.lock().await;
    let removed = session.authenticator().remove(&params.user_id)?;
    Ok(ToolCallResult::json(&json!({
        "user_id": params.user_id,
        "removed": removed,
    })))
}
