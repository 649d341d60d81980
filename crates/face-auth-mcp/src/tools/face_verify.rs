//! The `face_verify` tool: 1:1 check of a capture against a user's template.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, ImageArg};

#[derive(Debug, Deserialize)]
struct VerifyParams {
    user_id: String,
    image: ImageArg,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_verify".to_string(),
        description: "Verify a live capture against the user's enrolled face and expression".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "image": image_arg::schema("Live capture")
            },
            "required": ["user_id", "image"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: VerifyParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let bytes = params.image.bytes()?;

    let session = session.lock().await;
    let outcome = session.authenticator().verify(&params.user_id, &bytes)?;
    Ok(ToolCallResult::json(&outcome))
}
