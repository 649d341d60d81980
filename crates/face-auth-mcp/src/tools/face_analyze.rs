//! The `face_analyze` tool: expression analysis without storing anything.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, ImageArg};

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    image: ImageArg,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_analyze".to_string(),
        description: "Detect a face and report its dominant expression and per-expression scores"
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": { "image": image_arg::schema("Capture to analyse") },
            "required": ["image"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: AnalyzeParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let bytes = params.image.bytes()?;

    let session = session.lock().await;
    let analysis = session.authenticator().analyze(&bytes)?;
    Ok(ToolCallResult::json(&analysis))
}
