//! The `face_identify` tool: find enrolled users whose face matches a capture.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, threshold_or, ImageArg};

#[derive(Debug, Deserialize)]
struct IdentifyParams {
    image: ImageArg,
    #[serde(default)]
    threshold: Option<f32>,
    #[serde(default)]
    max_results: Option<usize>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_identify".to_string(),
        description: "Identify a face among all enrolled users".to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image": image_arg::schema("Probe capture"),
                "threshold": { "type": "number", "minimum": 0, "maximum": 1 },
                "max_results": { "type": "integer", "minimum": 1 }
            },
            "required": ["image"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: IdentifyParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let bytes = params.image.bytes()?;

    let session = session.lock().await;
    let auth = session.authenticator();
    let threshold = threshold_or(params.threshold, auth.engine().policy().threshold)?;
    let mut matches = auth.identify(&bytes, threshold)?;
    if let Some(max) = params.max_results {
        matches.truncate(max);
    }

    Ok(ToolCallResult::json(&json!({
        "threshold": threshold,
        "count": matches.len(),
        "matches": matches,
    })))
}
