//! The `face_match` tool: similarity-only lookup among named users.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, threshold_or, ImageArg};

#[derive(Debug, Deserialize)]
struct MatchParams {
    image: ImageArg,
    candidates: Vec<String>,
    #[serde(default)]
    threshold: Option<f32>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_match".to_string(),
        description: "Compare a capture with the templates of the given users. Expressions are ignored; \
         matches are sorted by descending confidence."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "image": image_arg::schema("Probe capture"),
                "candidates": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "User ids to compare against"
                },
                "threshold": { "type": "number", "minimum": 0, "maximum": 1, "description": "Minimum confidence (defaults to the decision threshold)" }
            },
            "required": ["image", "candidates"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: MatchParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let bytes = params.image.bytes()?;

    let session = session.lock().await;
    let auth = session.authenticator();
    let threshold = threshold_or(params.threshold, auth.engine().policy().threshold)?;
    let matches = auth.match_candidates(&bytes, &params.candidates, threshold)?;

    Ok(ToolCallResult::json(&json!({
        "threshold": threshold,
        "count": matches.len(),
        "matches": matches,
    })))
}
