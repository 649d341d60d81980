//! The `stream_frame` tool: feed frames of a live capture stream.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, ImageArg};

#[derive(Debug, Deserialize)]
struct StreamFrameParams {
    #[serde(default)]
    stream_id: Option<String>,
    #[serde(default)]
    image: Option<ImageArg>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    end: bool,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "stream_frame".to_string(),
        description: "Analyse one frame of a capture stream. Omit stream_id to open a stream. Frames are \
         analysed once enough consecutive frames contain a face; with user_id each analysed \
         frame is also verified. Set end=true to close the stream."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "stream_id": { "type": "string" },
                "image": image_arg::schema("Frame"),
                "user_id": { "type": "string", "description": "Verify analysed frames against this user" },
                "end": { "type": "boolean", "default": false }
            }
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: StreamFrameParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    if params.end {
        let stream_id = params
            .stream_id
            .ok_or_else(|| McpError::InvalidParams("stream_id is required to end a stream".to_string()))?;
        let closed = session.lock().await.end_stream(&stream_id);
        return Ok(ToolCallResult::json(&json!({
            "stream_id": stream_id,
            "closed": closed,
        })));
    }

    let image = params
        .image
        .ok_or_else(|| McpError::InvalidParams("image is required".to_string()))?;
    let bytes = image.bytes()?;

    let mut session = session.lock().await;
    let (stream_id, report) = session.stream_frame(
        params.stream_id.as_deref(),
        &bytes,
        params.user_id.as_deref(),
    )?;

    let mut result = serde_json::to_value(&report)?;
    result["stream_id"] = json!(stream_id);
    Ok(ToolCallResult::json(&result))
}
