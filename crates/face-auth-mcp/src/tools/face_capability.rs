//! The `face_capability` tool: which extractor is running and the active decision policy.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpResult, ToolCallResult, ToolDefinition};

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_capability".to_string(),
        description: "Report the face extractor in use, whether it is degraded, and the decision policy"
            .to_string(),
        input_schema: json!({ "type": "object", "properties": {} }),
    }
}

pub async fn execute(
    _args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let session = session.lock().await;
    let auth = session.authenticator();
    Ok(ToolCallResult::json(&json!({
        "capability": session.capability(),
        "policy": auth.engine().policy(),
        "detection_fallback": auth.detection_fallback(),
        "pending_logins": session.login_count(),
        "open_streams": session.stream_count(),
    })))
}
