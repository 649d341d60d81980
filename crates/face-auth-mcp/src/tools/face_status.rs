//! The `face_status` tool: enrollment status, optionally with the stored record.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

#[derive(Debug, Deserialize)]
struct StatusParams {
    #[serde(default)]
    user_id: Option<String>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_status".to_string(),
        description: "Enrollment status for a user, or the list of enrolled users when user_id is omitted"
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" }
            }
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: StatusParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let session = session.lock().await;
    let auth = session.authenticator();
    match params.user_id {
        Some(user_id) => {
            let status = auth.status(&user_id)?;
            Ok(ToolCallResult::json(&json!({
                "user_id": user_id,
                "enrolled": status.enrolled,
                "expression": status.expression,
            })))
        }
        None => {
            let users: Vec<Value> = auth
                .templates()
                .list()?
                .into_iter()
                .map(|record| {
                    json!({
                        "user_id": record.user_id,
                        "expression": record.expression,
                        "extractor": record.observation.extractor,
                        "updated_at": record.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            Ok(ToolCallResult::json(&json!({
                "count": users.len(),
                "users": users,
            })))
        }
    }
}
