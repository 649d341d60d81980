//! The `login_start` tool: begin a two-step login after the password check.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

#[derive(Debug, Deserialize)]
struct LoginStartParams {
    user_id: String,
    password_ok: bool,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "login_start".to_string(),
        description: "Start a login with the result of the password check. Enrolled users receive a \
         facial challenge; others are authenticated on the password alone."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string" },
                "password_ok": { "type": "boolean", "description": "Whether the password matched" }
            },
            "required": ["user_id", "password_ok"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: LoginStartParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;

    let mut session = session.lock().await;
    let step = session.start_login(&params.user_id, params.password_ok)?;
    Ok(ToolCallResult::json(&step))
}
