//! The `face_enroll` tool: store a user's facial template and expression.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde::Deserialize;
use serde_json::{json, Value};

use face_auth::Expression;

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::image_arg::{self, ImageArg};

#[derive(Debug, Deserialize)]
struct EnrollParams {
    user_id: String,
    image: ImageArg,
    #[serde(default)]
    expression: Option<String>,
}

pub fn definition() -> ToolDefinition {
    ToolDefinition {
        name: "face_enroll".to_string(),
        description: "Enroll or re-enroll a user's face. The detected expression becomes the one to \
         reproduce at login unless `expression` overrides it."
            .to_string(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "user_id": { "type": "string", "description": "Account identifier" },
                "image": image_arg::schema("Enrollment capture"),
                "expression": {
                    "type": "string",
                    "enum": Expression::ALL.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
                    "description": "Expression to require instead of the detected one"
                }
            },
            "required": ["user_id", "image"]
        }),
    }
}

pub async fn execute(
    args: Value,
    session: &Arc<Mutex<AuthSessionManager>>,
) -> McpResult<ToolCallResult> {
    let params: EnrollParams =
        serde_json::from_value(args).map_err(|e| McpError::InvalidParams(e.to_string()))?;
    let expression = params
        .expression
        .as_deref()
        .map(str::parse::<Expression>)
        .transpose()?;
    let bytes = params.image.bytes()?;

    let session = session.lock().await;
    let receipt = session
        .authenticator()
        .enroll(&params.user_id, &bytes, expression)?;
    Ok(ToolCallResult::json(&receipt))
}
