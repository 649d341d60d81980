//! Tool registration and dispatch.

use std::sync::Arc;
use tokio::sync::Mutex;

use serde_json::Value;

use crate::session::AuthSessionManager;
use crate::types::{McpError, McpResult, ToolCallResult, ToolDefinition};

use super::{
    face_analyze, face_capability, face_enroll, face_identify, face_match, face_remove,
    face_status, face_verify, login_facial, login_start, stream_frame,
};

pub struct ToolRegistry;

impl ToolRegistry {
    pub fn list_tools() -> Vec<ToolDefinition> {
        vec![
            face_enroll::definition(),
            face_verify::definition(),
            face_match::definition(),
            face_identify::definition(),
            face_analyze::definition(),
            face_status::definition(),
            face_remove::definition(),
            face_capability::definition(),
            login_start::definition(),
            login_facial::definition(),
            stream_frame::definition(),
        ]
    }

    pub async fn call(
        name: &str,
        arguments: Option<Value>,
        session: &Arc<Mutex<AuthSessionManager>>,
    ) -> McpResult<ToolCallResult> {
        let args = arguments.unwrap_or(Value::Object(serde_json::Map::new()));
        tracing::debug!("Tool call: {name}");

        match name {
            "face_enroll" => face_enroll::execute(args, session).await,
            "face_verify" => face_verify::execute(args, session).await,
            "face_match" => face_match::execute(args, session).await,
            "face_identify" => face_identify::execute(args, session).await,
            "face_analyze" => face_analyze::execute(args, session).await,
            "face_status" => face_status::execute(args, session).await,
            "face_remove" => face_remove::execute(args, session).await,
            "face_capability" => face_capability::execute(args, session).await,
            "login_start" => login_start::execute(args, session).await,
            "login_facial" => login_facial::execute(args, session).await,
            "stream_frame" => stream_frame::execute(args, session).await,
            _ => Err(McpError::ToolNotFound(name.to_string())),
        }
    }
}
