//! Error types and JSON-RPC error codes for the MCP server.

use face_auth::AuthError;

use super::message::{JsonRpcError, RequestId};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// Server-specific error codes.
pub mod mcp_error_codes {
    pub const TOOL_NOT_FOUND: i32 = -32803;
    pub const NOT_ENROLLED: i32 = -32850;
    pub const LOGIN_SESSION_NOT_FOUND: i32 = -32851;
    pub const FACE_AUTH_ERROR: i32 = -32852;
    /// Missing or invalid bearer token.
    pub const UNAUTHORIZED: i32 = -32900;
}

#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("User not enrolled: {0}")]
    NotEnrolled(String),

    #[error("Login session not found: {0}")]
    LoginSessionNotFound(String),

    #[error("Face auth error: {0}")]
    FaceAuth(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unauthorized")]
    Unauthorized,
}

impl McpError {
    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) | McpError::Json(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) => INVALID_PARAMS,
            McpError::InternalError(_) | McpError::Transport(_) | McpError::Io(_) => {
                INTERNAL_ERROR
            }
            McpError::ToolNotFound(_) => TOOL_NOT_FOUND,
            McpError::NotEnrolled(_) => NOT_ENROLLED,
            McpError::LoginSessionNotFound(_) => LOGIN_SESSION_NOT_FOUND,
            McpError::FaceAuth(_) => FACE_AUTH_ERROR,
            McpError::Unauthorized => UNAUTHORIZED,
        }
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        JsonRpcError::new(id, self.code(), self.to_string())
    }
}

impl From<AuthError> for McpError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::NotEnrolled(user) => McpError::NotEnrolled(user),
            e if e.is_decode() => McpError::InvalidParams(e.to_string()),
            AuthError::InvalidInput(_)
            | AuthError::InvalidUser { .. }
            | AuthError::InvalidTransition { .. } => McpError::InvalidParams(e.to_string()),
            other => McpError::FaceAuth(other.to_string()),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;
