//! FaceAuth MCP server: exposes enrollment, verification and two-step login as MCP tools.

pub mod config;
pub mod protocol;
pub mod session;
pub mod tools;
pub mod transport;
pub mod types;

pub use config::{load_engine_config, resolve_config_path};
pub use protocol::ProtocolHandler;
pub use session::AuthSessionManager;
pub use transport::StdioTransport;
