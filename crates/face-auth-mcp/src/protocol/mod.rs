//! JSON-RPC dispatch for the MCP methods the server supports.

pub mod handler;

pub use handler::ProtocolHandler;
