//! Transports carrying JSON-RPC to the protocol handler.

pub mod framing;
#[cfg(feature = "sse")]
pub mod sse;
pub mod stdio;

#[cfg(feature = "sse")]
pub use sse::SseTransport;
pub use stdio::StdioTransport;
