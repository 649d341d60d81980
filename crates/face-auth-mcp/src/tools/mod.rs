//! MCP tool implementations.

pub mod face_analyze;
pub mod face_capability;
pub mod face_enroll;
pub mod face_identify;
pub mod face_match;
pub mod face_remove;
pub mod face_status;
pub mod face_verify;
pub mod image_arg;
pub mod login_facial;
pub mod login_start;
pub mod registry;
pub mod stream_frame;

pub use registry::ToolRegistry;
