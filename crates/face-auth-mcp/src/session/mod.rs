//! Authenticator ownership and per-client login and stream state.

pub mod manager;

pub use manager::{AuthSessionManager, ImageSource, LoginStep};
