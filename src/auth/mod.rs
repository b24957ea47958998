//! Session state and lifecycle.
//!
//! This module provides:
//! - `Session` / `User`: the durable record of an authenticated principal
//! - `SessionManager`: the lifecycle state machine with silent renewal and
//!   inactivity eviction
//!
//! Sessions are persisted through an injected [`SessionStore`](crate::store::SessionStore)
//! and renewed one minute before expiry by default.

pub mod manager;
pub mod session;

pub use manager::{SessionManager, SessionState};
pub use session::{Session, User};
