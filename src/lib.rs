//! sessiondeck - client-side session management for task-dashboard front ends.
//!
//! The crate owns the authentication lifecycle a dashboard UI builds on:
//! exchanging credentials for tokens, persisting the session, silently
//! renewing the access token before it expires, evicting idle sessions,
//! and recovering from unauthorized responses with a single
//! refresh-and-retry.
//!
//! The moving parts:
//! - [`store::SessionStore`]: durable key/value persistence (memory, file,
//!   or OS keychain backends)
//! - [`auth::SessionManager`]: the lifecycle state machine and timers
//! - [`api::HttpAuthClient`]: the login and refresh exchanges
//! - [`api::ApiGateway`]: authenticated REST calls with the 401 policy
//!
//! ```no_run
//! use std::sync::Arc;
//! use sessiondeck::api::{ApiGateway, Credentials, HttpAuthClient, HttpTransport, RequestSpec};
//! use sessiondeck::auth::SessionManager;
//! use sessiondeck::config::SessionPolicy;
//! use sessiondeck::store::FileStore;
//!
//! # async fn run() -> Result<(), sessiondeck::error::AuthError> {
//! let store = Arc::new(FileStore::for_app("taskdeck")?);
//! let client = Arc::new(HttpAuthClient::new("https://api.example.com/api")?);
//! let session = SessionManager::new(store, client, SessionPolicy::default());
//!
//! if !session.resume().await? {
//!     session
//!         .login(Credentials {
//!             identifier: "alice".into(),
//!             secret: "hunter2".into(),
//!         })
//!         .await?;
//! }
//!
//! let transport = Arc::new(HttpTransport::new("https://api.example.com/api")?);
//! let gateway = ApiGateway::new(transport, session.clone());
//! let tasks = gateway.send(&RequestSpec::get("/tasks/")).await?;
//! # let _ = tasks;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod store;

#[cfg(test)]
pub(crate) mod testutil;

pub use api::{ApiGateway, Credentials, HttpAuthClient, HttpTransport, RequestSpec};
pub use auth::{Session, SessionManager, SessionState, User};
pub use config::SessionPolicy;
pub use error::AuthError;
pub use store::{FileStore, KeyringStore, MemoryStore, SessionStore};
