//! Durable session storage.
//!
//! A `SessionStore` is the single shared mutable resource of the subsystem.
//! All writes go through the lifecycle manager; readers get a reconstructed
//! [`Session`](crate::auth::Session) or nothing. Three backends are provided:
//!
//! - [`MemoryStore`]: process-local, used by tests and ephemeral consumers
//! - [`FileStore`]: a JSON file in an application cache directory
//! - [`KeyringStore`]: the whole record as an OS keychain secret
//!
//! All backends are synchronous from the caller's perspective; there is no
//! network I/O at this layer.

pub mod file;
pub mod keyring;
pub mod memory;

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use tracing::warn;

use crate::auth::Session;
use crate::error::AuthError;

pub use file::FileStore;
pub use keyring::KeyringStore;
pub use memory::MemoryStore;

// Logical key layout shared by every backend. Storage-backend-agnostic:
// the same keys appear as JSON object fields or keychain record fields.
pub(crate) const ACCESS_TOKEN_KEY: &str = "access_token";
pub(crate) const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub(crate) const USER_KEY: &str = "user";
pub(crate) const SESSION_EXPIRY_KEY: &str = "session_expiry";
pub(crate) const LAST_ACTIVITY_KEY: &str = "last_activity";

/// Durable key/value storage for session state.
///
/// `load` never fails for merely-absent data. Corrupt-but-present data is
/// cleared by the implementation and reported as absent, so every caller
/// starts from a clean slate.
pub trait SessionStore: Send + Sync {
    /// Atomically persist all session fields. A session with missing
    /// required fields is rejected with `InvalidSessionData` and nothing
    /// is written.
    fn save(&self, session: &Session) -> Result<(), AuthError>;

    /// Reconstruct the stored session, if any.
    fn load(&self) -> Result<Option<Session>, AuthError>;

    /// Remove all session keys. Idempotent; safe when already empty.
    fn clear(&self) -> Result<(), AuthError>;
}

/// Flatten a session into the logical key layout, validating required
/// fields first so a reject leaves no partial write behind.
pub(crate) fn encode_record(session: &Session) -> Result<HashMap<String, String>, AuthError> {
    if session.access_token.is_empty() {
        return Err(AuthError::InvalidSessionData("access token"));
    }
    if session.user.username.is_empty() {
        return Err(AuthError::InvalidSessionData("user"));
    }
    let user_json = serde_json::to_string(&session.user)
        .map_err(|_| AuthError::InvalidSessionData("user"))?;

    let mut record = HashMap::new();
    record.insert(ACCESS_TOKEN_KEY.to_string(), session.access_token.clone());
    if let Some(ref refresh) = session.refresh_token {
        record.insert(REFRESH_TOKEN_KEY.to_string(), refresh.clone());
    }
    record.insert(USER_KEY.to_string(), user_json);
    record.insert(
        SESSION_EXPIRY_KEY.to_string(),
        session.expires_at.timestamp_millis().to_string(),
    );
    record.insert(
        LAST_ACTIVITY_KEY.to_string(),
        session.last_activity.timestamp_millis().to_string(),
    );
    Ok(record)
}

/// Rebuild a session from the logical key layout. `None` means the record
/// is structurally unusable and should be treated as corrupt.
pub(crate) fn decode_record(record: &HashMap<String, String>) -> Option<Session> {
    let access_token = record.get(ACCESS_TOKEN_KEY)?;
    if access_token.is_empty() {
        return None;
    }
    let user = serde_json::from_str(record.get(USER_KEY)?).ok()?;
    let expires_at = parse_epoch_millis(record.get(SESSION_EXPIRY_KEY)?)?;
    let last_activity = record
        .get(LAST_ACTIVITY_KEY)
        .and_then(|raw| parse_epoch_millis(raw))
        .unwrap_or_else(Utc::now);

    Some(Session {
        access_token: access_token.clone(),
        refresh_token: record.get(REFRESH_TOKEN_KEY).cloned(),
        user,
        expires_at,
        last_activity,
    })
}

fn parse_epoch_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis: i64 = raw.parse().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Shared corrupt-data policy: log, wipe, report absent.
pub(crate) fn discard_corrupt(store: &dyn SessionStore, backend: &str) -> Result<Option<Session>, AuthError> {
    warn!(backend, "Discarding corrupt session record");
    store.clear()?;
    Ok(None)
}
