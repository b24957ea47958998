//! Session timing policy.
//!
//! The defaults mirror the hosted dashboard's policy: one-hour sessions,
//! silent renewal one minute before expiry, and a thirty-minute inactivity
//! window. Tests inject scaled-down values.

use std::time::Duration;

/// Session lifetime granted by a login or a successful renewal.
const SESSION_TTL_SECS: u64 = 3600;

/// How long before expiry the proactive renewal fires.
/// Renewing ahead of the deadline means no caller ever observes a
/// hard-expired session that still claims to be active.
const RENEWAL_LEAD_SECS: u64 = 60;

/// Inactivity window after which a session is evicted regardless of
/// token validity.
const INACTIVITY_LIMIT_SECS: u64 = 1800;

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    /// Duration added to the current time on login and on every renewal.
    pub session_ttl: Duration,
    /// Interval before expiry at which the renewal timer fires.
    pub renewal_lead: Duration,
    /// Maximum gap between observed activity events before eviction.
    pub inactivity_limit: Duration,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(SESSION_TTL_SECS),
            renewal_lead: Duration::from_secs(RENEWAL_LEAD_SECS),
            inactivity_limit: Duration::from_secs(INACTIVITY_LIMIT_SECS),
        }
    }
}

impl SessionPolicy {
    /// Session TTL as a chrono duration for wall-clock arithmetic.
    pub(crate) fn ttl(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.session_ttl).unwrap_or(chrono::Duration::MAX)
    }

    /// Renewal lead as a chrono duration.
    pub(crate) fn lead(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.renewal_lead).unwrap_or(chrono::Duration::MAX)
    }
}
