use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Role that bypasses explicit permission lists.
/// Deliberate super-role behavior: administrators hold every permission.
const SUPER_ROLE: &str = "admin";

/// The authenticated principal's profile as returned by the login exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    pub role: String,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl User {
    /// True if the principal holds the named permission, either explicitly
    /// or through the super-role.
    pub fn has_permission(&self, permission: &str) -> bool {
        self.role == SUPER_ROLE || self.permissions.iter().any(|p| p == permission)
    }
}

/// The durable record of an authenticated principal's credentials and
/// validity window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    /// Used solely to mint new access tokens; absent in some deployments.
    pub refresh_token: Option<String>,
    pub user: User,
    /// Wall-clock instant after which the session is invalid without renewal.
    pub expires_at: DateTime<Utc>,
    /// Most recent observed user interaction, for inactivity eviction.
    pub last_activity: DateTime<Utc>,
}

impl Session {
    /// Create a session for a fresh login, valid for `ttl` from now.
    pub fn new(user: User, access_token: String, refresh_token: Option<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            access_token,
            refresh_token,
            user,
            expires_at: now + ttl,
            last_activity: now,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    pub fn time_until_expiry(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Apply a successful renewal: swap in the new access token, rotate the
    /// refresh token if the server issued one, and extend the window by a
    /// full `ttl` from the renewal moment. The previous expiry does not
    /// enter into the new one.
    pub fn renew(&mut self, access_token: String, refresh_token: Option<String>, ttl: Duration) {
        self.access_token = access_token;
        if refresh_token.is_some() {
            self.refresh_token = refresh_token;
        }
        self.expires_at = Utc::now() + ttl;
    }

    /// Record a user interaction.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
