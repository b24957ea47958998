//! Credential and refresh exchanges against the authentication endpoints.
//!
//! `HttpAuthClient` performs the two network exchanges the lifecycle manager
//! depends on: the login exchange and the refresh exchange. Response bodies
//! are parsed off the raw text so a contract mismatch (well-formed status,
//! malformed body) is reported as `Protocol` rather than a bad password.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::User;
use crate::error::AuthError;

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Fallback message when the server rejects a login without a usable body.
/// Server internals are never echoed to the user.
const GENERIC_LOGIN_FAILURE: &str = "invalid credentials";

/// Login form contents: `{identifier, secret}` on the wire.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub identifier: String,
    pub secret: String,
}

/// Result of a successful credential exchange.
#[derive(Debug, Clone)]
pub struct LoginExchange {
    pub user: User,
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Result of a successful refresh exchange. The refresh token is present
/// only when the server rotated it.
#[derive(Debug, Clone)]
pub struct RefreshExchange {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Network seam for the lifecycle manager. Implemented over HTTP in
/// production and by scripted fakes in tests.
#[async_trait]
pub trait AuthClient: Send + Sync {
    /// Exchange credentials for a session payload. Non-success statuses are
    /// `AuthenticationFailed`; malformed success bodies are `Protocol`.
    async fn exchange_credentials(&self, credentials: &Credentials) -> Result<LoginExchange, AuthError>;

    /// Mint a new access token from a refresh token. Callers must treat any
    /// failure as permanent for the current session; retry policy lives in
    /// the lifecycle manager, which does not retry refreshes at all.
    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<RefreshExchange, AuthError>;

    /// Tell the server the session is over. Local teardown never waits on
    /// this; failures are logged by the caller and otherwise ignored.
    async fn revoke_session(&self, access_token: &str) -> Result<(), AuthError>;
}

/// Auth client for the dashboard REST API.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthClient {
    client: Client,
    base_url: String,
}

impl HttpAuthClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn read_body(response: reqwest::Response) -> Result<(reqwest::StatusCode, String), AuthError> {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }
}

#[async_trait]
impl AuthClient for HttpAuthClient {
    async fn exchange_credentials(&self, credentials: &Credentials) -> Result<LoginExchange, AuthError> {
        let url = format!("{}/auth/login/", self.base_url);
        let response = self.client.post(&url).json(credentials).send().await?;
        let (status, body) = Self::read_body(response).await?;

        if !status.is_success() {
            debug!(status = %status, "Login rejected");
            return Err(AuthError::AuthenticationFailed(rejection_message(&body)));
        }
        parse_login_body(&body)
    }

    async fn exchange_refresh_token(&self, refresh_token: &str) -> Result<RefreshExchange, AuthError> {
        let url = format!("{}/auth/token/refresh/", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await?;
        let (status, body) = Self::read_body(response).await?;

        if !status.is_success() {
            debug!(status = %status, "Token refresh rejected");
            return Err(AuthError::AuthenticationFailed(rejection_message(&body)));
        }
        parse_refresh_body(&body)
    }

    async fn revoke_session(&self, access_token: &str) -> Result<(), AuthError> {
        let url = format!("{}/auth/logout/", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .send()
            .await?;
        let (status, body) = Self::read_body(response).await?;
        if !status.is_success() {
            return Err(AuthError::Protocol(format!(
                "logout endpoint returned {}: {}",
                status,
                AuthError::truncate_message(&body)
            )));
        }
        Ok(())
    }
}

// Wire shapes

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginWire {
    user: User,
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshWire {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWire {
    #[serde(alias = "error")]
    message: String,
}

/// Extract the server's rejection message, falling back to a generic one
/// when the body carries nothing usable.
fn rejection_message(body: &str) -> String {
    match serde_json::from_str::<ErrorWire>(body) {
        Ok(wire) => AuthError::truncate_message(&wire.message),
        Err(_) => GENERIC_LOGIN_FAILURE.to_string(),
    }
}

pub(crate) fn parse_login_body(body: &str) -> Result<LoginExchange, AuthError> {
    let wire: LoginWire = serde_json::from_str(body)
        .map_err(|e| AuthError::Protocol(format!("malformed login response: {e}")))?;
    Ok(LoginExchange {
        user: wire.user,
        access_token: wire.access_token,
        refresh_token: wire.refresh_token,
    })
}

pub(crate) fn parse_refresh_body(body: &str) -> Result<RefreshExchange, AuthError> {
    let wire: RefreshWire = serde_json::from_str(body)
        .map_err(|e| AuthError::Protocol(format!("malformed refresh response: {e}")))?;
    Ok(RefreshExchange {
        access_token: wire.access_token,
        refresh_token: wire.refresh_token,
    })
}

#[derive(Deserialize)]
struct JwtClaims {
    exp: i64,
}

/// Local, network-free check of a token's embedded expiry claim.
///
/// Cheap pre-check before trusting a resumed session; never a substitute
/// for server-side validation. Opaque or undecodable tokens are reported
/// as not live so the caller falls back to a real refresh.
pub fn verify_token_liveness(token: &str) -> bool {
    let mut parts = token.split('.');
    let (Some(_), Some(payload), Some(_), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<JwtClaims>(&decoded) else {
        return false;
    };
    claims.exp > Utc::now().timestamp()
}
