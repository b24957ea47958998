//! Scripted fakes shared by the lifecycle and gateway tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use tokio::sync::Semaphore;

use crate::api::client::{AuthClient, Credentials, LoginExchange, RefreshExchange};
use crate::auth::User;
use crate::error::AuthError;

pub(crate) fn test_user(role: &str) -> User {
    User {
        id: 1,
        username: "alice".to_string(),
        name: Some("Alice".to_string()),
        role: role.to_string(),
        permissions: vec!["tasks.read".to_string()],
    }
}

/// A structurally valid JWT whose `exp` claim is `offset_secs` from now.
/// Signature is garbage; only the local liveness check reads these.
pub(crate) fn jwt_with_exp(offset_secs: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let exp = Utc::now().timestamp() + offset_secs;
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{exp}}}"#));
    format!("{header}.{payload}.sig")
}

pub(crate) fn login_ok(
    access_token: &str,
    refresh_token: Option<&str>,
    user: User,
) -> Result<LoginExchange, AuthError> {
    Ok(LoginExchange {
        user,
        access_token: access_token.to_string(),
        refresh_token: refresh_token.map(|t| t.to_string()),
    })
}

/// Scripted `AuthClient`: queued results, call counters, and an optional
/// gate that holds refresh exchanges in flight until the test releases them.
#[derive(Default)]
pub(crate) struct MockAuthClient {
    login_results: Mutex<VecDeque<Result<LoginExchange, AuthError>>>,
    refresh_results: Mutex<VecDeque<Result<RefreshExchange, AuthError>>>,
    refresh_gate: Mutex<Option<Arc<Semaphore>>>,
    pub(crate) refresh_calls: AtomicUsize,
    pub(crate) revoke_calls: AtomicUsize,
}

impl MockAuthClient {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_login(&self, result: Result<LoginExchange, AuthError>) {
        self.login_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn push_refresh(&self, result: Result<RefreshExchange, AuthError>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub(crate) fn set_refresh_gate(&self, gate: Arc<Semaphore>) {
        *self.refresh_gate.lock().unwrap() = Some(gate);
    }
}

#[async_trait]
impl AuthClient for MockAuthClient {
    async fn exchange_credentials(
        &self,
        _credentials: &Credentials,
    ) -> Result<LoginExchange, AuthError> {
        tokio::task::yield_now().await;
        self.login_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(AuthError::AuthenticationFailed("unscripted login".to_string()))
            })
    }

    async fn exchange_refresh_token(
        &self,
        _refresh_token: &str,
    ) -> Result<RefreshExchange, AuthError> {
        tokio::task::yield_now().await;
        let gate = self.refresh_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.acquire().await.expect("refresh gate closed").forget();
        }
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(AuthError::AuthenticationFailed("unscripted refresh".to_string()))
            })
    }

    async fn revoke_session(&self, _access_token: &str) -> Result<(), AuthError> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
