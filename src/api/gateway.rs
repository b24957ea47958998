//! Authenticated request gateway.
//!
//! `ApiGateway` wraps outbound calls with the current authorization header
//! and implements the unauthorized-recovery policy: a 401 response triggers
//! exactly one renewal through the lifecycle manager and exactly one retry
//! of the original call. A second 401, or a failed renewal, surfaces
//! `SessionExpired` and tears the session down; the consumer is expected to
//! redirect to its re-authentication surface.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::SessionManager;
use crate::error::AuthError;

/// HTTP request timeout in seconds, matching the auth client.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// An outbound call, path-relative to the transport's base URL.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

impl RequestSpec {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::PUT,
            path: path.into(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            body: None,
        }
    }
}

/// A response that made it back from the server, whatever its status.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Parse the body, reporting a malformed payload as a contract
    /// violation rather than swallowing it.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AuthError> {
        serde_json::from_str(&self.body)
            .map_err(|e| AuthError::Protocol(format!("malformed response body: {e}")))
    }
}

/// Wire seam between the gateway and the network. Production uses
/// `HttpTransport`; tests script responses through a fake.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue the call with the given bearer token, if any. An `Err` here
    /// means no response at all (transport failure); HTTP error statuses
    /// come back as `Ok` with the status set.
    async fn execute(
        &self,
        spec: &RequestSpec,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, AuthError>;
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Result<Self, AuthError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(
        &self,
        spec: &RequestSpec,
        bearer: Option<&str>,
    ) -> Result<ApiResponse, AuthError> {
        let url = format!("{}{}", self.base_url, spec.path);
        let mut request = self.client.request(spec.method.clone(), &url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(ref body) = spec.body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok(ApiResponse { status, body })
    }
}

/// Gateway for authenticated REST calls.
pub struct ApiGateway {
    transport: Arc<dyn Transport>,
    session: SessionManager,
}

impl ApiGateway {
    pub fn new(transport: Arc<dyn Transport>, session: SessionManager) -> Self {
        Self { transport, session }
    }

    /// Issue the call with the current session's header.
    ///
    /// Unauthorized responses get one refresh and one retry; everything
    /// else, error statuses included, is returned to the caller as-is.
    /// Transport failures surface as `Network` and leave the session alone.
    pub async fn send(&self, spec: &RequestSpec) -> Result<ApiResponse, AuthError> {
        let bearer = self.session.bearer_token();
        let response = self.transport.execute(spec, bearer.as_deref()).await?;
        if response.status != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        debug!(path = %spec.path, "Unauthorized response; attempting token refresh");
        // One renewal attempt. A failed refresh has already torn the
        // session down; the caller only needs to know to re-authenticate.
        self.session
            .refresh()
            .await
            .map_err(|_| AuthError::SessionExpired)?;

        let bearer = self.session.bearer_token();
        let retry = self.transport.execute(spec, bearer.as_deref()).await?;
        if retry.status == StatusCode::UNAUTHORIZED {
            warn!(path = %spec.path, "Request unauthorized after refresh; ending session");
            self.session.invalidate();
            return Err(AuthError::SessionExpired);
        }
        Ok(retry)
    }
}
