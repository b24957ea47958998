use thiserror::Error;

/// Maximum length for server error messages carried in error values
const MAX_SERVER_MESSAGE_LENGTH: usize = 500;

#[derive(Error, Debug)]
pub enum AuthError {
    /// Bad credentials or an explicit server rejection. Recoverable by the
    /// user re-entering credentials; never retried automatically.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The server answered with a well-formed status but a body that does
    /// not match the expected shape. A contract mismatch, not a bad password.
    #[error("unexpected server response: {0}")]
    Protocol(String),

    /// Renewal exhausted or impossible. The session has been torn down and
    /// the user must re-authenticate.
    #[error("session expired")]
    SessionExpired,

    /// Transport-level failure with no usable response. The session is left
    /// untouched; the caller may retry manually.
    #[error("network error: {0}")]
    Network(String),

    /// A session with missing required fields was handed to a store.
    /// Programming-error class; nothing is written.
    #[error("incomplete session data: missing {0}")]
    InvalidSessionData(&'static str),

    /// The storage backend itself failed (file I/O, keychain access).
    #[error("session storage error: {0}")]
    Storage(String),
}

impl AuthError {
    /// Truncate a server-provided message to avoid carrying excessive data.
    /// The cut backs up to a char boundary; server bodies are arbitrary UTF-8.
    pub(crate) fn truncate_message(message: &str) -> String {
        if message.len() <= MAX_SERVER_MESSAGE_LENGTH {
            return message.to_string();
        }
        let mut cut = MAX_SERVER_MESSAGE_LENGTH;
        while !message.is_char_boundary(cut) {
            cut -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &message[..cut],
            message.len()
        )
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        AuthError::Network(err.to_string())
    }
}
