use std::collections::HashMap;

use keyring::Entry;
use tracing::debug;

use crate::auth::Session;
use crate::error::AuthError;

use super::{decode_record, discard_corrupt, encode_record, SessionStore};

/// Keychain-backed session storage.
///
/// Stores the whole session record as a single secret in the OS keychain
/// (macOS Keychain, Windows Credential Manager, Linux Secret Service).
/// Suited to desktop consumers where tokens should not sit in a plain file.
pub struct KeyringStore {
    service: String,
    account: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }

    fn entry(&self) -> Result<Entry, AuthError> {
        Entry::new(&self.service, &self.account)
            .map_err(|e| AuthError::Storage(format!("failed to open keyring entry: {e}")))
    }
}

impl SessionStore for KeyringStore {
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let record = encode_record(session)?;
        let secret = serde_json::to_string(&record)
            .map_err(|e| AuthError::Storage(format!("failed to serialize session record: {e}")))?;
        self.entry()?
            .set_password(&secret)
            .map_err(|e| AuthError::Storage(format!("failed to store session in keychain: {e}")))
    }

    fn load(&self) -> Result<Option<Session>, AuthError> {
        let secret = match self.entry()?.get_password() {
            Ok(secret) => secret,
            Err(keyring::Error::NoEntry) => return Ok(None),
            Err(e) => {
                return Err(AuthError::Storage(format!(
                    "failed to read session from keychain: {e}"
                )))
            }
        };

        let record: HashMap<String, String> = match serde_json::from_str(&secret) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Keychain session record is not valid JSON");
                return discard_corrupt(self, "keyring");
            }
        };

        match decode_record(&record) {
            Some(session) => Ok(Some(session)),
            None => discard_corrupt(self, "keyring"),
        }
    }

    fn clear(&self) -> Result<(), AuthError> {
        match self.entry()?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(AuthError::Storage(format!(
                "failed to delete session from keychain: {e}"
            ))),
        }
    }
}
