use std::collections::HashMap;
use std::sync::Mutex;

use crate::auth::Session;
use crate::error::AuthError;

use super::{decode_record, discard_corrupt, encode_record, SessionStore};

/// In-memory session storage.
///
/// The production analog of browser local storage for tests and short-lived
/// consumers: same key layout, no durability across processes.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let record = encode_record(session)?;
        let mut entries = self.entries.lock().expect("session store lock poisoned");
        *entries = record;
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, AuthError> {
        let record = {
            let entries = self.entries.lock().expect("session store lock poisoned");
            if entries.is_empty() {
                return Ok(None);
            }
            entries.clone()
        };
        match decode_record(&record) {
            Some(session) => Ok(Some(session)),
            None => discard_corrupt(self, "memory"),
        }
    }

    fn clear(&self) -> Result<(), AuthError> {
        self.entries
            .lock()
            .expect("session store lock poisoned")
            .clear();
        Ok(())
    }
}
