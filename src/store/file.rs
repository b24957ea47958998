use std::collections::HashMap;
use std::path::PathBuf;

use tracing::debug;

use crate::auth::Session;
use crate::error::AuthError;

use super::{decode_record, discard_corrupt, encode_record, SessionStore};

/// Session file name in the storage directory
const SESSION_FILE: &str = "session.json";

/// File-backed session storage.
///
/// Persists the logical key layout as a pretty-printed JSON object so a
/// session survives process restarts. Writes go through a temp file and
/// rename so a crash mid-write cannot leave a half-written record.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store sessions under the given directory.
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Store sessions under the platform cache directory for `app_name`.
    pub fn for_app(app_name: &str) -> Result<Self, AuthError> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| AuthError::Storage("could not find cache directory".to_string()))?;
        Ok(Self::new(cache_dir.join(app_name)))
    }

    fn session_path(&self) -> PathBuf {
        self.dir.join(SESSION_FILE)
    }
}

impl SessionStore for FileStore {
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let record = encode_record(session)?;
        std::fs::create_dir_all(&self.dir)
            .map_err(|e| AuthError::Storage(format!("failed to create session directory: {e}")))?;

        let contents = serde_json::to_string_pretty(&record)
            .map_err(|e| AuthError::Storage(format!("failed to serialize session record: {e}")))?;

        let path = self.session_path();
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents)
            .map_err(|e| AuthError::Storage(format!("failed to write session file: {e}")))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| AuthError::Storage(format!("failed to commit session file: {e}")))?;
        Ok(())
    }

    fn load(&self) -> Result<Option<Session>, AuthError> {
        let path = self.session_path();
        if !path.exists() {
            return Ok(None);
        }

        let contents = std::fs::read_to_string(&path)
            .map_err(|e| AuthError::Storage(format!("failed to read session file: {e}")))?;

        let record: HashMap<String, String> = match serde_json::from_str(&contents) {
            Ok(record) => record,
            Err(e) => {
                debug!(error = %e, "Session file is not valid JSON");
                return discard_corrupt(self, "file");
            }
        };

        match decode_record(&record) {
            Some(session) => Ok(Some(session)),
            None => discard_corrupt(self, "file"),
        }
    }

    fn clear(&self) -> Result<(), AuthError> {
        let path = self.session_path();
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| AuthError::Storage(format!("failed to remove session file: {e}")))?;
        }
        Ok(())
    }
}
