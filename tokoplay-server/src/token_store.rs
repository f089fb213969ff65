// tokoplay-server/src/token_store.rs
//
// File-backed token persistence so a restart can reuse a still-fresh token
// instead of burning a refresh.

use std::fs;
use std::path::{Path, PathBuf};

use tokoplay_core::auth::{Session, TokenStore};
use tokoplay_core::error::Error;

pub struct JsonTokenStore {
    path: PathBuf,
}

impl JsonTokenStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl TokenStore for JsonTokenStore {
    fn load(&self) -> Result<Option<Session>, Error> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)?;
        let session: Session = serde_json::from_str(&raw)
            .map_err(|e| Error::Parse(format!("{}: {e}", self.path.display())))?;
        Ok(Some(session))
    }

    fn save(&self, session: &Session) -> Result<(), Error> {
        fs::write(&self.path, serde_json::to_string_pretty(session)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTokenStore::new(dir.path().join("tokens.json"));

        assert!(store.load().unwrap().is_none());

        let session = Session::new("tok-a".into(), Utc::now() + Duration::hours(1));
        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));
    }

    #[test]
    fn garbage_in_the_file_is_an_error_not_a_panic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        fs::write(&path, "not json").unwrap();

        let store = JsonTokenStore::new(&path);
        assert!(matches!(store.load(), Err(Error::Parse(_))));
    }
}
