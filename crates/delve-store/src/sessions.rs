use std::path::{Path, PathBuf};

use tracing::debug;

use delve_core::session::{Session, SessionSnapshot};

use crate::error::StoreError;

pub const SESSION_FILE: &str = "session.json";

/// Saves and restores `session.json` in a session directory.
pub struct SessionStore;

impl SessionStore {
    pub fn path(session_dir: &Path) -> PathBuf {
        session_dir.join(SESSION_FILE)
    }

    pub fn save(session: &Session) -> Result<PathBuf, StoreError> {
        let dir = session.session_dir();
        std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        let path = Self::path(dir);
        let json = serde_json::to_vec_pretty(&session.snapshot())?;
        std::fs::write(&path, json).map_err(|e| StoreError::io(&path, e))?;
        debug!(path = %path.display(), cycles = session.cycle_count(), "session saved");
        Ok(path)
    }

    pub fn load(session_dir: &Path) -> Result<Session, StoreError> {
        let path = Self::path(session_dir);
        let bytes = std::fs::read(&path).map_err(|e| StoreError::io(&path, e))?;
        let snapshot: SessionSnapshot = serde_json::from_slice(&bytes)?;
        Ok(Session::restore(snapshot, session_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use delve_core::messages::Role;

    #[test]
    fn save_then_load_keeps_history_and_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(dir.path(), "vector databases");
        session.append_turn(Role::User, "research vector databases");
        session.append_turn(Role::Assistant, "scope?");
        let _ = session.begin_cycle();
        let _ = session.set_episode_name("Vector DB landscape").unwrap();
        session.capture_refinement("go deeper on pricing");

        let _ = SessionStore::save(&session).unwrap();
        let loaded = SessionStore::load(dir.path()).unwrap();

        assert_eq!(loaded.id(), session.id());
        assert_eq!(loaded.history(), session.history());
        assert_eq!(loaded.cycle_count(), 1);
        assert_eq!(
            loaded.episode_name().map(|e| e.as_str()),
            Some("Vector_DB_landscape")
        );
        assert_eq!(loaded.pending_refinement(), Some("go deeper on pricing"));
    }

    #[test]
    fn load_without_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            SessionStore::load(dir.path()),
            Err(StoreError::NotFound(_))
        ));
    }
}
