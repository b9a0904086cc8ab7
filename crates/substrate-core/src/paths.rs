//! XDG Base Directory Spec compliant path resolution for the substrate's state.
//!
//! Each project gets its own SQLite database at a deterministic path derived
//! from the project key: `<state_dir>/<sha256(project_key)[0:12]>/project.db`.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Default state directory when `STATE_DIR` is not set.
///
/// Priority order:
/// 1. `$XDG_STATE_HOME/coordination-substrate/` (if set)
/// 2. `~/.local/state/coordination-substrate/` (default)
/// 3. `%LOCALAPPDATA%/coordination-substrate/state/` (Windows)
#[must_use]
pub fn default_state_dir() -> PathBuf {
    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        if !xdg_state.is_empty() {
            return PathBuf::from(xdg_state).join("coordination-substrate");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(local_app_data) = dirs::data_dir() {
            return local_app_data
                .join("coordination-substrate")
                .join("state");
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        if let Some(home) = dirs::home_dir() {
            return home
                .join(".local")
                .join("state")
                .join("coordination-substrate");
        }
    }

    PathBuf::from(".local/state/coordination-substrate")
}

/// The first 12 hex characters of `sha256(project_key)`, used as the
/// per-project directory name under the state dir.
#[must_use]
pub fn project_slug(project_key: &str) -> String {
    let digest = Sha256::digest(project_key.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Resolves the SQLite database path for a project key under a given state dir.
#[must_use]
pub fn project_db_path(state_dir: &std::path::Path, project_key: &str) -> PathBuf {
    state_dir.join(project_slug(project_key)).join("project.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_deterministic_and_12_chars() {
        let a = project_slug("/home/me/repo");
        let b = project_slug("/home/me/repo");
        assert_eq!(a, b);
        assert_eq!(a.len(), 12);
    }

    #[test]
    fn different_keys_produce_different_slugs() {
        assert_ne!(project_slug("/a"), project_slug("/b"));
    }

    #[test]
    fn db_path_ends_in_project_db() {
        let path = project_db_path(std::path::Path::new("/tmp/state"), "/repo");
        assert_eq!(path.file_name().unwrap(), "project.db");
        assert!(path.starts_with("/tmp/state"));
    }
}
