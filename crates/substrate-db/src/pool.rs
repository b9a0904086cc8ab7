//! Per-project SQLite connection pool — an internal implementation detail;
//! callers never see raw connections.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use substrate_core::error::Result;

use crate::migrate::migrate;

pub type DbPool = Pool<SqliteConnectionManager>;

fn open_pool(db_path: &Path) -> Result<DbPool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    });

    let pool = Pool::builder()
        .max_size(8)
        .build(manager)
        .map_err(|e| substrate_core::error::Error::Database(format!("pool init: {e}")))?;

    let mut conn = pool
        .get()
        .map_err(|e| substrate_core::error::Error::Database(format!("pool warmup: {e}")))?;
    migrate(&mut conn)?;

    Ok(pool)
}

/// Owns one connection pool per project key, lazily opened on first use.
///
/// This is the only long-lived resource callers hold: a `PoolRegistry` is
/// created once by a `Substrate` handle's factory, with no hidden globals,
/// and threaded through every subsystem.
#[derive(Clone)]
pub struct PoolRegistry {
    state_dir: PathBuf,
    pools: Arc<Mutex<HashMap<String, DbPool>>>,
}

impl PoolRegistry {
    #[must_use]
    pub fn new(state_dir: PathBuf) -> Self {
        Self {
            state_dir,
            pools: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Returns the pool for `project_key`, opening and migrating its
    /// database file on first access.
    pub fn pool_for(&self, project_key: &str) -> Result<DbPool> {
        let mut pools = self
            .pools
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        if let Some(pool) = pools.get(project_key) {
            return Ok(pool.clone());
        }

        let db_path = substrate_core::paths::project_db_path(&self.state_dir, project_key);
        let pool = open_pool(&db_path)?;
        pools.insert(project_key.to_string(), pool.clone());
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_for_same_project_key_is_cached() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PoolRegistry::new(tmp.path().to_path_buf());

        let pool_a = registry.pool_for("/repo/a").unwrap();
        let _pool_b = registry.pool_for("/repo/a").unwrap();

        let conn = pool_a.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn different_project_keys_get_different_db_files() {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PoolRegistry::new(tmp.path().to_path_buf());

        registry.pool_for("/repo/a").unwrap();
        registry.pool_for("/repo/b").unwrap();

        let slug_a = substrate_core::paths::project_slug("/repo/a");
        let slug_b = substrate_core::paths::project_slug("/repo/b");
        assert!(tmp.path().join(slug_a).join("project.db").exists());
        assert!(tmp.path().join(slug_b).join("project.db").exists());
    }
}
