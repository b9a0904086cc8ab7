//! Idempotent, integer-versioned schema migrations.
//!
//! `migrations(version INTEGER PRIMARY KEY, applied_at TEXT)` records which
//! migrations have run. Each migration is a `(version, sql)` pair; `migrate`
//! applies every version greater than the current max inside one transaction
//! per version, so a half-applied migration never leaves `migrations` out of
//! sync with the schema it describes.

use rusqlite::Connection;
use substrate_core::error::Result;

use crate::schema::full_schema_sql;

struct Migration {
    version: i64,
    sql: String,
}

fn migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        sql: full_schema_sql(),
    }]
}

/// Applies every migration newer than the database's current version.
///
/// Safe to call on every open: a freshly created file starts at version 0
/// and catches up to the latest; an already-migrated file is a no-op.
pub fn migrate(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migrations (
            version     INTEGER PRIMARY KEY,
            applied_at  TEXT NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM migrations",
        [],
        |row| row.get(0),
    )?;

    for m in migrations().into_iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(&m.sql)?;
        tx.execute(
            "INSERT INTO migrations (version, applied_at) VALUES (?1, datetime('now'))",
            rusqlite::params![m.version],
        )?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrate_is_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();
        migrate(&mut conn).unwrap();

        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn migrate_creates_all_core_tables() {
        let mut conn = Connection::open_in_memory().unwrap();
        migrate(&mut conn).unwrap();

        for table in [
            "events",
            "agents",
            "messages",
            "message_recipients",
            "threads",
            "reservations",
            "cells",
            "cell_dependencies",
            "cell_labels",
            "cell_comments",
            "memories",
            "memory_links",
            "entities",
            "relationships",
            "memory_entities",
        ] {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    rusqlite::params![table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
