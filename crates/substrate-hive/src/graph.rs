//! Dependency graph: cycle-checked edges and the `is_blocked` cache.

use std::collections::{HashMap, HashSet};

use rusqlite::params;
use substrate_core::error::{Error, Result};
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

/// The only relationship that participates in cycle detection and blocking.
/// Other relationship kinds (e.g. `"relates_to"`) are informational only.
const BLOCKS: &str = "blocks";

/// Adds a `from_cell -[relationship]-> to_cell` edge. For `"blocks"` edges,
/// rejects the edge if it would create a cycle (i.e. `to_cell` can already
/// reach `from_cell`), then rebuilds the project's `is_blocked` cache.
pub fn add_dependency(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    from_cell: &str,
    to_cell: &str,
    relationship: &str,
) -> Result<()> {
    if from_cell == to_cell {
        return Err(Error::CycleDetected {
            from: from_cell.to_string(),
            to: to_cell.to_string(),
        });
    }

    let conn = pool.get()?;
    if relationship == BLOCKS && reachable(&conn, project_key, to_cell, from_cell)? {
        return Err(Error::CycleDetected {
            from: from_cell.to_string(),
            to: to_cell.to_string(),
        });
    }

    conn.execute(
        "INSERT OR IGNORE INTO cell_dependencies (from_cell, to_cell, relationship)
         VALUES (?1, ?2, ?3)",
        params![from_cell, to_cell, relationship],
    )?;
    drop(conn);

    events.append(
        project_key,
        EventType::CellDependencyAdded,
        serde_json::json!({ "from_cell": from_cell, "to_cell": to_cell, "relationship": relationship }),
    )?;

    if relationship == BLOCKS {
        rebuild_blocked_cache(pool, project_key)?;
    }
    Ok(())
}

pub fn remove_dependency(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    from_cell: &str,
    to_cell: &str,
    relationship: &str,
) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "DELETE FROM cell_dependencies WHERE from_cell = ?1 AND to_cell = ?2 AND relationship = ?3",
        params![from_cell, to_cell, relationship],
    )?;
    drop(conn);

    events.append(
        project_key,
        EventType::CellDependencyRemoved,
        serde_json::json!({ "from_cell": from_cell, "to_cell": to_cell, "relationship": relationship }),
    )?;

    if relationship == BLOCKS {
        rebuild_blocked_cache(pool, project_key)?;
    }
    Ok(())
}

/// DFS reachability check over `"blocks"` edges: can `start` reach `target`?
fn reachable(conn: &rusqlite::Connection, project_key: &str, start: &str, target: &str) -> Result<bool> {
    let adjacency = blocks_adjacency(conn, project_key)?;
    let mut visited: HashSet<String> = HashSet::new();
    let mut stack = vec![start.to_string()];

    while let Some(node) = stack.pop() {
        if node == target {
            return Ok(true);
        }
        if !visited.insert(node.clone()) {
            continue;
        }
        if let Some(next) = adjacency.get(&node) {
            stack.extend(next.iter().cloned());
        }
    }
    Ok(false)
}

fn blocks_adjacency(conn: &rusqlite::Connection, project_key: &str) -> Result<HashMap<String, Vec<String>>> {
    let mut stmt = conn.prepare(
        "SELECT d.from_cell, d.to_cell FROM cell_dependencies d
         JOIN cells c ON c.id = d.from_cell
         JOIN cells t ON t.id = d.to_cell
         WHERE c.project_key = ?1 AND d.relationship = ?2
               AND c.status != 'tombstone' AND t.status != 'tombstone'",
    )?;
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(params![project_key, BLOCKS], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (from_cell, to_cell) = row?;
        adjacency.entry(from_cell).or_default().push(to_cell);
    }
    Ok(adjacency)
}

/// Recomputes `cells.is_blocked` for every open/in-progress cell in a
/// project: a cell is blocked while any direct `"blocks"` predecessor is
/// not `closed`.
pub fn rebuild_blocked_cache(pool: &DbPool, project_key: &str) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let blocked_ids: HashSet<String> = {
        let mut stmt = tx.prepare(
            "SELECT DISTINCT d.to_cell FROM cell_dependencies d
             JOIN cells blocker ON blocker.id = d.from_cell
             WHERE d.relationship = ?1 AND blocker.status != 'closed' AND blocker.status != 'tombstone'",
        )?;
        stmt.query_map(params![BLOCKS], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<HashSet<_>>>()?
    };

    tx.execute(
        "UPDATE cells SET is_blocked = 0 WHERE project_key = ?1",
        params![project_key],
    )?;
    for cell_id in &blocked_ids {
        tx.execute(
            "UPDATE cells SET is_blocked = 1 WHERE id = ?1 AND project_key = ?2",
            params![cell_id, project_key],
        )?;
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cells::{create, NewCell};
    use std::path::PathBuf;
    use substrate_db::PoolRegistry;

    fn setup() -> (DbPool, EventStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PoolRegistry::new(PathBuf::from(tmp.path()));
        let pool = registry.pool_for("proj").unwrap();
        let events = EventStore::new(registry);
        (pool, events, tmp)
    }

    #[test]
    fn direct_cycle_rejected() {
        let (pool, events, _tmp) = setup();
        let a = create(&pool, &events, "proj", NewCell { title: "a".into(), ..Default::default() }).unwrap();
        let b = create(&pool, &events, "proj", NewCell { title: "b".into(), ..Default::default() }).unwrap();

        add_dependency(&pool, &events, "proj", &a.id, &b.id, "blocks").unwrap();
        let err = add_dependency(&pool, &events, "proj", &b.id, &a.id, "blocks").unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn transitive_cycle_rejected() {
        let (pool, events, _tmp) = setup();
        let a = create(&pool, &events, "proj", NewCell { title: "a".into(), ..Default::default() }).unwrap();
        let b = create(&pool, &events, "proj", NewCell { title: "b".into(), ..Default::default() }).unwrap();
        let c = create(&pool, &events, "proj", NewCell { title: "c".into(), ..Default::default() }).unwrap();

        add_dependency(&pool, &events, "proj", &a.id, &b.id, "blocks").unwrap();
        add_dependency(&pool, &events, "proj", &b.id, &c.id, "blocks").unwrap();

        let err = add_dependency(&pool, &events, "proj", &c.id, &a.id, "blocks").unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn blocked_cache_reflects_open_blocker() {
        let (pool, events, _tmp) = setup();
        let a = create(&pool, &events, "proj", NewCell { title: "a".into(), ..Default::default() }).unwrap();
        let b = create(&pool, &events, "proj", NewCell { title: "b".into(), ..Default::default() }).unwrap();

        add_dependency(&pool, &events, "proj", &a.id, &b.id, "blocks").unwrap();

        let blocked = crate::cells::get(&pool, &b.id).unwrap();
        assert!(blocked.is_blocked);
    }

    #[test]
    fn closing_blocker_unblocks_dependent() {
        let (pool, events, _tmp) = setup();
        let a = create(&pool, &events, "proj", NewCell { title: "a".into(), ..Default::default() }).unwrap();
        let b = create(&pool, &events, "proj", NewCell { title: "b".into(), ..Default::default() }).unwrap();

        add_dependency(&pool, &events, "proj", &a.id, &b.id, "blocks").unwrap();
        crate::cells::set_status(&pool, &events, "proj", &a.id, crate::models::CellStatus::Closed).unwrap();

        let unblocked = crate::cells::get(&pool, &b.id).unwrap();
        assert!(!unblocked.is_blocked);
    }

    #[test]
    fn unrelated_relationship_does_not_participate_in_cycle_check() {
        let (pool, events, _tmp) = setup();
        let a = create(&pool, &events, "proj", NewCell { title: "a".into(), ..Default::default() }).unwrap();
        let b = create(&pool, &events, "proj", NewCell { title: "b".into(), ..Default::default() }).unwrap();

        add_dependency(&pool, &events, "proj", &a.id, &b.id, "relates_to").unwrap();
        add_dependency(&pool, &events, "proj", &b.id, &a.id, "relates_to").unwrap();
    }
}
