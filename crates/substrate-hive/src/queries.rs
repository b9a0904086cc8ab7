//! Read-side queries over the cell graph: readiness, staleness, and
//! aggregate statistics. Kept separate from `cells.rs` CRUD since these
//! combine cells with dependency edges and, for `ready`, live reservation
//! state from the mailbox.

use std::collections::HashMap;

use chrono::Utc;
use rusqlite::params;
use substrate_core::error::Result;
use substrate_db::DbPool;

use crate::cells::{row_to_cell, CellFilter};
use crate::models::Cell;

/// Cells that are `open`, have every `blocks` predecessor closed (i.e. not
/// `is_blocked`), and have no active reservation conflicting with their
/// declared `metadata.files`.
pub fn ready(pool: &DbPool, project_key: &str) -> Result<Vec<Cell>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells
         WHERE project_key = ?1 AND deleted_at IS NULL AND status = 'open' AND is_blocked = 0
         ORDER BY priority DESC, created_at ASC",
    )?;
    let rows = stmt.query_map(params![project_key], row_to_cell)?;
    let candidates = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);
    drop(conn);

    let mut out = Vec::new();
    for cell in candidates {
        if !has_file_conflict(pool, project_key, &cell)? {
            out.push(cell);
        }
    }
    Ok(out)
}

fn has_file_conflict(pool: &DbPool, project_key: &str, cell: &Cell) -> Result<bool> {
    let Some(files) = cell.metadata.get("files").and_then(|v| v.as_array()) else {
        return Ok(false);
    };
    for file in files {
        let Some(path) = file.as_str() else { continue };
        let conflicts = substrate_mail::reservations::conflicts_for(pool, project_key, path, None)?;
        if !conflicts.is_empty() {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A blocked cell together with the (still-open) cells blocking it.
#[derive(Debug, Clone)]
pub struct BlockedCell {
    pub cell: Cell,
    pub blockers: Vec<Cell>,
}

/// Cells with `status=blocked` or a cached `is_blocked` dependency state,
/// each annotated with the cells currently blocking it.
pub fn blocked(pool: &DbPool, project_key: &str) -> Result<Vec<BlockedCell>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells
         WHERE project_key = ?1 AND deleted_at IS NULL AND (status = 'blocked' OR is_blocked = 1)
         ORDER BY priority DESC, created_at ASC",
    )?;
    let rows = stmt.query_map(params![project_key], row_to_cell)?;
    let cells = rows.collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::with_capacity(cells.len());
    for cell in cells {
        let mut blocker_stmt = conn.prepare(
            "SELECT c.id, c.project_key, c.title, c.description, c.status, c.priority, c.issue_type,
                    c.parent_id, c.assignee, c.created_at, c.updated_at, c.closed_at, c.deleted_at,
                    c.is_blocked, c.metadata_json
             FROM cell_dependencies d
             JOIN cells c ON c.id = d.from_cell
             WHERE d.to_cell = ?1 AND d.relationship = 'blocks' AND c.status != 'closed' AND c.status != 'tombstone'",
        )?;
        let blockers = blocker_stmt
            .query_map(params![cell.id], row_to_cell)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(BlockedCell { cell, blockers });
    }
    Ok(out)
}

/// Epics whose subtasks are all `closed` (or tombstoned) but which are
/// themselves still open.
pub fn epics_eligible_for_closure(pool: &DbPool, project_key: &str) -> Result<Vec<Cell>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells
         WHERE project_key = ?1 AND deleted_at IS NULL AND issue_type = 'epic' AND status != 'closed'",
    )?;
    let epics = stmt.query_map(params![project_key], row_to_cell)?.collect::<rusqlite::Result<Vec<_>>>()?;

    let mut out = Vec::new();
    for epic in epics {
        let open_children: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cells WHERE parent_id = ?1 AND status NOT IN ('closed', 'tombstone')",
            params![epic.id],
            |row| row.get(0),
        )?;
        let child_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM cells WHERE parent_id = ?1",
            params![epic.id],
            |row| row.get(0),
        )?;
        if child_count > 0 && open_children == 0 {
            out.push(epic);
        }
    }
    Ok(out)
}

/// Cells not updated in `days_since_update` days, excluding closed/tombstone.
pub fn stale(pool: &DbPool, project_key: &str, days_since_update: i64) -> Result<Vec<Cell>> {
    let conn = pool.get()?;
    let cutoff = Utc::now() - chrono::Duration::days(days_since_update);
    let mut stmt = conn.prepare(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells
         WHERE project_key = ?1 AND deleted_at IS NULL AND status NOT IN ('closed', 'tombstone')
               AND updated_at < ?2
         ORDER BY updated_at ASC",
    )?;
    let rows = stmt.query_map(params![project_key, cutoff.to_rfc3339()], row_to_cell)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(substrate_core::error::Error::from)
}

/// Aggregate counts and depth statistics for a project's cells.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Statistics {
    pub total: i64,
    pub by_status: HashMap<String, i64>,
    pub by_issue_type: HashMap<String, i64>,
    pub by_priority: HashMap<i32, i64>,
    pub average_age_days: f64,
    pub max_blocker_depth: u32,
}

pub fn statistics(pool: &DbPool, project_key: &str) -> Result<Statistics> {
    let conn = pool.get()?;
    let cells: Vec<Cell> = {
        let mut stmt = conn.prepare(
            "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                    assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
             FROM cells WHERE project_key = ?1 AND deleted_at IS NULL",
        )?;
        stmt.query_map(params![project_key], row_to_cell)?.collect::<rusqlite::Result<Vec<_>>>()?
    };

    let mut stats = Statistics { total: cells.len() as i64, ..Default::default() };
    let now = Utc::now();
    let mut age_sum = 0.0;
    for cell in &cells {
        *stats.by_status.entry(cell.status.clone()).or_insert(0) += 1;
        *stats.by_issue_type.entry(cell.issue_type.clone()).or_insert(0) += 1;
        *stats.by_priority.entry(cell.priority).or_insert(0) += 1;
        age_sum += (now - cell.created_at).num_seconds() as f64 / 86_400.0;
    }
    if !cells.is_empty() {
        stats.average_age_days = age_sum / cells.len() as f64;
    }
    stats.max_blocker_depth = max_blocker_depth(&conn, project_key)?;
    Ok(stats)
}

fn max_blocker_depth(conn: &rusqlite::Connection, project_key: &str) -> Result<u32> {
    let mut stmt = conn.prepare(
        "SELECT d.from_cell, d.to_cell FROM cell_dependencies d
         JOIN cells c ON c.id = d.from_cell
         WHERE c.project_key = ?1 AND d.relationship = 'blocks'",
    )?;
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();
    let rows = stmt.query_map(params![project_key], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (from_cell, to_cell) = row?;
        adjacency.entry(to_cell).or_default().push(from_cell);
    }

    let mut max_depth = 0u32;
    for start in adjacency.keys() {
        let mut depth = 0u32;
        let mut frontier = vec![start.clone()];
        let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
        while let Some(next_frontier) = {
            let mut next = Vec::new();
            for node in &frontier {
                if let Some(preds) = adjacency.get(node) {
                    for p in preds {
                        if seen.insert(p.clone()) {
                            next.push(p.clone());
                        }
                    }
                }
            }
            if next.is_empty() { None } else { Some(next) }
        } {
            depth += 1;
            frontier = next_frontier;
        }
        max_depth = max_depth.max(depth);
    }
    Ok(max_depth)
}

/// Result of resolving a cell id by unique prefix.
#[derive(Debug, Clone)]
pub struct PartialIdMatch {
    pub found: Option<String>,
    pub ambiguous: Option<Vec<String>>,
}

/// Matches cell ids by prefix within a project. Exact match wins outright;
/// otherwise zero hits is `found=None`, one hit is `found=Some`, multiple
/// hits are reported as `ambiguous`.
pub fn resolve_partial_id(pool: &DbPool, project_key: &str, prefix: &str) -> Result<PartialIdMatch> {
    use rusqlite::OptionalExtension;
    let conn = pool.get()?;
    let exact: Option<String> = conn
        .query_row(
            "SELECT id FROM cells WHERE project_key = ?1 AND id = ?2",
            params![project_key, prefix],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = exact {
        return Ok(PartialIdMatch { found: Some(id), ambiguous: None });
    }

    let mut stmt = conn.prepare("SELECT id FROM cells WHERE project_key = ?1 AND id LIKE ?2")?;
    let like_pattern = format!("{prefix}%");
    let matches: Vec<String> = stmt
        .query_map(params![project_key, like_pattern], |row| row.get(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    match matches.len() {
        0 => Ok(PartialIdMatch { found: None, ambiguous: None }),
        1 => Ok(PartialIdMatch { found: Some(matches[0].clone()), ambiguous: None }),
        _ => Ok(PartialIdMatch { found: None, ambiguous: Some(matches) }),
    }
}

/// Re-exported so callers that already have a [`CellFilter`] can build one
/// in the same module as the other query helpers.
pub fn query_with_filter(pool: &DbPool, project_key: &str, filter: &CellFilter) -> Result<Vec<Cell>> {
    crate::cells::query(pool, project_key, filter)
}
