//! JSONL export/import for the cell graph, with a field-wise three-way
//! merge so two offline copies of a project can reconcile without
//! clobbering each other's independent edits to the same cell.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use substrate_core::error::{Error, Result};
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

use crate::models::Cell;

/// Clock skew under which two `updated_at` timestamps are treated as a tie
/// (the local/"ours" side then wins) rather than one genuinely preceding
/// the other.
const CLOCK_SKEW_GRACE: Duration = Duration::minutes(2);

/// Tombstones older than this on both sides are dropped entirely rather
/// than merged, so deleted-cell history doesn't accumulate forever.
const TOMBSTONE_TTL_DAYS: i64 = 30;

/// One line of the export format: a cell, its labels, its outgoing `blocks`
/// edges, and its comments (comments are never deleted, only unioned).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellRecord {
    pub cell: Cell,
    pub labels: Vec<String>,
    pub blocks: Vec<String>,
    pub comments: Vec<CommentRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommentRecord {
    pub id: i64,
    pub author: String,
    pub body: String,
    pub created_at: String,
}

/// Serializes every cell in a project — including tombstones, so a peer can
/// learn about deletions — to newline-delimited JSON, one [`CellRecord`]
/// per line, ordered by id for a stable diff.
pub fn export_jsonl(pool: &DbPool, project_key: &str) -> Result<String> {
    let records = load_records(pool, project_key)?;
    let mut out = String::new();
    let mut ids: Vec<&String> = records.keys().collect();
    ids.sort();
    for id in ids {
        out.push_str(&serde_json::to_string(&records[id])?);
        out.push('\n');
    }
    Ok(out)
}

/// Outcome of [`import_jsonl`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub created: u64,
    pub updated_from_remote: u64,
    pub kept_local: u64,
    pub field_merged: u64,
    pub tombstones_expired: u64,
}

/// Three-way merges `incoming` against the live database, using `base` (the
/// snapshot both sides started from, if known) to merge field-by-field
/// rather than picking an entire record as the winner:
///
/// - `status`: a tombstone within [`TOMBSTONE_TTL_DAYS`] on either side
///   wins outright; if both sides are tombstoned, the earlier `deleted_at`
///   wins; otherwise the newer `updated_at` wins (ties, within
///   [`CLOCK_SKEW_GRACE`], go to the local side).
/// - `title`/`description`/`priority`/`assignee`: newer `updated_at` wins,
///   ties go to the local side.
/// - `labels`/`blocks`: set union.
/// - `comments`: union by id — comments are never deleted by a merge.
///
/// Tombstones older than [`TOMBSTONE_TTL_DAYS`] on *both* sides are dropped
/// from the result rather than merged.
pub fn import_jsonl(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    incoming: &str,
    base: Option<&str>,
) -> Result<MergeReport> {
    let incoming_records = parse_jsonl(incoming)?;
    let base_records = base.map(parse_jsonl).transpose()?.unwrap_or_default();
    let local_records = load_records(pool, project_key)?;

    let mut report = MergeReport::default();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let now = Utc::now();

    for (id, incoming_record) in &incoming_records {
        match local_records.get(id) {
            None => {
                if is_expired_tombstone(incoming_record, now) {
                    report.tombstones_expired += 1;
                    continue;
                }
                insert_record(&tx, project_key, incoming_record)?;
                report.created += 1;
            }
            Some(local_record) => {
                if is_expired_tombstone(local_record, now) && is_expired_tombstone(incoming_record, now) {
                    report.tombstones_expired += 1;
                    continue;
                }
                if records_equal(local_record, incoming_record) {
                    report.kept_local += 1;
                    continue;
                }
                let base_record = base_records.get(id);
                let merged = merge_record(base_record, local_record, incoming_record);
                let changed = !records_equal(&merged, local_record);
                apply_record(&tx, project_key, &merged)?;
                if changed {
                    report.field_merged += 1;
                } else {
                    report.kept_local += 1;
                }
            }
        }
    }

    events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::HiveSynced,
        serde_json::json!({
            "created": report.created,
            "field_merged": report.field_merged,
            "kept_local": report.kept_local,
            "tombstones_expired": report.tombstones_expired,
        }),
    )?;
    tx.commit()?;

    Ok(report)
}

fn is_expired_tombstone(record: &CellRecord, now: DateTime<Utc>) -> bool {
    record.cell.status == "tombstone"
        && record.cell.deleted_at.is_some_and(|deleted_at| now - deleted_at > Duration::days(TOMBSTONE_TTL_DAYS))
}

/// `Some(true)` if `a` is newer than `b` outside the skew grace, `Some(false)`
/// if `b` is newer, `None` if they're within the grace (a tie).
fn strictly_newer(a: DateTime<Utc>, b: DateTime<Utc>) -> Option<bool> {
    let diff = a - b;
    if diff > CLOCK_SKEW_GRACE {
        Some(true)
    } else if diff < -CLOCK_SKEW_GRACE {
        Some(false)
    } else {
        None
    }
}

/// Merges `local` and `incoming` field-by-field using `base` (if any) only
/// to detect tombstone recency; `base` itself does not gate which value
/// wins the way the old whole-record three-way merge did.
fn merge_record(_base: Option<&CellRecord>, local: &CellRecord, incoming: &CellRecord) -> CellRecord {
    let local_tombstoned = local.cell.status == "tombstone";
    let incoming_tombstoned = incoming.cell.status == "tombstone";

    let mut merged_cell = local.cell.clone();

    if local_tombstoned && incoming_tombstoned {
        let local_deleted = local.cell.deleted_at.unwrap_or(local.cell.updated_at);
        let incoming_deleted = incoming.cell.deleted_at.unwrap_or(incoming.cell.updated_at);
        if incoming_deleted < local_deleted {
            merged_cell.deleted_at = incoming.cell.deleted_at;
            merged_cell.updated_at = incoming.cell.updated_at;
        }
    } else if incoming_tombstoned {
        merged_cell.status = incoming.cell.status.clone();
        merged_cell.deleted_at = incoming.cell.deleted_at;
        merged_cell.updated_at = incoming.cell.updated_at;
    } else if local_tombstoned {
        // local tombstone wins outright; nothing to change.
    } else if strictly_newer(incoming.cell.updated_at, local.cell.updated_at).unwrap_or(false) {
        merged_cell.status = incoming.cell.status.clone();
        merged_cell.closed_at = incoming.cell.closed_at;
        merged_cell.updated_at = incoming.cell.updated_at;
        merged_cell.title = incoming.cell.title.clone();
        merged_cell.description = incoming.cell.description.clone();
        merged_cell.priority = incoming.cell.priority;
        merged_cell.assignee = incoming.cell.assignee.clone();
    }

    let labels: HashSet<String> = local.labels.iter().chain(incoming.labels.iter()).cloned().collect();
    let blocks: HashSet<String> = local.blocks.iter().chain(incoming.blocks.iter()).cloned().collect();
    let mut comment_ids: HashSet<i64> = HashSet::new();
    let mut comments = Vec::new();
    for comment in local.comments.iter().chain(incoming.comments.iter()) {
        if comment_ids.insert(comment.id) {
            comments.push(comment.clone());
        }
    }
    comments.sort_by_key(|c| c.id);

    let mut labels: Vec<String> = labels.into_iter().collect();
    labels.sort();
    let mut blocks: Vec<String> = blocks.into_iter().collect();
    blocks.sort();

    CellRecord { cell: merged_cell, labels, blocks, comments }
}

fn records_equal(a: &CellRecord, b: &CellRecord) -> bool {
    a.cell.updated_at == b.cell.updated_at
        && a.cell.status == b.cell.status
        && a.cell.title == b.cell.title
        && a.cell.description == b.cell.description
        && a.cell.priority == b.cell.priority
        && a.cell.assignee == b.cell.assignee
        && a.cell.deleted_at == b.cell.deleted_at
        && a.labels == b.labels
        && a.blocks == b.blocks
        && a.comments == b.comments
}

fn parse_jsonl(data: &str) -> Result<HashMap<String, CellRecord>> {
    let mut records = HashMap::new();
    for (line_number, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: CellRecord = serde_json::from_str(line)
            .map_err(|e| Error::Validation(format!("jsonl line {}: {e}", line_number + 1)))?;
        records.insert(record.cell.id.clone(), record);
    }
    Ok(records)
}

fn load_records(pool: &DbPool, project_key: &str) -> Result<HashMap<String, CellRecord>> {
    let cells = crate::cells::list_all(pool, project_key)?;
    let conn = pool.get()?;
    let mut records = HashMap::new();
    for cell in cells {
        let labels = query_strings(
            &conn,
            "SELECT name FROM cell_labels WHERE cell_id = ?1 ORDER BY name",
            &cell.id,
        )?;
        let blocks = query_strings(
            &conn,
            "SELECT to_cell FROM cell_dependencies WHERE from_cell = ?1 AND relationship = 'blocks' ORDER BY to_cell",
            &cell.id,
        )?;
        let comments = query_comments(&conn, &cell.id)?;
        let id = cell.id.clone();
        records.insert(id, CellRecord { cell, labels, blocks, comments });
    }
    Ok(records)
}

fn query_strings(conn: &rusqlite::Connection, sql: &str, cell_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![cell_id], |row| row.get::<_, String>(0))?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn query_comments(conn: &rusqlite::Connection, cell_id: &str) -> Result<Vec<CommentRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, author, body, created_at FROM cell_comments WHERE cell_id = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![cell_id], |row| {
        Ok(CommentRecord {
            id: row.get(0)?,
            author: row.get(1)?,
            body: row.get(2)?,
            created_at: row.get(3)?,
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn insert_record(tx: &rusqlite::Transaction<'_>, project_key: &str, record: &CellRecord) -> Result<()> {
    let cell = &record.cell;
    let metadata_json = serde_json::to_string(&cell.metadata)?;
    tx.execute(
        "INSERT INTO cells
            (id, project_key, title, description, status, priority, issue_type, parent_id,
             assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            cell.id, project_key, cell.title, cell.description, cell.status, cell.priority,
            cell.issue_type, cell.parent_id, cell.assignee, cell.created_at.to_rfc3339(),
            cell.updated_at.to_rfc3339(), cell.closed_at.map(|t| t.to_rfc3339()),
            cell.deleted_at.map(|t| t.to_rfc3339()), i64::from(cell.is_blocked), metadata_json,
        ],
    )?;
    sync_labels_blocks_comments(tx, record)
}

fn apply_record(tx: &rusqlite::Transaction<'_>, project_key: &str, record: &CellRecord) -> Result<()> {
    let cell = &record.cell;
    let metadata_json = serde_json::to_string(&cell.metadata)?;
    tx.execute(
        "UPDATE cells SET project_key = ?2, title = ?3, description = ?4, status = ?5,
                priority = ?6, issue_type = ?7, parent_id = ?8, assignee = ?9, updated_at = ?10,
                closed_at = ?11, deleted_at = ?12, is_blocked = ?13, metadata_json = ?14
         WHERE id = ?1",
        params![
            cell.id, project_key, cell.title, cell.description, cell.status, cell.priority,
            cell.issue_type, cell.parent_id, cell.assignee, cell.updated_at.to_rfc3339(),
            cell.closed_at.map(|t| t.to_rfc3339()), cell.deleted_at.map(|t| t.to_rfc3339()),
            i64::from(cell.is_blocked), metadata_json,
        ],
    )?;
    sync_labels_blocks_comments(tx, record)
}

fn sync_labels_blocks_comments(tx: &rusqlite::Transaction<'_>, record: &CellRecord) -> Result<()> {
    tx.execute("DELETE FROM cell_labels WHERE cell_id = ?1", params![record.cell.id])?;
    for label in &record.labels {
        tx.execute(
            "INSERT OR IGNORE INTO cell_labels (cell_id, name) VALUES (?1, ?2)",
            params![record.cell.id, label],
        )?;
    }
    tx.execute(
        "DELETE FROM cell_dependencies WHERE from_cell = ?1 AND relationship = 'blocks'",
        params![record.cell.id],
    )?;
    for blocked in &record.blocks {
        tx.execute(
            "INSERT OR IGNORE INTO cell_dependencies (from_cell, to_cell, relationship)
             VALUES (?1, ?2, 'blocks')",
            params![record.cell.id, blocked],
        )?;
    }
    for comment in &record.comments {
        tx.execute(
            "INSERT OR IGNORE INTO cell_comments (id, cell_id, author, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![comment.id, record.cell.id, comment.author, comment.body, comment.created_at],
        )?;
    }
    Ok(())
}
