//! Cell CRUD, status transitions, labels, and comments.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use substrate_core::error::{Error, Result};
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

use crate::models::{generate_cell_id, generate_subtask_id, Cell, CellComment, CellStatus};

const MAX_TITLE_LEN: usize = 500;

/// Fields accepted when creating a cell.
#[derive(Debug, Clone, Default)]
pub struct NewCell {
    pub title: String,
    pub description: Option<String>,
    pub priority: i32,
    pub issue_type: String,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    pub id: Option<String>,
    pub metadata: serde_json::Value,
}

fn validate_new_cell(new: &NewCell) -> Result<()> {
    if new.title.trim().is_empty() {
        return Err(Error::Validation("cell title must not be empty".to_string()));
    }
    if new.title.len() > MAX_TITLE_LEN {
        return Err(Error::Validation(format!("cell title exceeds {MAX_TITLE_LEN} characters")));
    }
    if !(0..=4).contains(&new.priority) {
        return Err(Error::Validation("cell priority must be between 0 and 4".to_string()));
    }
    Ok(())
}

pub fn create(pool: &DbPool, events: &EventStore, project_key: &str, new: NewCell) -> Result<Cell> {
    validate_new_cell(&new)?;
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    if let Some(parent_id) = &new.parent_id {
        let exists: Option<()> = tx
            .query_row("SELECT 1 FROM cells WHERE id = ?1", params![parent_id], |_| Ok(()))
            .optional()?;
        if exists.is_none() {
            return Err(Error::CellNotFound(parent_id.clone()));
        }
    }

    let now = Utc::now();
    let id = match &new.id {
        Some(id) => id.clone(),
        None => match &new.parent_id {
            Some(parent_id) => {
                let child_count: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM cells WHERE parent_id = ?1",
                    params![parent_id],
                    |row| row.get(0),
                )?;
                generate_subtask_id(parent_id, u32::try_from(child_count).unwrap_or(0) + 1)
            }
            None => generate_cell_id(project_key, &new.title, now.timestamp_nanos_opt().unwrap_or_default()),
        },
    };
    let issue_type = if new.issue_type.is_empty() { "task".to_string() } else { new.issue_type };
    let metadata_json = serde_json::to_string(&new.metadata)?;

    tx.execute(
        "INSERT INTO cells
            (id, project_key, title, description, status, priority, issue_type, parent_id,
             assignee, created_at, updated_at, metadata_json)
         VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?7, ?8, ?9, ?9, ?10)",
        params![
            id, project_key, new.title, new.description, new.priority, issue_type,
            new.parent_id, new.assignee, now.to_rfc3339(), metadata_json,
        ],
    )?;

    let event = events.insert_event_in_tx(&tx, project_key, EventType::CellCreated, serde_json::json!({ "cell_id": id }))?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    get(pool, &id)
}

/// One subtask requested of [`create_epic`].
#[derive(Debug, Clone, Default)]
pub struct NewSubtask {
    pub title: String,
    pub description: Option<String>,
    pub priority: i32,
    pub files: Vec<String>,
    pub id_suffix: Option<String>,
}

pub struct EpicResult {
    pub epic: Cell,
    pub subtasks: Vec<Cell>,
}

/// Creates an epic cell plus its subtasks as a single atomic operation.
/// Appends `epic_created` and one `cell_created` per subtask.
pub fn create_epic(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    title: String,
    description: Option<String>,
    subtasks: Vec<NewSubtask>,
) -> Result<EpicResult> {
    validate_new_cell(&NewCell { title: title.clone(), priority: 2, ..Default::default() })?;
    let now = Utc::now();
    let epic_id = generate_cell_id(project_key, &title, now.timestamp_nanos_opt().unwrap_or_default());
    let metadata_json = serde_json::to_string(&serde_json::json!({}))?;

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO cells
            (id, project_key, title, description, status, priority, issue_type, parent_id,
             assignee, created_at, updated_at, metadata_json)
         VALUES (?1, ?2, ?3, ?4, 'open', 2, 'epic', NULL, NULL, ?5, ?5, ?6)",
        params![epic_id, project_key, title, description, now.to_rfc3339(), metadata_json],
    )?;
    let mut subtask_ids = Vec::with_capacity(subtasks.len());
    for (n, subtask) in subtasks.iter().enumerate() {
        validate_new_cell(&NewCell { title: subtask.title.clone(), priority: subtask.priority, ..Default::default() })?;
        let subtask_id = subtask
            .id_suffix
            .clone()
            .map(|suffix| format!("{epic_id}.{suffix}"))
            .unwrap_or_else(|| generate_subtask_id(&epic_id, u32::try_from(n).unwrap_or(0) + 1));
        let subtask_metadata = serde_json::to_string(&serde_json::json!({ "files": subtask.files }))?;
        tx.execute(
            "INSERT INTO cells
                (id, project_key, title, description, status, priority, issue_type, parent_id,
                 assignee, created_at, updated_at, metadata_json)
             VALUES (?1, ?2, ?3, ?4, 'open', ?5, 'task', ?6, NULL, ?7, ?7, ?8)",
            params![
                subtask_id, project_key, subtask.title, subtask.description, subtask.priority,
                epic_id, now.to_rfc3339(), subtask_metadata,
            ],
        )?;
        events.insert_event_in_tx(&tx, project_key, EventType::CellCreated, serde_json::json!({ "cell_id": subtask_id }))?;
        subtask_ids.push(subtask_id);
    }

    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::EpicCreated,
        serde_json::json!({ "epic_id": epic_id, "subtask_ids": subtask_ids }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    let epic = get(pool, &epic_id)?;
    let subtasks = subtask_ids.iter().map(|id| get(pool, id)).collect::<Result<Vec<_>>>()?;
    Ok(EpicResult { epic, subtasks })
}

pub fn get(pool: &DbPool, cell_id: &str) -> Result<Cell> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells WHERE id = ?1 AND deleted_at IS NULL",
        params![cell_id],
        row_to_cell,
    )
    .optional()?
    .ok_or_else(|| Error::CellNotFound(cell_id.to_string()))
}

/// Filters for [`query`].
#[derive(Debug, Clone, Default)]
pub struct CellFilter {
    pub status: Option<String>,
    pub issue_type: Option<String>,
    pub assignee: Option<String>,
    pub parent_id: Option<String>,
    pub label: Option<String>,
    pub limit: Option<u32>,
}

pub fn query(pool: &DbPool, project_key: &str, filter: &CellFilter) -> Result<Vec<Cell>> {
    let conn = pool.get()?;
    let mut sql = String::from(
        "SELECT DISTINCT c.id, c.project_key, c.title, c.description, c.status, c.priority,
                c.issue_type, c.parent_id, c.assignee, c.created_at, c.updated_at, c.closed_at,
                c.deleted_at, c.is_blocked, c.metadata_json
         FROM cells c",
    );
    if filter.label.is_some() {
        sql.push_str(" JOIN cell_labels l ON l.cell_id = c.id");
    }
    sql.push_str(" WHERE c.project_key = ?1 AND c.deleted_at IS NULL");

    let mut params_values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(project_key.to_string())];
    if let Some(status) = &filter.status {
        sql.push_str(" AND c.status = ?");
        params_values.push(Box::new(status.clone()));
    }
    if let Some(issue_type) = &filter.issue_type {
        sql.push_str(" AND c.issue_type = ?");
        params_values.push(Box::new(issue_type.clone()));
    }
    if let Some(assignee) = &filter.assignee {
        sql.push_str(" AND c.assignee = ?");
        params_values.push(Box::new(assignee.clone()));
    }
    if let Some(parent_id) = &filter.parent_id {
        sql.push_str(" AND c.parent_id = ?");
        params_values.push(Box::new(parent_id.clone()));
    }
    if let Some(label) = &filter.label {
        sql.push_str(" AND l.name = ?");
        params_values.push(Box::new(label.clone()));
    }
    sql.push_str(" ORDER BY c.created_at ASC LIMIT ?");
    params_values.push(Box::new(i64::from(filter.limit.unwrap_or(20))));

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = params_values.iter().map(std::convert::AsRef::as_ref).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_cell)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

/// Fields accepted by [`update`]. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default)]
pub struct CellUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<i32>,
    pub assignee: Option<String>,
    pub status: Option<CellStatus>,
    /// Recorded on the `cell_closed` event when `status` transitions to
    /// [`CellStatus::Closed`]. Ignored otherwise.
    pub close_reason: Option<String>,
    /// Recorded alongside `close_reason` on the `cell_closed` event.
    pub close_result: Option<String>,
}

/// Applies field edits and, if `status` is set, a validated transition.
/// Appends `cell_updated` and, if status changed, `cell_status_changed`.
pub fn update(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str, patch: CellUpdate) -> Result<Cell> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let current = tx
        .query_row(
            "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                    assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
             FROM cells WHERE id = ?1 AND deleted_at IS NULL",
            params![cell_id],
            row_to_cell,
        )
        .optional()?
        .ok_or_else(|| Error::CellNotFound(cell_id.to_string()))?;

    let mut next_status = CellStatus::from_str(&current.status)
        .ok_or_else(|| Error::CorruptedData(format!("cell {cell_id} has unknown status {}", current.status)))?;
    let mut status_changed = false;
    if let Some(requested) = patch.status {
        if requested == CellStatus::Tombstone {
            return Err(Error::Validation("use delete() to tombstone a cell".to_string()));
        }
        if !next_status.can_transition_to(requested) {
            return Err(Error::InvalidStatusTransition {
                cell_id: cell_id.to_string(),
                from: next_status.as_str().to_string(),
                to: requested.as_str().to_string(),
                hint: "reopen to open before transitioning elsewhere".to_string(),
            });
        }
        status_changed = requested != next_status;
        next_status = requested;
    }

    let now = Utc::now();
    let title = patch.title.unwrap_or(current.title);
    let description = patch.description.or(current.description);
    let priority = patch.priority.unwrap_or(current.priority);
    let assignee = patch.assignee.or(current.assignee);
    let closed_at = if next_status == CellStatus::Closed {
        current.closed_at.map(|t| t.to_rfc3339()).or_else(|| Some(now.to_rfc3339()))
    } else {
        None
    };

    tx.execute(
        "UPDATE cells SET title = ?1, description = ?2, priority = ?3, assignee = ?4,
                status = ?5, updated_at = ?6, closed_at = ?7
         WHERE id = ?8",
        params![title, description, priority, assignee, next_status.as_str(), now.to_rfc3339(), closed_at, cell_id],
    )?;

    let event = events.insert_event_in_tx(&tx, project_key, EventType::CellUpdated, serde_json::json!({ "cell_id": cell_id }))?;
    if status_changed {
        events.insert_event_in_tx(
            &tx,
            project_key,
            EventType::CellStatusChanged,
            serde_json::json!({ "cell_id": cell_id, "from": current.status, "to": next_status.as_str() }),
        )?;
        if next_status == CellStatus::Closed {
            events.insert_event_in_tx(
                &tx,
                project_key,
                EventType::CellClosed,
                serde_json::json!({ "cell_id": cell_id, "reason": patch.close_reason, "result": patch.close_result }),
            )?;
        }
    }
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    if status_changed {
        crate::graph::rebuild_blocked_cache(pool, project_key)?;
    }
    get(pool, cell_id)
}

/// Transitions a cell's status directly, enforcing
/// [`CellStatus::can_transition_to`]. A thin wrapper over [`update`].
pub fn set_status(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str, next: CellStatus) -> Result<Cell> {
    update(pool, events, project_key, cell_id, CellUpdate { status: Some(next), ..Default::default() })
}

/// Closes a cell: sets `status=closed`, `closed_at=now`. `reason` and an
/// optional `result` summary are recorded on the `cell_closed` event.
pub fn close(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str, reason: &str, result: Option<&str>) -> Result<Cell> {
    update(
        pool,
        events,
        project_key,
        cell_id,
        CellUpdate {
            status: Some(CellStatus::Closed),
            close_reason: Some(reason.to_string()),
            close_result: result.map(str::to_string),
            ..Default::default()
        },
    )
}

/// Reopens a closed cell back to `open`. Fails if the cell is not closed.
pub fn reopen(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str) -> Result<Cell> {
    set_status(pool, events, project_key, cell_id, CellStatus::Open)
}

/// Soft-deletes a cell: `status=tombstone`, `deleted_at=now`. Tombstones are
/// retained (for merge reconciliation) rather than hard-deleted here.
/// `reason` is recorded on the `cell_deleted` event.
pub fn delete(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str, reason: &str) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let now = Utc::now();
    let updated = tx.execute(
        "UPDATE cells SET status = 'tombstone', deleted_at = ?1, updated_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now.to_rfc3339(), cell_id],
    )?;
    if updated == 0 {
        return Err(Error::CellNotFound(cell_id.to_string()));
    }
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::CellDeleted,
        serde_json::json!({ "cell_id": cell_id, "reason": reason }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);
    crate::graph::rebuild_blocked_cache(pool, project_key)?;
    Ok(())
}

/// Fetches a cell regardless of tombstone/delete state — used by export and
/// partial-id resolution, which must still see tombstones.
pub fn get_including_deleted(pool: &DbPool, cell_id: &str) -> Result<Cell> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells WHERE id = ?1",
        params![cell_id],
        row_to_cell,
    )
    .optional()?
    .ok_or_else(|| Error::CellNotFound(cell_id.to_string()))
}

/// Lists every cell in a project, tombstones included — used by export.
pub fn list_all(pool: &DbPool, project_key: &str) -> Result<Vec<Cell>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, project_key, title, description, status, priority, issue_type, parent_id,
                assignee, created_at, updated_at, closed_at, deleted_at, is_blocked, metadata_json
         FROM cells WHERE project_key = ?1 ORDER BY id",
    )?;
    let rows = stmt.query_map(params![project_key], row_to_cell)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

pub fn add_label(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str, name: &str) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT OR IGNORE INTO cell_labels (cell_id, name) VALUES (?1, ?2)",
        params![cell_id, name],
    )?;
    events.append(
        project_key,
        EventType::CellLabelAdded,
        serde_json::json!({ "cell_id": cell_id, "label": name }),
    )?;
    Ok(())
}

pub fn remove_label(pool: &DbPool, events: &EventStore, project_key: &str, cell_id: &str, name: &str) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "DELETE FROM cell_labels WHERE cell_id = ?1 AND name = ?2",
        params![cell_id, name],
    )?;
    events.append(
        project_key,
        EventType::CellLabelRemoved,
        serde_json::json!({ "cell_id": cell_id, "label": name }),
    )?;
    Ok(())
}

pub fn add_comment(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    cell_id: &str,
    author: &str,
    body: &str,
) -> Result<CellComment> {
    let conn = pool.get()?;
    let now = Utc::now();
    conn.execute(
        "INSERT INTO cell_comments (cell_id, author, body, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![cell_id, author, body, now.to_rfc3339()],
    )?;
    let id = conn.last_insert_rowid();
    events.append(
        project_key,
        EventType::CellCommentAdded,
        serde_json::json!({ "cell_id": cell_id, "comment_id": id }),
    )?;
    Ok(CellComment {
        id: Some(id),
        cell_id: cell_id.to_string(),
        author: author.to_string(),
        body: body.to_string(),
        created_at: now,
    })
}

pub(crate) fn row_to_cell(row: &rusqlite::Row<'_>) -> rusqlite::Result<Cell> {
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    let closed_at: Option<String> = row.get(11)?;
    let deleted_at: Option<String> = row.get(12)?;
    let metadata_json: String = row.get(14)?;
    Ok(Cell {
        id: row.get(0)?,
        project_key: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        issue_type: row.get(6)?,
        parent_id: row.get(7)?,
        assignee: row.get(8)?,
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        closed_at: closed_at.map(|s| parse_ts(&s)),
        deleted_at: deleted_at.map(|s| parse_ts(&s)),
        is_blocked: row.get::<_, i64>(13)? != 0,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
    })
}

pub(crate) fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn create_and_get_round_trip() {
        let (pool, events, _tmp) = setup();
        let cell = create(&pool, &events, "proj", NewCell { title: "fix bug".into(), ..Default::default() }).unwrap();
        assert_eq!(cell.status, "open");
        let fetched = get(&pool, &cell.id).unwrap();
        assert_eq!(fetched.title, "fix bug");
    }

    #[test]
    fn create_with_missing_parent_errors() {
        let (pool, events, _tmp) = setup();
        let err = create(&pool, &events, "proj", NewCell {
            title: "child".into(),
            parent_id: Some("nonexistent".into()),
            ..Default::default()
        }).unwrap_err();
        assert!(matches!(err, Error::CellNotFound(_)));
    }

    #[test]
    fn create_rejects_empty_title() {
        let (pool, events, _tmp) = setup();
        let err = create(&pool, &events, "proj", NewCell::default()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn valid_status_transition_succeeds() {
        let (pool, events, _tmp) = setup();
        let cell = create(&pool, &events, "proj", NewCell { title: "t".into(), ..Default::default() }).unwrap();
        let updated = set_status(&pool, &events, "proj", &cell.id, CellStatus::InProgress).unwrap();
        assert_eq!(updated.status, "in_progress");
    }

    #[test]
    fn invalid_status_transition_rejected() {
        let (pool, events, _tmp) = setup();
        let cell = create(&pool, &events, "proj", NewCell { title: "t".into(), ..Default::default() }).unwrap();
        close(&pool, &events, "proj", &cell.id, "done", None).unwrap();
        let err = set_status(&pool, &events, "proj", &cell.id, CellStatus::InProgress).unwrap_err();
        assert!(matches!(err, Error::InvalidStatusTransition { .. }));
    }

    #[test]
    fn update_cannot_target_tombstone() {
        let (pool, events, _tmp) = setup();
        let cell = create(&pool, &events, "proj", NewCell { title: "t".into(), ..Default::default() }).unwrap();
        let err = update(&pool, &events, "proj", &cell.id, CellUpdate {
            status: Some(CellStatus::Tombstone),
            ..Default::default()
        }).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn reopen_only_works_from_closed() {
        let (pool, events, _tmp) = setup();
        let cell = create(&pool, &events, "proj", NewCell { title: "t".into(), ..Default::default() }).unwrap();
        close(&pool, &events, "proj", &cell.id, "done", None).unwrap();
        let reopened = reopen(&pool, &events, "proj", &cell.id).unwrap();
        assert_eq!(reopened.status, "open");
    }

    #[test]
    fn query_filters_by_status() {
        let (pool, events, _tmp) = setup();
        let a = create(&pool, &events, "proj", NewCell { title: "a".into(), ..Default::default() }).unwrap();
        create(&pool, &events, "proj", NewCell { title: "b".into(), ..Default::default() }).unwrap();
        set_status(&pool, &events, "proj", &a.id, CellStatus::InProgress).unwrap();

        let open_only = query(&pool, "proj", &CellFilter { status: Some("open".into()), ..Default::default() }).unwrap();
        assert_eq!(open_only.len(), 1);
    }

    #[test]
    fn delete_tombstones_and_hides_cell() {
        let (pool, events, _tmp) = setup();
        let cell = create(&pool, &events, "proj", NewCell { title: "t".into(), ..Default::default() }).unwrap();
        delete(&pool, &events, "proj", &cell.id, "obsolete").unwrap();
        assert!(get(&pool, &cell.id).is_err());
        assert!(query(&pool, "proj", &CellFilter::default()).unwrap().is_empty());
        assert_eq!(get_including_deleted(&pool, &cell.id).unwrap().status, "tombstone");
    }

    #[test]
    fn close_and_delete_record_reason_and_result_on_their_events() {
        use substrate_events::ReadFilter;

        let (pool, events, _tmp) = setup();
        let closed = create(&pool, &events, "proj", NewCell { title: "t1".into(), ..Default::default() }).unwrap();
        close(&pool, &events, "proj", &closed.id, "shipped", Some("v1.2.0")).unwrap();
        let closed_event = events
            .read(
                "proj",
                &ReadFilter { types: Some(vec!["cell_closed".to_string()]), ..Default::default() },
            )
            .unwrap()
            .into_iter()
            .find(|e| e.data["cell_id"] == closed.id)
            .unwrap();
        assert_eq!(closed_event.data["reason"], "shipped");
        assert_eq!(closed_event.data["result"], "v1.2.0");

        let deleted = create(&pool, &events, "proj", NewCell { title: "t2".into(), ..Default::default() }).unwrap();
        delete(&pool, &events, "proj", &deleted.id, "duplicate of t1").unwrap();
        let deleted_event = events
            .read(
                "proj",
                &ReadFilter { types: Some(vec!["cell_deleted".to_string()]), ..Default::default() },
            )
            .unwrap()
            .into_iter()
            .find(|e| e.data["cell_id"] == deleted.id)
            .unwrap();
        assert_eq!(deleted_event.data["reason"], "duplicate of t1");
    }

    #[test]
    fn create_epic_creates_epic_and_subtasks() {
        let (pool, events, _tmp) = setup();
        let result = create_epic(&pool, &events, "proj", "Feature F".into(), None, vec![
            NewSubtask { title: "T1".into(), files: vec!["a.ts".into()], ..Default::default() },
            NewSubtask { title: "T2".into(), files: vec!["b.ts".into()], ..Default::default() },
        ]).unwrap();

        assert_eq!(result.epic.issue_type, "epic");
        assert_eq!(result.subtasks.len(), 2);
        assert_eq!(result.subtasks[0].parent_id.as_deref(), Some(result.epic.id.as_str()));
    }
}
