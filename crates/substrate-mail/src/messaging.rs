//! Agent-to-agent messaging: send, inbox, read, ack, thread summaries,
//! full-text search over subject/body.

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use substrate_core::error::{Error, Result};
use substrate_core::models::{Importance, Message, MessageRecipient};
use substrate_db::DbPool;
use substrate_events::{Event, EventStore, EventType, ReadFilter};

use crate::rate_limit;

/// Default and maximum page size for `inbox`.
const INBOX_PAGE_SIZE: i64 = 5;

/// Input to [`send`].
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub sender_id: i64,
    pub recipient_ids: Vec<i64>,
    pub thread_id: Option<String>,
    pub subject: String,
    pub body_md: String,
    pub importance: Importance,
    pub ack_required: bool,
    pub attachments: serde_json::Value,
}

/// A message with its recipients, as returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageView {
    pub message: Message,
    pub recipients: Vec<MessageRecipient>,
}

/// Sends a message to one or more recipients, creating its thread on first
/// use. Rate-limited per `(sender_id, "send")`. Appends `MessageSent` (and
/// `ThreadCreated`/`ThreadActivity`) to the event log in the same
/// transaction as the row writes.
pub fn send(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    rate_limit_disabled: bool,
    req: SendRequest,
) -> Result<MessageView> {
    if req.recipient_ids.is_empty() {
        return Err(Error::Validation("send requires at least one recipient".into()));
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    rate_limit::try_consume(&tx, req.sender_id, "send", rate_limit_disabled)?;

    let now = Utc::now();
    let thread_id = match &req.thread_id {
        Some(id) => {
            let existed: Option<()> = tx
                .query_row(
                    "SELECT 1 FROM threads WHERE thread_id = ?1",
                    params![id],
                    |_| Ok(()),
                )
                .optional()?;
            if existed.is_none() {
                tx.execute(
                    "INSERT INTO threads (thread_id, project_key, created_at, last_activity_at)
                     VALUES (?1, ?2, ?3, ?3)",
                    params![id, project_key, now.to_rfc3339()],
                )?;
                events.insert_event_in_tx(
                    &tx,
                    project_key,
                    EventType::ThreadCreated,
                    serde_json::json!({ "thread_id": id }),
                )?;
            } else {
                tx.execute(
                    "UPDATE threads SET last_activity_at = ?1 WHERE thread_id = ?2",
                    params![now.to_rfc3339(), id],
                )?;
            }
            id.clone()
        }
        None => {
            let id = format!("th-{}", uuid_like(&now));
            tx.execute(
                "INSERT INTO threads (thread_id, project_key, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?3)",
                params![id, project_key, now.to_rfc3339()],
            )?;
            events.insert_event_in_tx(
                &tx,
                project_key,
                EventType::ThreadCreated,
                serde_json::json!({ "thread_id": id }),
            )?;
            id
        }
    };

    let attachments_json = serde_json::to_string(&req.attachments)?;
    tx.execute(
        "INSERT INTO messages
            (project_key, sender_id, thread_id, subject, body_md, importance,
             ack_required, created_at, attachments)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            project_key,
            req.sender_id,
            thread_id,
            req.subject,
            req.body_md,
            req.importance.as_str(),
            i64::from(req.ack_required),
            now.to_rfc3339(),
            attachments_json,
        ],
    )?;
    let message_id = tx.last_insert_rowid();

    let mut recipients = Vec::with_capacity(req.recipient_ids.len());
    for agent_id in &req.recipient_ids {
        tx.execute(
            "INSERT INTO message_recipients (message_id, agent_id) VALUES (?1, ?2)",
            params![message_id, agent_id],
        )?;
        recipients.push(MessageRecipient {
            message_id,
            agent_id: *agent_id,
            read_at: None,
            acked_at: None,
        });
    }

    events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MessageSent,
        serde_json::json!({
            "message_id": message_id,
            "thread_id": thread_id,
            "sender_id": req.sender_id,
            "recipient_ids": req.recipient_ids,
            "importance": req.importance.as_str(),
            "ack_required": req.ack_required,
        }),
    )?;
    events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::ThreadActivity,
        serde_json::json!({ "thread_id": thread_id, "message_id": message_id }),
    )?;

    tx.commit()?;
    events.notify_subscribers(
        project_key,
        Event {
            id: message_id,
            project_key: project_key.to_string(),
            event_type: EventType::MessageSent.as_str().to_string(),
            sequence: 0,
            timestamp_ms: now.timestamp_millis(),
            data: serde_json::json!({ "message_id": message_id }),
        },
    );

    Ok(MessageView {
        message: Message {
            id: Some(message_id),
            project_key: project_key.to_string(),
            sender_id: req.sender_id,
            thread_id: Some(thread_id),
            subject: req.subject,
            body_md: req.body_md,
            importance: req.importance.as_str().to_string(),
            ack_required: req.ack_required,
            created_at: now,
            attachments: attachments_json,
        },
        recipients,
    })
}

/// Filters for [`inbox`]. `limit` is hard-capped at [`INBOX_PAGE_SIZE`]: a
/// contract with the caller's context budget, not a soft default.
#[derive(Debug, Clone)]
pub struct InboxOptions {
    pub limit: i64,
    pub urgent_only: bool,
    pub since_ts: Option<DateTime<Utc>>,
}

impl Default for InboxOptions {
    fn default() -> Self {
        Self { limit: INBOX_PAGE_SIZE, urgent_only: false, since_ts: None }
    }
}

/// Returns up to `limit` (hard-capped at [`INBOX_PAGE_SIZE`]) messages for
/// `agent_id`, newest first, regardless of how many total messages are
/// queued. There is no deleted state: messages already read remain in the
/// inbox listing, so this never filters on `read_at`.
pub fn inbox(pool: &DbPool, agent_id: i64, opts: &InboxOptions) -> Result<Vec<MessageView>> {
    let limit = opts.limit.clamp(0, INBOX_PAGE_SIZE);
    if limit == 0 {
        return Ok(Vec::new());
    }

    let conn = pool.get()?;
    let mut sql = String::from(
        "SELECT m.id, m.project_key, m.sender_id, m.thread_id, m.subject, m.body_md,
                m.importance, m.ack_required, m.created_at, m.attachments
         FROM messages m
         JOIN message_recipients r ON r.message_id = m.id
         WHERE r.agent_id = ?1",
    );
    let mut params_values: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(agent_id)];
    if opts.urgent_only {
        sql.push_str(" AND m.importance = ?");
        params_values.push(Box::new(Importance::Urgent.as_str()));
    }
    if let Some(since_ts) = opts.since_ts {
        sql.push_str(" AND m.created_at > ?");
        params_values.push(Box::new(since_ts.to_rfc3339()));
    }
    sql.push_str(" ORDER BY m.created_at DESC LIMIT ?");
    params_values.push(Box::new(limit));

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = params_values.iter().map(std::convert::AsRef::as_ref).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_message)?;

    let mut views = Vec::new();
    for row in rows {
        let message = row?;
        let recipients = recipients_for(&conn, message.id.expect("persisted message has id"))?;
        views.push(MessageView { message, recipients });
    }
    Ok(views)
}

/// Marks a message as read for `agent_id` and returns it. Idempotent:
/// re-reading an already-read message is not an error.
pub fn read(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    message_id: i64,
    agent_id: i64,
) -> Result<MessageView> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let exists: Option<()> = tx
        .query_row(
            "SELECT 1 FROM message_recipients WHERE message_id = ?1 AND agent_id = ?2",
            params![message_id, agent_id],
            |_| Ok(()),
        )
        .optional()?;
    if exists.is_none() {
        return Err(Error::MessageNotFound(message_id));
    }

    let already_read: Option<String> = tx
        .query_row(
            "SELECT read_at FROM message_recipients WHERE message_id = ?1 AND agent_id = ?2",
            params![message_id, agent_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();

    if already_read.is_none() {
        let now = Utc::now();
        tx.execute(
            "UPDATE message_recipients SET read_at = ?1 WHERE message_id = ?2 AND agent_id = ?3",
            params![now.to_rfc3339(), message_id, agent_id],
        )?;
        events.insert_event_in_tx(
            &tx,
            project_key,
            EventType::MessageRead,
            serde_json::json!({ "message_id": message_id, "agent_id": agent_id }),
        )?;
    }

    let message = tx.query_row(
        "SELECT id, project_key, sender_id, thread_id, subject, body_md,
                importance, ack_required, created_at, attachments
         FROM messages WHERE id = ?1",
        params![message_id],
        row_to_message,
    )?;
    let recipients = recipients_for(&tx, message_id)?;
    tx.commit()?;

    Ok(MessageView { message, recipients })
}

/// Acknowledges a message for `agent_id`. Errors if the message does not
/// require acknowledgement, or the agent is not a recipient.
pub fn ack(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    message_id: i64,
    agent_id: i64,
) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let ack_required: Option<bool> = tx
        .query_row(
            "SELECT ack_required FROM messages WHERE id = ?1",
            params![message_id],
            |row| row.get::<_, i64>(0),
        )
        .optional()?
        .map(|v| v != 0);

    match ack_required {
        None => return Err(Error::MessageNotFound(message_id)),
        Some(false) => {
            return Err(Error::Validation(format!(
                "message {message_id} does not require acknowledgement"
            )));
        }
        Some(true) => {}
    }

    let updated = tx.execute(
        "UPDATE message_recipients SET acked_at = ?1
         WHERE message_id = ?2 AND agent_id = ?3 AND acked_at IS NULL",
        params![Utc::now().to_rfc3339(), message_id, agent_id],
    )?;
    if updated == 0 {
        let is_recipient: Option<()> = tx
            .query_row(
                "SELECT 1 FROM message_recipients WHERE message_id = ?1 AND agent_id = ?2",
                params![message_id, agent_id],
                |_| Ok(()),
            )
            .optional()?;
        if is_recipient.is_none() {
            return Err(Error::MessageNotFound(message_id));
        }
    }

    events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MessageAcked,
        serde_json::json!({ "message_id": message_id, "agent_id": agent_id }),
    )?;
    tx.commit()?;
    Ok(())
}

/// A compact summary of a thread: message count, participants, last
/// activity, and how many messages are still unread or unacked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub message_count: i64,
    pub participant_ids: Vec<i64>,
    pub last_activity_at: DateTime<Utc>,
    pub unread_count: i64,
    pub pending_ack_count: i64,
}

pub fn summarize_thread(pool: &DbPool, thread_id: &str) -> Result<ThreadSummary> {
    let conn = pool.get()?;

    let last_activity_at: String = conn
        .query_row(
            "SELECT last_activity_at FROM threads WHERE thread_id = ?1",
            params![thread_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::ThreadNotFound(thread_id.to_string()))?;

    let message_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
        params![thread_id],
        |row| row.get(0),
    )?;

    let mut stmt = conn.prepare(
        "SELECT DISTINCT sender_id FROM messages WHERE thread_id = ?1
         UNION
         SELECT DISTINCT r.agent_id FROM message_recipients r
         JOIN messages m ON m.id = r.message_id WHERE m.thread_id = ?1",
    )?;
    let participant_ids = stmt
        .query_map(params![thread_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let unread_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM message_recipients r JOIN messages m ON m.id = r.message_id
         WHERE m.thread_id = ?1 AND r.read_at IS NULL",
        params![thread_id],
        |row| row.get(0),
    )?;

    let pending_ack_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM message_recipients r JOIN messages m ON m.id = r.message_id
         WHERE m.thread_id = ?1 AND m.ack_required = 1 AND r.acked_at IS NULL",
        params![thread_id],
        |row| row.get(0),
    )?;

    Ok(ThreadSummary {
        thread_id: thread_id.to_string(),
        message_count,
        participant_ids,
        last_activity_at: DateTime::parse_from_rfc3339(&last_activity_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::CorruptedData(format!("thread {thread_id} timestamp: {e}")))?,
        unread_count,
        pending_ack_count,
    })
}

/// Full-text search over `subject`/`body_md` via the `messages_fts` virtual
/// table, scoped to messages a given agent can see (sender or recipient).
pub fn search(pool: &DbPool, agent_id: i64, query: &str, limit: i64) -> Result<Vec<Message>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT m.id, m.project_key, m.sender_id, m.thread_id, m.subject, m.body_md,
                m.importance, m.ack_required, m.created_at, m.attachments
         FROM messages_fts f
         JOIN messages m ON m.id = f.rowid
         WHERE messages_fts MATCH ?1
           AND (m.sender_id = ?2 OR EXISTS (
                SELECT 1 FROM message_recipients r WHERE r.message_id = m.id AND r.agent_id = ?2))
         ORDER BY rank
         LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![query, agent_id, limit], row_to_message)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn recipients_for(conn: &rusqlite::Connection, message_id: i64) -> Result<Vec<MessageRecipient>> {
    let mut stmt = conn.prepare(
        "SELECT message_id, agent_id, read_at, acked_at FROM message_recipients
         WHERE message_id = ?1",
    )?;
    let rows = stmt.query_map(params![message_id], |row| {
        Ok(MessageRecipient {
            message_id: row.get(0)?,
            agent_id: row.get(1)?,
            read_at: parse_opt_ts(row.get::<_, Option<String>>(2)?),
            acked_at: parse_opt_ts(row.get::<_, Option<String>>(3)?),
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_at: String = row.get(8)?;
    Ok(Message {
        id: Some(row.get(0)?),
        project_key: row.get(1)?,
        sender_id: row.get(2)?,
        thread_id: row.get(3)?,
        subject: row.get(4)?,
        body_md: row.get(5)?,
        importance: row.get(6)?,
        ack_required: row.get::<_, i64>(7)? != 0,
        created_at: parse_ts(&created_at),
        attachments: row.get(9)?,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_ts(&s))
}

fn uuid_like(now: &DateTime<Utc>) -> String {
    format!("{:x}", now.timestamp_nanos_opt().unwrap_or_default())
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
        let conn = pool.get().unwrap();
        conn.execute(
            "INSERT INTO agents (project_key, name, registered_at, last_active_at)
             VALUES ('proj', 'agent-a', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO agents (project_key, name, registered_at, last_active_at)
             VALUES ('proj', 'agent-b', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .unwrap();
        drop(conn);
        let events = EventStore::new(registry);
        (pool, events, tmp)
    }

    fn send_req(sender: i64, recipient: i64) -> SendRequest {
        SendRequest {
            sender_id: sender,
            recipient_ids: vec![recipient],
            thread_id: None,
            subject: "hello".into(),
            body_md: "world".into(),
            importance: Importance::Normal,
            ack_required: false,
            attachments: serde_json::json!([]),
        }
    }

    #[test]
    fn send_creates_thread_and_delivers_to_recipient() {
        let (pool, events, _tmp) = setup();
        let view = send(&pool, &events, "proj", false, send_req(1, 2)).unwrap();
        assert!(view.message.thread_id.is_some());
        assert_eq!(view.recipients.len(), 1);

        let inbox_items = inbox(&pool, 2, &InboxOptions::default()).unwrap();
        assert_eq!(inbox_items.len(), 1);
    }

    #[test]
    fn inbox_caps_at_five_regardless_of_total_unread() {
        let (pool, events, _tmp) = setup();
        for _ in 0..8 {
            send(&pool, &events, "proj", true, send_req(1, 2)).unwrap();
        }
        assert_eq!(inbox(&pool, 2, &InboxOptions::default()).unwrap().len(), 5);
    }

    #[test]
    fn inbox_limit_zero_returns_empty_and_caller_limit_above_five_is_clamped() {
        let (pool, events, _tmp) = setup();
        for _ in 0..8 {
            send(&pool, &events, "proj", true, send_req(1, 2)).unwrap();
        }
        assert_eq!(inbox(&pool, 2, &InboxOptions { limit: 0, ..Default::default() }).unwrap().len(), 0);
        assert_eq!(inbox(&pool, 2, &InboxOptions { limit: 100, ..Default::default() }).unwrap().len(), 5);
    }

    #[test]
    fn inbox_read_messages_are_retained_not_removed() {
        let (pool, events, _tmp) = setup();
        let view = send(&pool, &events, "proj", false, send_req(1, 2)).unwrap();
        let message_id = view.message.id.unwrap();

        read(&pool, &events, "proj", message_id, 2).unwrap();
        read(&pool, &events, "proj", message_id, 2).unwrap();

        assert_eq!(inbox(&pool, 2, &InboxOptions::default()).unwrap().len(), 1);
    }

    #[test]
    fn inbox_urgent_only_and_since_ts_filter() {
        let (pool, events, _tmp) = setup();
        send(&pool, &events, "proj", false, send_req(1, 2)).unwrap();
        let mut urgent_req = send_req(1, 2);
        urgent_req.importance = Importance::Urgent;
        send(&pool, &events, "proj", false, urgent_req).unwrap();

        let urgent_only = inbox(&pool, 2, &InboxOptions { urgent_only: true, ..Default::default() }).unwrap();
        assert_eq!(urgent_only.len(), 1);
        assert_eq!(urgent_only[0].message.importance, "urgent");

        let future = Utc::now() + chrono::Duration::days(1);
        let nothing_since_future =
            inbox(&pool, 2, &InboxOptions { since_ts: Some(future), ..Default::default() }).unwrap();
        assert!(nothing_since_future.is_empty());
    }

    #[test]
    fn ack_required_message_can_be_acked_once() {
        let (pool, events, _tmp) = setup();
        let mut req = send_req(1, 2);
        req.ack_required = true;
        let view = send(&pool, &events, "proj", false, req).unwrap();
        let message_id = view.message.id.unwrap();

        ack(&pool, &events, "proj", message_id, 2).unwrap();
    }

    #[test]
    fn ack_without_requirement_is_rejected() {
        let (pool, events, _tmp) = setup();
        let view = send(&pool, &events, "proj", false, send_req(1, 2)).unwrap();
        let message_id = view.message.id.unwrap();

        assert!(ack(&pool, &events, "proj", message_id, 2).is_err());
    }

    #[test]
    fn send_is_rate_limited_after_thirty_in_window() {
        let (pool, events, _tmp) = setup();
        for _ in 0..30 {
            send(&pool, &events, "proj", false, send_req(1, 2)).unwrap();
        }
        assert!(send(&pool, &events, "proj", false, send_req(1, 2)).is_err());
    }

    #[test]
    fn summarize_thread_counts_participants_and_unread() {
        let (pool, events, _tmp) = setup();
        let view = send(&pool, &events, "proj", false, send_req(1, 2)).unwrap();
        let thread_id = view.message.thread_id.unwrap();

        let summary = summarize_thread(&pool, &thread_id).unwrap();
        assert_eq!(summary.message_count, 1);
        assert_eq!(summary.unread_count, 1);
        assert!(summary.participant_ids.contains(&1));
        assert!(summary.participant_ids.contains(&2));
    }
}
