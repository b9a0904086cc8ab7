//! Agent registration and liveness tracking. Agents are created once by
//! [`register`], touched on every other operation by [`touch`], and never
//! deleted.

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use substrate_core::error::{Error, Result};
use substrate_core::models::{generate_agent_name, Agent};
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

/// Fields accepted by [`register`]. `name: None` auto-generates an
/// `Adjective+Noun` name via [`generate_agent_name`].
#[derive(Debug, Clone, Default)]
pub struct NewAgent {
    pub name: Option<String>,
    pub program: String,
    pub model: String,
    pub task_description: String,
}

/// Registers a new agent in `project_key`. Names are unique per project
/// (case-insensitive); an explicit name that collides is a validation
/// error rather than silently aliasing an existing agent. Appends
/// `agent_registered`.
pub fn register(pool: &DbPool, events: &EventStore, project_key: &str, new: NewAgent) -> Result<Agent> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let now = Utc::now();

    let name = match new.name {
        Some(name) if !name.trim().is_empty() => name,
        _ => {
            let mut candidate = generate_agent_name();
            let mut attempts = 0;
            while attempts < 20
                && name_taken(&tx, project_key, &candidate)?
            {
                candidate = generate_agent_name();
                attempts += 1;
            }
            candidate
        }
    };

    if name_taken(&tx, project_key, &name)? {
        return Err(Error::Validation(format!(
            "agent name '{name}' is already registered in this project"
        )));
    }

    tx.execute(
        "INSERT INTO agents (project_key, name, program, model, task_description, registered_at, last_active_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![project_key, name, new.program, new.model, new.task_description, now.to_rfc3339()],
    )?;
    let id = tx.last_insert_rowid();

    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::AgentRegistered,
        serde_json::json!({ "agent_id": id, "name": name }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    get(pool, project_key, id)
}

fn name_taken(conn: &rusqlite::Connection, project_key: &str, name: &str) -> Result<bool> {
    let exists: Option<()> = conn
        .query_row(
            "SELECT 1 FROM agents WHERE project_key = ?1 AND name = ?2 COLLATE NOCASE",
            params![project_key, name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(exists.is_some())
}

/// Updates `last_active_at` to now. Appends `agent_active`. Called on
/// every other mail/hive/memory operation an agent performs.
pub fn touch(pool: &DbPool, events: &EventStore, project_key: &str, agent_id: i64) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE agents SET last_active_at = ?1 WHERE id = ?2 AND project_key = ?3",
        params![Utc::now().to_rfc3339(), agent_id, project_key],
    )?;
    if updated == 0 {
        return Err(Error::AgentNotFound(agent_id.to_string()));
    }
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::AgentActive,
        serde_json::json!({ "agent_id": agent_id }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);
    Ok(())
}

pub fn get(pool: &DbPool, project_key: &str, agent_id: i64) -> Result<Agent> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT id, project_key, name, program, model, task_description,
                registered_at, last_active_at, contact_policy
         FROM agents WHERE id = ?1 AND project_key = ?2",
        params![agent_id, project_key],
        row_to_agent,
    )
    .optional()?
    .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))
}

pub fn get_by_name(pool: &DbPool, project_key: &str, name: &str) -> Result<Agent> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT id, project_key, name, program, model, task_description,
                registered_at, last_active_at, contact_policy
         FROM agents WHERE project_key = ?1 AND name = ?2 COLLATE NOCASE",
        params![project_key, name],
        row_to_agent,
    )
    .optional()?
    .ok_or_else(|| Error::AgentNotFound(name.to_string()))
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let registered_at: String = row.get(6)?;
    let last_active_at: String = row.get(7)?;
    Ok(Agent {
        id: Some(row.get(0)?),
        project_key: row.get(1)?,
        name: row.get(2)?,
        program: row.get(3)?,
        model: row.get(4)?,
        task_description: row.get(5)?,
        registered_at: parse_ts(&registered_at),
        last_active_at: parse_ts(&last_active_at),
        contact_policy: row.get(8)?,
    })
}

fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
