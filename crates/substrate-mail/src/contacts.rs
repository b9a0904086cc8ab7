//! Cross-project contact requests (`AgentLink`), gated by an agent's
//! `contact_policy` (`"open"` accepts silently, `"closed"` requires the
//! other side to accept, `"blocked"` rejects outright).

use chrono::Utc;
use rusqlite::{OptionalExtension, params};
use substrate_core::error::{Error, Result};
use substrate_core::models::AgentLink;
use substrate_db::DbPool;

/// Requests a link from `(a_project_key, a_agent_id)` to
/// `(b_project_key, b_agent_id)`. If `b`'s `contact_policy` is `"open"`,
/// the link is created already `accepted`; if `"blocked"`, the request is
/// rejected outright; otherwise it's created `pending` for `b` to answer.
pub fn request_link(
    pool: &DbPool,
    a_project_key: &str,
    a_agent_id: i64,
    b_project_key: &str,
    b_agent_id: i64,
    reason: String,
) -> Result<AgentLink> {
    let conn = pool.get()?;

    let b_policy: String = conn
        .query_row(
            "SELECT contact_policy FROM agents WHERE project_key = ?1 AND id = ?2",
            params![b_project_key, b_agent_id],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| Error::AgentNotFound(b_agent_id.to_string()))?;

    if b_policy == "blocked" {
        return Err(Error::Validation(format!(
            "agent {b_agent_id} is not accepting contact requests"
        )));
    }

    let now = Utc::now();
    let status = if b_policy == "open" { "accepted" } else { "pending" };

    conn.execute(
        "INSERT INTO agent_links
            (a_project_key, a_agent_id, b_project_key, b_agent_id, status, reason,
             created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            a_project_key,
            a_agent_id,
            b_project_key,
            b_agent_id,
            status,
            reason,
            now.to_rfc3339(),
        ],
    )?;
    let id = conn.last_insert_rowid();

    Ok(AgentLink {
        id: Some(id),
        a_project_key: a_project_key.to_string(),
        a_agent_id,
        b_project_key: b_project_key.to_string(),
        b_agent_id,
        status: status.to_string(),
        reason,
        created_at: now,
        updated_at: now,
        expires_at: None,
    })
}

/// Accepts or rejects a pending link as the `b` side.
pub fn respond_link(pool: &DbPool, link_id: i64, accept: bool) -> Result<()> {
    let conn = pool.get()?;
    let status = if accept { "accepted" } else { "rejected" };
    let updated = conn.execute(
        "UPDATE agent_links SET status = ?1, updated_at = ?2
         WHERE id = ?3 AND status = 'pending'",
        params![status, Utc::now().to_rfc3339(), link_id],
    )?;
    if updated == 0 {
        return Err(Error::Validation(format!(
            "link {link_id} is not pending or does not exist"
        )));
    }
    Ok(())
}

/// Lists accepted links involving `(project_key, agent_id)`, either side.
pub fn accepted_links_for(pool: &DbPool, project_key: &str, agent_id: i64) -> Result<Vec<AgentLink>> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, a_project_key, a_agent_id, b_project_key, b_agent_id, status, reason,
                created_at, updated_at, expires_at
         FROM agent_links
         WHERE status = 'accepted'
           AND ((a_project_key = ?1 AND a_agent_id = ?2) OR (b_project_key = ?1 AND b_agent_id = ?2))",
    )?;
    let rows = stmt.query_map(params![project_key, agent_id], |row| {
        let created_at: String = row.get(7)?;
        let updated_at: String = row.get(8)?;
        let expires_at: Option<String> = row.get(9)?;
        Ok(AgentLink {
            id: Some(row.get(0)?),
            a_project_key: row.get(1)?,
            a_agent_id: row.get(2)?,
            b_project_key: row.get(3)?,
            b_agent_id: row.get(4)?,
            status: row.get(5)?,
            reason: row.get(6)?,
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
            expires_at: expires_at.map(|s| parse_ts(&s)),
        })
    })?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Error::from)
}

fn parse_ts(s: &str) -> chrono::DateTime<Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
