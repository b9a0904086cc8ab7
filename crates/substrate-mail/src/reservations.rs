//! File reservations: advisory exclusive/shared locks over path globs, with
//! TTL expiry and conflict detection via [`crate::reservation_index`].

use chrono::{DateTime, Duration, Utc};
use rusqlite::params;
use substrate_core::error::{Error, Result};
use substrate_core::models::{Reservation, ReservationConflict};
use substrate_core::pattern_overlap::CompiledPattern;
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

use crate::rate_limit;
use crate::reservation_index::{ReservationIndex, ReservationRef};

/// Attempts to reserve `patterns` for `agent_id`. If any pattern conflicts
/// with another agent's active exclusive reservation, no rows are written
/// and every conflict is reported together (not just the first). An agent
/// never conflicts with its own existing reservations. `ttl_seconds` must
/// be strictly positive; a reservation with `expires_at <= now()` can never
/// be taken out in the first place.
pub fn reserve(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    rate_limit_disabled: bool,
    agent_id: i64,
    patterns: Vec<String>,
    exclusive: bool,
    reason: String,
    ttl_seconds: u32,
) -> Result<Reservation> {
    if patterns.is_empty() {
        return Err(Error::Validation("reserve requires at least one pattern".into()));
    }
    if ttl_seconds == 0 {
        return Err(Error::Validation("ttl_seconds must be greater than zero".into()));
    }

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    rate_limit::try_consume(&tx, agent_id, "reserve", rate_limit_disabled)?;

    let now = Utc::now();
    let active = active_reservation_refs(&tx, project_key, now, Some(agent_id))?;
    let index = ReservationIndex::build(
        active
            .into_iter()
            .map(|(pattern, rref)| (pattern, rref)),
    );

    if exclusive {
        let mut conflicts: Vec<ReservationConflict> = Vec::new();
        for pattern in &patterns {
            let compiled = CompiledPattern::new(pattern);
            let hits = index.find_conflicts(&compiled);
            let exclusive_hits: Vec<&ReservationRef> =
                hits.into_iter().filter(|r| r.exclusive).collect();
            if !exclusive_hits.is_empty() {
                conflicts.push(ReservationConflict {
                    path: pattern.clone(),
                    holders: exclusive_hits
                        .iter()
                        .map(|r| r.path_pattern.clone())
                        .collect(),
                });
            }
        }
        if !conflicts.is_empty() {
            return Err(Error::ReservationConflict(conflicts));
        }
    }

    let expires_at = now + Duration::seconds(i64::from(ttl_seconds));
    let patterns_json = serde_json::to_string(&patterns)?;

    tx.execute(
        "INSERT INTO reservations
            (project_key, agent_id, patterns_json, exclusive, reason, reserved_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            project_key,
            agent_id,
            patterns_json,
            i64::from(exclusive),
            reason,
            now.to_rfc3339(),
            expires_at.to_rfc3339(),
        ],
    )?;
    let id = tx.last_insert_rowid();

    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::FileReserved,
        serde_json::json!({
            "reservation_id": id,
            "agent_id": agent_id,
            "patterns": patterns,
            "exclusive": exclusive,
        }),
    )?;
    tx.execute(
        "UPDATE reservations SET reservation_event_id = ?1 WHERE id = ?2",
        params![event.id, id],
    )?;

    tx.commit()?;

    Ok(Reservation {
        id: Some(id),
        project_key: project_key.to_string(),
        agent_id,
        patterns,
        exclusive,
        reason,
        reserved_at: now,
        expires_at,
        released_at: None,
        reservation_event_id: Some(event.id),
    })
}

/// Releases a reservation early. No-op (not an error) if already released.
pub fn release(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    reservation_id: i64,
    agent_id: i64,
) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let owner: Option<i64> = tx
        .query_row(
            "SELECT agent_id FROM reservations WHERE id = ?1 AND released_at IS NULL",
            params![reservation_id],
            |row| row.get(0),
        )
        .ok();

    match owner {
        None => return Err(Error::ReservationNotFound(reservation_id)),
        Some(owner_id) if owner_id != agent_id => {
            return Err(Error::Validation(format!(
                "agent {agent_id} does not own reservation {reservation_id}"
            )));
        }
        Some(_) => {}
    }

    tx.execute(
        "UPDATE reservations SET released_at = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), reservation_id],
    )?;
    events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::FileReleased,
        serde_json::json!({ "reservation_id": reservation_id, "agent_id": agent_id }),
    )?;
    tx.commit()?;
    Ok(())
}

/// Returns every active reservation whose patterns overlap `path`, across
/// all agents (including the caller, if `exclude_agent_id` is `None`).
pub fn conflicts_for(
    pool: &DbPool,
    project_key: &str,
    path: &str,
    exclude_agent_id: Option<i64>,
) -> Result<Vec<ReservationConflict>> {
    let conn = pool.get()?;
    let now = Utc::now();
    let active = active_reservation_refs(&conn, project_key, now, exclude_agent_id)?;
    let index = ReservationIndex::build(active);
    let compiled = CompiledPattern::new(path);
    let hits = index.find_conflicts(&compiled);

    if hits.is_empty() {
        return Ok(Vec::new());
    }
    Ok(vec![ReservationConflict {
        path: path.to_string(),
        holders: hits.iter().map(|r| r.path_pattern.clone()).collect(),
    }])
}

/// Releases every reservation whose `expires_at` has passed and is not yet
/// released, appending one `FileReleased` event per expired row. Intended
/// to run periodically from a background sweeper task.
pub fn sweep_expired(pool: &DbPool, events: &EventStore, project_key: &str) -> Result<u64> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let now = Utc::now();

    let mut stmt = tx.prepare(
        "SELECT id, agent_id FROM reservations
         WHERE project_key = ?1 AND released_at IS NULL AND expires_at <= ?2",
    )?;
    let expired: Vec<(i64, i64)> = stmt
        .query_map(params![project_key, now.to_rfc3339()], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    drop(stmt);

    for (id, agent_id) in &expired {
        tx.execute(
            "UPDATE reservations SET released_at = ?1 WHERE id = ?2",
            params![now.to_rfc3339(), id],
        )?;
        events.insert_event_in_tx(
            &tx,
            project_key,
            EventType::FileReleased,
            serde_json::json!({ "reservation_id": id, "agent_id": agent_id, "reason": "expired" }),
        )?;
    }
    tx.commit()?;
    Ok(expired.len() as u64)
}

fn active_reservation_refs(
    conn: &rusqlite::Connection,
    project_key: &str,
    now: DateTime<Utc>,
    exclude_agent_id: Option<i64>,
) -> Result<Vec<(String, ReservationRef)>> {
    let mut stmt = conn.prepare(
        "SELECT id, agent_id, patterns_json, exclusive, expires_at FROM reservations
         WHERE project_key = ?1 AND released_at IS NULL AND expires_at > ?2",
    )?;
    let rows: Vec<(i64, i64, String, bool, String)> = stmt
        .query_map(params![project_key, now.to_rfc3339()], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get::<_, i64>(3)? != 0,
                row.get(4)?,
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;

    let mut refs = Vec::new();
    for (_id, agent_id, patterns_json, exclusive, expires_at) in rows {
        if exclude_agent_id == Some(agent_id) {
            continue;
        }
        let patterns: Vec<String> = serde_json::from_str(&patterns_json)?;
        let expires_ts = DateTime::parse_from_rfc3339(&expires_at)
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        for pattern in patterns {
            refs.push((
                pattern.clone(),
                ReservationRef {
                    agent_id,
                    path_pattern: pattern,
                    exclusive,
                    expires_ts,
                },
            ));
        }
    }
    Ok(refs)
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
    fn exclusive_reservation_blocks_overlapping_pattern() {
        let (pool, events, _tmp) = setup();
        reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], true, "work".into(), 1800,
        )
        .unwrap();

        let err = reserve(
            &pool, &events, "proj", false, 2,
            vec!["src/main.rs".into()], true, "work".into(), 1800,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ReservationConflict(_)));
    }

    #[test]
    fn agent_does_not_conflict_with_its_own_reservation() {
        let (pool, events, _tmp) = setup();
        reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], true, "work".into() 1800,
        )
        .unwrap();

        reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/main.rs".into()], true, "more work".into() 1800,
        )
        .unwrap();
    }

    #[test]
    fn shared_reservations_never_conflict() {
        let (pool, events, _tmp) = setup();
        reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], false, "reading".into() 1800,
        )
        .unwrap();

        reserve(
            &pool, &events, "proj", false, 2,
            vec!["src/main.rs".into()], false, "reading too".into() 1800,
        )
        .unwrap();
    }

    #[test]
    fn release_frees_the_pattern() {
        let (pool, events, _tmp) = setup();
        let res = reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], true, "work".into() 1800,
        )
        .unwrap();

        release(&pool, &events, "proj", res.id.unwrap(), 1).unwrap();

        reserve(
            &pool, &events, "proj", false, 2,
            vec!["src/main.rs".into()], true, "work".into() 1800,
        )
        .unwrap();
    }

    #[test]
    fn release_by_non_owner_is_rejected() {
        let (pool, events, _tmp) = setup();
        let res = reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], true, "work".into() 1800,
        )
        .unwrap();

        assert!(release(&pool, &events, "proj", res.id.unwrap(), 2).is_err());
    }

    #[test]
    fn conflicts_for_reports_all_holders() {
        let (pool, events, _tmp) = setup();
        reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/main.rs".into()], true, "work".into() 1800,
        )
        .unwrap();

        let conflicts = conflicts_for(&pool, "proj", "src/main.rs", None).unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].holders.len(), 1);
    }

    #[test]
    fn expired_reservations_are_swept_and_free_the_pattern() {
        let (pool, events, _tmp) = setup();
        let res = reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], true, "work".into(), 1,
        )
        .unwrap();
        {
            let conn = pool.get().unwrap();
            let backdated = Utc::now() - chrono::Duration::seconds(5);
            conn.execute(
                "UPDATE reservations SET expires_at = ?1 WHERE id = ?2",
                params![backdated.to_rfc3339(), res.id.unwrap()],
            )
            .unwrap();
        }

        let swept = sweep_expired(&pool, &events, "proj").unwrap();
        assert_eq!(swept, 1);

        reserve(
            &pool, &events, "proj", false, 2,
            vec!["src/main.rs".into()], true, "work".into(), 1800,
        )
        .unwrap();
    }

    #[test]
    fn reserve_rejects_zero_ttl() {
        let (pool, events, _tmp) = setup();
        let err = reserve(
            &pool, &events, "proj", false, 1,
            vec!["src/**".into()], true, "work".into(), 0,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
