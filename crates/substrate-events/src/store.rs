//! The `EventStore`: append, read, subscribe, project.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use rusqlite::{OptionalExtension, Transaction, params};
use substrate_core::error::{Error, Result};
use substrate_db::PoolRegistry;

use crate::bus::SubscriptionBus;
use crate::event::{Event, EventType};

/// A projection hook: applied inside the same transaction as the event
/// insert, for every event of the type it's registered against. Must be
/// deterministic and idempotent when replayed from sequence 0.
pub type ProjectionHook =
    Arc<dyn Fn(&Transaction<'_>, &Event) -> Result<()> + Send + Sync>;

/// Append-only, per-project event log with replay and bounded subscriptions.
#[derive(Clone)]
pub struct EventStore {
    pools: PoolRegistry,
    write_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    projections: Arc<Mutex<HashMap<&'static str, Vec<ProjectionHook>>>>,
    bus: SubscriptionBus,
}

/// Filters for [`EventStore::read`].
#[derive(Debug, Clone, Default)]
pub struct ReadFilter {
    pub since_sequence: Option<i64>,
    pub until_sequence: Option<i64>,
    pub types: Option<Vec<String>>,
    pub limit: Option<i64>,
}

impl EventStore {
    #[must_use]
    pub fn new(pools: PoolRegistry) -> Self {
        Self {
            pools,
            write_locks: Arc::new(Mutex::new(HashMap::new())),
            projections: Arc::new(Mutex::new(HashMap::new())),
            bus: SubscriptionBus::new(),
        }
    }

    /// Registers a projection hook for a single event type. Call during
    /// startup wiring, before any `append` for that type is expected.
    pub fn register_projection(&self, event_type: EventType, hook: ProjectionHook) {
        self.projections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(event_type.as_str())
            .or_default()
            .push(hook);
    }

    fn write_lock_for(&self, project_key: &str) -> Arc<Mutex<()>> {
        self.write_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(project_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Appends one event, assigning `sequence = max+1` and `timestamp=now()`
    /// inside a transaction holding the per-project write lock. Retries up
    /// to 3 times with 50/100/200ms backoff+jitter on transient failures.
    pub fn append(
        &self,
        project_key: &str,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<Event> {
        let lock = self.write_lock_for(project_key);
        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        let backoffs_ms = [50u64, 100, 200];
        let mut last_err = None;
        for (attempt, backoff) in backoffs_ms.iter().enumerate() {
            match self.append_once(project_key, event_type, &data) {
                Ok(event) => return Ok(event),
                Err(e) if e.is_retryable() && attempt + 1 < backoffs_ms.len() => {
                    let jitter = rand::thread_rng().gen_range(0..20);
                    std::thread::sleep(Duration::from_millis(*backoff + jitter));
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Internal("append retry loop exhausted".into())))
    }

    fn append_once(
        &self,
        project_key: &str,
        event_type: EventType,
        data: &serde_json::Value,
    ) -> Result<Event> {
        let pool = self.pools.pool_for(project_key)?;
        let mut conn = pool.get()?;
        let tx = conn.transaction()?;
        let event = self.insert_event_in_tx(&tx, project_key, event_type, data.clone())?;
        tx.commit()?;
        self.bus.publish(project_key, event.clone());
        Ok(event)
    }

    /// Inserts the event row and runs its registered projections inside a
    /// transaction the caller already holds (used by subsystem operations
    /// that also write their own projection tables in the same transaction).
    /// Does not publish to subscribers — callers that use this directly must
    /// call [`EventStore::notify_subscribers`] after `tx.commit()`.
    pub fn insert_event_in_tx(
        &self,
        tx: &Transaction<'_>,
        project_key: &str,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<Event> {
        let next_sequence: i64 = tx.query_row(
            "SELECT COALESCE(MAX(sequence), 0) + 1 FROM events WHERE project_key = ?1",
            params![project_key],
            |row| row.get(0),
        )?;
        let timestamp_ms = chrono::Utc::now().timestamp_millis();
        let data_json = serde_json::to_string(&data)?;

        tx.execute(
            "INSERT INTO events (project_key, type, sequence, timestamp_ms, data_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                project_key,
                event_type.as_str(),
                next_sequence,
                timestamp_ms,
                data_json
            ],
        )?;
        let id = tx.last_insert_rowid();

        let event = Event {
            id,
            project_key: project_key.to_string(),
            event_type: event_type.as_str().to_string(),
            sequence: next_sequence,
            timestamp_ms,
            data,
        };

        if let Some(hooks) = self
            .projections
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(event_type.as_str())
        {
            for hook in hooks {
                hook(tx, &event)?;
            }
        }

        Ok(event)
    }

    /// Publishes an already-committed event to subscribers. Pair with
    /// [`EventStore::insert_event_in_tx`] when the caller manages its own
    /// transaction/commit.
    pub fn notify_subscribers(&self, project_key: &str, event: Event) {
        self.bus.publish(project_key, event);
    }

    /// Returns events matching the filter in ascending sequence order.
    /// `since` is exclusive, `until` inclusive.
    pub fn read(&self, project_key: &str, filter: &ReadFilter) -> Result<Vec<Event>> {
        let pool = self.pools.pool_for(project_key)?;
        let conn = pool.get()?;

        let mut sql = String::from(
            "SELECT id, project_key, type, sequence, timestamp_ms, data_json
             FROM events WHERE project_key = ?1",
        );
        let mut param_values: Vec<Box<dyn rusqlite::ToSql>> =
            vec![Box::new(project_key.to_string())];

        if let Some(since) = filter.since_sequence {
            sql.push_str(" AND sequence > ?");
            param_values.push(Box::new(since));
        }
        if let Some(until) = filter.until_sequence {
            sql.push_str(" AND sequence <= ?");
            param_values.push(Box::new(until));
        }
        if let Some(types) = &filter.types {
            if !types.is_empty() {
                let placeholders = types.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
                sql.push_str(&format!(" AND type IN ({placeholders})"));
                for t in types {
                    param_values.push(Box::new(t.clone()));
                }
            }
        }
        sql.push_str(" ORDER BY sequence ASC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            param_values.push(Box::new(limit));
        }

        let mut stmt = conn.prepare(&sql)?;
        let params_ref: Vec<&dyn rusqlite::ToSql> =
            param_values.iter().map(std::convert::AsRef::as_ref).collect();

        let rows = stmt.query_map(params_ref.as_slice(), |row| {
            let data_json: String = row.get(4)?;
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                data_json,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, project_key, event_type, sequence, data_json) = row?;
            let data: serde_json::Value = serde_json::from_str(&data_json)
                .map_err(|e| Error::CorruptedData(format!("event {id} data_json: {e}")))?;
            events.push(Event {
                id,
                project_key,
                event_type,
                sequence,
                timestamp_ms: row_timestamp(&conn, id)?,
                data,
            });
        }
        Ok(events)
    }

    /// Streams events appended after `since_sequence` to a bounded channel.
    /// Returns a receiver; if the consumer falls behind the bounded queue
    /// (default 1024), it is dropped with a terminal `SubscriberLagged`
    /// message instead of silently missing events.
    pub fn subscribe(
        &self,
        project_key: &str,
        since_sequence: i64,
    ) -> tokio::sync::mpsc::Receiver<crate::bus::Delivery> {
        self.bus.subscribe(project_key, since_sequence)
    }

    /// Folds `read(project_key, {since_sequence, ..})` through `reducer`,
    /// starting from `initial`.
    pub fn project<S>(
        &self,
        project_key: &str,
        since_sequence: i64,
        mut reducer: impl FnMut(S, &Event) -> S,
        initial: S,
    ) -> Result<S> {
        let events = self.read(
            project_key,
            &ReadFilter {
                since_sequence: Some(since_sequence),
                ..Default::default()
            },
        )?;
        Ok(events.iter().fold(initial, |state, event| reducer(state, event)))
    }
}

fn row_timestamp(conn: &rusqlite::Connection, id: i64) -> Result<i64> {
    conn.query_row(
        "SELECT timestamp_ms FROM events WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::CorruptedData(format!("event {id} vanished mid-read")))
}
