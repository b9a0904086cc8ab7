//! Per-`(agent, endpoint)` token bucket rate limiting.
//!
//! Buckets are persisted in `rate_limit_buckets` so limits survive process
//! restarts and are shared across every handle on the same project.

use chrono::Utc;
use rusqlite::{OptionalExtension, Transaction, params};
use substrate_core::error::{Error, Result};

/// One bucket's replenishment policy.
#[derive(Debug, Clone, Copy)]
pub struct BucketPolicy {
    pub capacity: u32,
    pub refill_per_second: f64,
}

impl BucketPolicy {
    #[must_use]
    pub const fn new(capacity: u32, refill_per_second: f64) -> Self {
        Self {
            capacity,
            refill_per_second,
        }
    }
}

/// Returns the policy for a given endpoint name, or `None` if unlimited.
#[must_use]
pub fn policy_for(endpoint: &str) -> Option<BucketPolicy> {
    match endpoint {
        "send" => Some(BucketPolicy::new(30, 0.5)),
        "reserve" => Some(BucketPolicy::new(60, 1.0)),
        "memory_store" => Some(BucketPolicy::new(60, 1.0)),
        _ => None,
    }
}

/// Attempts to take one token from `(agent_id, endpoint)`'s bucket.
///
/// When `rate_limit_disabled` is set (test/dev escape hatch), always
/// succeeds without touching storage. Otherwise, lazily creates the bucket
/// row at full capacity on first use, refills proportionally to elapsed
/// time since `updated_at`, and returns `RateLimitExceeded` when the
/// refilled balance is below one token.
pub fn try_consume(
    tx: &Transaction<'_>,
    agent_id: i64,
    endpoint: &str,
    rate_limit_disabled: bool,
) -> Result<()> {
    let Some(policy) = policy_for(endpoint) else {
        return Ok(());
    };
    if rate_limit_disabled {
        return Ok(());
    }

    let now = Utc::now();
    let now_ms = now.timestamp_millis();

    let existing: Option<(f64, i64)> = tx
        .query_row(
            "SELECT tokens, last_refill_ms FROM rate_limit_buckets
             WHERE agent_id = ?1 AND endpoint = ?2",
            params![agent_id, endpoint],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (tokens, last_refill_ms) = existing.unwrap_or((f64::from(policy.capacity), now_ms));

    let elapsed_s = ((now_ms - last_refill_ms).max(0) as f64) / 1000.0;
    let refilled = (tokens + elapsed_s * policy.refill_per_second).min(f64::from(policy.capacity));

    if refilled < 1.0 {
        let reset_at = now_ms + (((1.0 - refilled) / policy.refill_per_second) * 1000.0) as i64;
        return Err(Error::RateLimitExceeded {
            endpoint: endpoint.to_string(),
            remaining: 0,
            reset_at,
        });
    }

    let remaining = refilled - 1.0;
    tx.execute(
        "INSERT INTO rate_limit_buckets (agent_id, endpoint, tokens, last_refill_ms)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(agent_id, endpoint) DO UPDATE SET tokens = ?3, last_refill_ms = ?4",
        params![agent_id, endpoint, remaining, now_ms],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn conn_with_schema() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        substrate_db::migrate(&mut conn).unwrap();
        conn
    }

    #[test]
    fn fresh_bucket_starts_at_capacity() {
        let mut conn = conn_with_schema();
        let tx = conn.transaction().unwrap();
        for _ in 0..30 {
            try_consume(&tx, 1, "send", false).unwrap();
        }
        assert!(try_consume(&tx, 1, "send", false).is_err());
    }

    #[test]
    fn unlimited_endpoint_never_throttles() {
        let mut conn = conn_with_schema();
        let tx = conn.transaction().unwrap();
        for _ in 0..1000 {
            try_consume(&tx, 1, "read", false).unwrap();
        }
    }

    #[test]
    fn disabled_flag_bypasses_bucket() {
        let mut conn = conn_with_schema();
        let tx = conn.transaction().unwrap();
        for _ in 0..1000 {
            try_consume(&tx, 1, "send", true).unwrap();
        }
    }

    #[test]
    fn different_agents_have_independent_buckets() {
        let mut conn = conn_with_schema();
        let tx = conn.transaction().unwrap();
        for _ in 0..30 {
            try_consume(&tx, 1, "send", false).unwrap();
        }
        assert!(try_consume(&tx, 2, "send", false).is_ok());
    }
}
