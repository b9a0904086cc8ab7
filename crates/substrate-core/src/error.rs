//! Error taxonomy for the coordination substrate.
//!
//! Every operation returns `Result<T, Error>`. Variants are grouped by kind
//! rather than by subsystem, so a caller can build the `{code, message,
//! hint}` envelope without matching on every individual variant — use
//! [`Error::code`], [`Error::is_retryable`], and [`Error::hint`].

use thiserror::Error;

/// Result type alias used throughout the substrate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the coordination substrate.
#[derive(Debug, Error)]
pub enum Error {
    // ── Validation ──────────────────────────────────────────────────────
    #[error("invalid argument: {0}")]
    Validation(String),

    // ── Not found ───────────────────────────────────────────────────────
    #[error("project not found: {0}")]
    ProjectNotFound(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("message not found: {0}")]
    MessageNotFound(i64),

    #[error("thread not found: {0}")]
    ThreadNotFound(String),

    #[error("reservation not found: {0}")]
    ReservationNotFound(i64),

    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("memory not found: {0}")]
    MemoryNotFound(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    // ── Conflict ────────────────────────────────────────────────────────
    #[error("invalid status transition {from} -> {to} for cell {cell_id} (hint: {hint})")]
    InvalidStatusTransition {
        cell_id: String,
        from: String,
        to: String,
        hint: String,
    },

    #[error("dependency cycle detected: adding {from} -blocks-> {to} would create a cycle")]
    CycleDetected { from: String, to: String },

    #[error("file reservation conflict: {0:?}")]
    ReservationConflict(Vec<crate::models::ReservationConflict>),

    // ── Rate limiting ───────────────────────────────────────────────────
    #[error("rate limit exceeded for {endpoint} (remaining={remaining}, reset_at={reset_at})")]
    RateLimitExceeded {
        endpoint: String,
        remaining: u32,
        reset_at: i64,
    },

    // ── Transient (retried internally up to 3 times) ───────────────────
    #[error("transient database error: {0}")]
    Transient(String),

    // ── External dependency unavailable ────────────────────────────────
    #[error("external dependency unavailable: {0}")]
    ExternalUnavailable(String),

    #[error("embedder unavailable: {0}")]
    EmbeddingUnavailable(String),

    // ── Corrupted data ──────────────────────────────────────────────────
    #[error("corrupted data: {0}")]
    CorruptedData(String),

    // ── Cancellation ────────────────────────────────────────────────────
    #[error("operation cancelled")]
    Cancelled,

    // ── Plumbing ────────────────────────────────────────────────────────
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine code for the `{code, message, hint}` envelope.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::ProjectNotFound(_)
            | Self::AgentNotFound(_)
            | Self::MessageNotFound(_)
            | Self::ThreadNotFound(_)
            | Self::ReservationNotFound(_)
            | Self::CellNotFound(_)
            | Self::MemoryNotFound(_)
            | Self::EntityNotFound(_) => "NOT_FOUND",
            Self::InvalidStatusTransition { .. } | Self::CycleDetected { .. } => "CONFLICT",
            Self::ReservationConflict(_) => "FILE_RESERVATION_CONFLICT",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::Transient(_) => "TRANSIENT",
            Self::ExternalUnavailable(_) | Self::EmbeddingUnavailable(_) => {
                "EXTERNAL_UNAVAILABLE"
            }
            Self::CorruptedData(_) => "CORRUPTED_DATA",
            Self::Cancelled => "CANCELLED",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether the substrate itself may retry this error internally.
    /// Caller-facing retries are a separate policy decision.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Database(_))
    }

    /// A short, user-actionable hint, where one applies.
    #[must_use]
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::InvalidStatusTransition { hint, .. } => Some(hint.clone()),
            Self::RateLimitExceeded { reset_at, .. } => {
                Some(format!("retry after timestamp {reset_at}"))
            }
            Self::ReservationConflict(conflicts) => {
                let holders: Vec<&str> = conflicts
                    .iter()
                    .flat_map(|c| c.holders.iter().map(String::as_str))
                    .collect();
                Some(format!("release or wait on holders: {holders:?}"))
            }
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref inner, _)
                if inner.code == rusqlite::ErrorCode::DatabaseBusy
                    || inner.code == rusqlite::ErrorCode::DatabaseLocked =>
            {
                Self::Transient(e.to_string())
            }
            other => Self::Database(other.to_string()),
        }
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Self::Database(format!("connection pool: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_variants_map_to_not_found_code() {
        assert_eq!(Error::AgentNotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::CellNotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::MemoryNotFound("x".into()).code(), "NOT_FOUND");
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(Error::Transient("busy".into()).is_retryable());
        assert!(!Error::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn invalid_transition_carries_hint() {
        let e = Error::InvalidStatusTransition {
            cell_id: "proj-x-1a2".into(),
            from: "closed".into(),
            to: "in_progress".into(),
            hint: "reopen first".into(),
        };
        assert_eq!(e.hint().as_deref(), Some("reopen first"));
        assert_eq!(e.code(), "CONFLICT");
    }

    #[test]
    fn rate_limit_display_contains_fields() {
        let e = Error::RateLimitExceeded {
            endpoint: "send".into(),
            remaining: 0,
            reset_at: 1000,
        };
        let s = e.to_string();
        assert!(s.contains("send"));
        assert!(s.contains("1000"));
    }

    #[test]
    fn sqlite_busy_maps_to_transient() {
        let inner = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy,
                extended_code: 5,
            },
            Some("database is locked".into()),
        );
        let err: Error = inner.into();
        assert!(err.is_retryable());
        assert_eq!(err.code(), "TRANSIENT");
    }
}
