//! Event envelope and the tagged-union of event types.
//!
//! Each event type has a documented shape but is persisted as an opaque JSON
//! blob (`data_json`) so unrecognized types round-trip untouched on replay —
//! forward compatible by construction. [`EventType::parse_for_append`] is
//! the only place that rejects unknown tags, and only at `append`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use substrate_core::error::{Error, Result};

/// A single immutable, totally-ordered (per project) log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub project_key: String,
    pub event_type: String,
    pub sequence: i64,
    pub timestamp_ms: i64,
    pub data: serde_json::Value,
}

impl Event {
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.timestamp_ms).unwrap_or_else(Utc::now)
    }
}

/// The full wire-level event-type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    AgentRegistered,
    AgentActive,
    MessageSent,
    MessageRead,
    MessageAcked,
    ThreadCreated,
    ThreadActivity,
    FileReserved,
    FileReleased,
    FileConflict,
    TaskStarted,
    TaskProgress,
    TaskCompleted,
    TaskBlocked,
    CellCreated,
    CellUpdated,
    CellStatusChanged,
    CellClosed,
    CellDeleted,
    CellDependencyAdded,
    CellDependencyRemoved,
    CellLabelAdded,
    CellLabelRemoved,
    CellCommentAdded,
    CellCommentUpdated,
    CellCommentDeleted,
    EpicCreated,
    EpicChildAdded,
    EpicChildRemoved,
    HiveSynced,
    MemoryStored,
    MemoryUpdated,
    MemoryDeleted,
    MemoryValidated,
    MemoryFound,
    MemorySynced,
}

impl EventType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AgentRegistered => "agent_registered",
            Self::AgentActive => "agent_active",
            Self::MessageSent => "message_sent",
            Self::MessageRead => "message_read",
            Self::MessageAcked => "message_acked",
            Self::ThreadCreated => "thread_created",
            Self::ThreadActivity => "thread_activity",
            Self::FileReserved => "file_reserved",
            Self::FileReleased => "file_released",
            Self::FileConflict => "file_conflict",
            Self::TaskStarted => "task_started",
            Self::TaskProgress => "task_progress",
            Self::TaskCompleted => "task_completed",
            Self::TaskBlocked => "task_blocked",
            Self::CellCreated => "cell_created",
            Self::CellUpdated => "cell_updated",
            Self::CellStatusChanged => "cell_status_changed",
            Self::CellClosed => "cell_closed",
            Self::CellDeleted => "cell_deleted",
            Self::CellDependencyAdded => "cell_dependency_added",
            Self::CellDependencyRemoved => "cell_dependency_removed",
            Self::CellLabelAdded => "cell_label_added",
            Self::CellLabelRemoved => "cell_label_removed",
            Self::CellCommentAdded => "cell_comment_added",
            Self::CellCommentUpdated => "cell_comment_updated",
            Self::CellCommentDeleted => "cell_comment_deleted",
            Self::EpicCreated => "epic_created",
            Self::EpicChildAdded => "epic_child_added",
            Self::EpicChildRemoved => "epic_child_removed",
            Self::HiveSynced => "hive_synced",
            Self::MemoryStored => "memory_stored",
            Self::MemoryUpdated => "memory_updated",
            Self::MemoryDeleted => "memory_deleted",
            Self::MemoryValidated => "memory_validated",
            Self::MemoryFound => "memory_found",
            Self::MemorySynced => "memory_synced",
        }
    }

    pub const ALL: &'static [Self] = &[
        Self::AgentRegistered,
        Self::AgentActive,
        Self::MessageSent,
        Self::MessageRead,
        Self::MessageAcked,
        Self::ThreadCreated,
        Self::ThreadActivity,
        Self::FileReserved,
        Self::FileReleased,
        Self::FileConflict,
        Self::TaskStarted,
        Self::TaskProgress,
        Self::TaskCompleted,
        Self::TaskBlocked,
        Self::CellCreated,
        Self::CellUpdated,
        Self::CellStatusChanged,
        Self::CellClosed,
        Self::CellDeleted,
        Self::CellDependencyAdded,
        Self::CellDependencyRemoved,
        Self::CellLabelAdded,
        Self::CellLabelRemoved,
        Self::CellCommentAdded,
        Self::CellCommentUpdated,
        Self::CellCommentDeleted,
        Self::EpicCreated,
        Self::EpicChildAdded,
        Self::EpicChildRemoved,
        Self::HiveSynced,
        Self::MemoryStored,
        Self::MemoryUpdated,
        Self::MemoryDeleted,
        Self::MemoryValidated,
        Self::MemoryFound,
        Self::MemorySynced,
    ];

    /// Parses a known event type tag, rejecting anything else — used only at
    /// `append`; `read` passes unknown stored tags through opaquely.
    pub fn parse_for_append(tag: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == tag)
            .ok_or_else(|| Error::Validation(format!("unknown event type: {tag}")))
    }
}
