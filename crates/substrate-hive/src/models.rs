//! The `Cell`: a unit of work in the dependency graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Lifecycle status of a cell. `blocked` is a status a cell can be moved
/// into directly (e.g. by an agent declaring it stuck); `is_blocked` on
/// [`Cell`] is a separate denormalized cache over the dependency graph used
/// by `ready`/`blocked` queries. `tombstone` is reachable only through
/// [`crate::cells::delete`], never through [`crate::cells::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellStatus {
    Open,
    InProgress,
    Blocked,
    Closed,
    Tombstone,
}

impl CellStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::InProgress => "in_progress",
            Self::Blocked => "blocked",
            Self::Closed => "closed",
            Self::Tombstone => "tombstone",
        }
    }

    #[must_use]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "open" => Some(Self::Open),
            "in_progress" => Some(Self::InProgress),
            "blocked" => Some(Self::Blocked),
            "closed" => Some(Self::Closed),
            "tombstone" => Some(Self::Tombstone),
            _ => None,
        }
    }

    /// Whether `self -> next` is a legal transition for
    /// [`crate::cells::update`]/[`crate::cells::set_status`]. `tombstone` is
    /// never a valid target here — only [`crate::cells::delete`] can tombstone
    /// a cell.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use CellStatus::{Blocked, Closed, InProgress, Open};
        matches!(
            (self, next),
            (Open, InProgress)
                | (Open, Blocked)
                | (Open, Closed)
                | (InProgress, Open)
                | (InProgress, Blocked)
                | (InProgress, Closed)
                | (Blocked, Open)
                | (Blocked, InProgress)
                | (Blocked, Closed)
                | (Closed, Open)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    pub id: String,
    pub project_key: String,
    pub title: String,
    pub description: Option<String>,
    pub status: String,
    pub priority: i32,
    pub issue_type: String,
    pub parent_id: Option<String>,
    pub assignee: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_blocked: bool,
    pub metadata: serde_json::Value,
}

impl Default for Cell {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            project_key: String::new(),
            title: String::new(),
            description: None,
            status: CellStatus::Open.as_str().to_string(),
            priority: 2,
            issue_type: "task".to_string(),
            parent_id: None,
            assignee: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
            deleted_at: None,
            is_blocked: false,
            metadata: serde_json::json!({}),
        }
    }
}

/// Generates a short, collision-resistant cell id scoped to a project:
/// `<project_slug>-<8 hex chars of sha256(project_key, title, nanos)>`.
/// A subtask created under `parent_id` instead gets `{parent_id}.{n}`, with
/// `n` chosen by the caller as one past the parent's existing child count.
#[must_use]
pub fn generate_cell_id(project_key: &str, title: &str, nanos: i64) -> String {
    let slug = substrate_core::paths::project_slug(project_key);
    let mut hasher = Sha256::new();
    hasher.update(project_key.as_bytes());
    hasher.update(b"\0");
    hasher.update(title.as_bytes());
    hasher.update(b"\0");
    hasher.update(nanos.to_le_bytes());
    let digest = hasher.finalize();
    format!("{slug}-{}", hex::encode(&digest[..4]))
}

#[must_use]
pub fn generate_subtask_id(parent_id: &str, n: u32) -> String {
    format!("{parent_id}.{n}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellDependency {
    pub from_cell: String,
    pub to_cell: String,
    pub relationship: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellComment {
    pub id: Option<i64>,
    pub cell_id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_allow_reopen_from_closed() {
        assert!(CellStatus::Closed.can_transition_to(CellStatus::Open));
        assert!(!CellStatus::Closed.can_transition_to(CellStatus::InProgress));
        assert!(!CellStatus::Tombstone.can_transition_to(CellStatus::Open));
    }

    #[test]
    fn update_can_never_target_tombstone() {
        for status in [CellStatus::Open, CellStatus::InProgress, CellStatus::Blocked, CellStatus::Closed] {
            assert!(!status.can_transition_to(CellStatus::Tombstone));
        }
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            CellStatus::Open,
            CellStatus::InProgress,
            CellStatus::Blocked,
            CellStatus::Closed,
            CellStatus::Tombstone,
        ] {
            assert_eq!(CellStatus::from_str(status.as_str()), Some(status));
        }
    }

    #[test]
    fn generated_ids_are_deterministic_for_same_inputs() {
        let a = generate_cell_id("proj", "fix bug", 100);
        let b = generate_cell_id("proj", "fix bug", 100);
        assert_eq!(a, b);
    }

    #[test]
    fn generated_ids_differ_for_different_nanos() {
        let a = generate_cell_id("proj", "fix bug", 100);
        let b = generate_cell_id("proj", "fix bug", 101);
        assert_ne!(a, b);
    }

    #[test]
    fn subtask_ids_are_dotted() {
        assert_eq!(generate_subtask_id("proj-abcd1234", 1), "proj-abcd1234.1");
    }
}
