//! Memory, entity, and relationship shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: String,
    pub project_key: String,
    pub content: String,
    pub collection: String,
    pub metadata: serde_json::Value,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    pub superseded_by: Option<String>,
    pub confidence: f64,
    pub access_count: i64,
    pub last_accessed: Option<DateTime<Utc>>,
    pub auto_tags: Vec<String>,
}

impl Default for Memory {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            project_key: String::new(),
            content: String::new(),
            collection: "default".to_string(),
            metadata: serde_json::json!({}),
            embedding: Vec::new(),
            created_at: now,
            updated_at: now,
            valid_from: None,
            valid_until: None,
            superseded_by: None,
            confidence: 0.7,
            access_count: 0,
            last_accessed: None,
            auto_tags: Vec::new(),
        }
    }
}

impl Memory {
    /// Whether this memory is in force at `at` (not superseded, and within
    /// its `valid_from..valid_until` window, if any is set).
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        if self.superseded_by.is_some() {
            return false;
        }
        if let Some(from) = self.valid_from {
            if at < from {
                return false;
            }
        }
        if let Some(until) = self.valid_until {
            if at >= until {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Option<i64>,
    pub project_key: String,
    pub name: String,
    pub entity_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub id: Option<i64>,
    pub subject_entity: i64,
    pub predicate: String,
    pub object_entity: i64,
    pub confidence: f64,
    pub memory_id: String,
}

/// Generates a memory id: `mem-` followed by 16 random hex characters.
/// Unlike cell ids, memory ids carry no project or content fingerprint —
/// identity and dedup are handled by embedding similarity, not the id.
#[must_use]
pub fn generate_memory_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let bytes: [u8; 8] = rng.gen();
    format!("mem-{}", hex::encode(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_memory_ids_have_the_expected_shape_and_are_unique() {
        let a = generate_memory_id();
        let b = generate_memory_id();
        assert!(a.starts_with("mem-"));
        assert_eq!(a.len(), "mem-".len() + 16);
        assert_ne!(a, b);
    }

    #[test]
    fn valid_at_rejects_superseded() {
        let mut memory = Memory::default();
        memory.superseded_by = Some("other".into());
        assert!(!memory.is_valid_at(Utc::now()));
    }

    #[test]
    fn valid_at_respects_window() {
        let now = Utc::now();
        let memory = Memory {
            valid_from: Some(now + chrono::Duration::hours(1)),
            ..Default::default()
        };
        assert!(!memory.is_valid_at(now));
        assert!(memory.is_valid_at(now + chrono::Duration::hours(2)));
    }
}
