//! JSONL export/import for git-shared memory collections.
//!
//! Unlike the cell graph's three-way merge, memory sync has no shared base
//! to diff against — a `collection`/`since` filtered export is meant to be
//! committed alongside code and picked up by teammates, so reconciliation
//! is a simple choice between keeping what's local and taking what's
//! incoming, not a field-wise merge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use substrate_core::error::{Error, Result};
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

use crate::models::Memory;

/// One line of the export format.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryRecord {
    pub memory: Memory,
}

/// Narrows an export to one collection and/or to memories updated at or
/// after `since`.
#[derive(Debug, Clone, Default)]
pub struct ExportFilter {
    pub collection: Option<String>,
    pub since: Option<DateTime<Utc>>,
}

/// Serializes matching memories (including superseded ones, so history
/// survives a round trip) to newline-delimited JSON, ordered by id.
pub fn export_jsonl(pool: &DbPool, project_key: &str, filter: &ExportFilter) -> Result<String> {
    let mut memories = crate::store::list(pool, project_key, filter.collection.as_deref())?;
    if let Some(since) = filter.since {
        memories.retain(|m| m.updated_at >= since);
    }
    memories.sort_by(|a, b| a.id.cmp(&b.id));

    let mut out = String::new();
    for memory in memories {
        out.push_str(&serde_json::to_string(&MemoryRecord { memory })?);
        out.push('\n');
    }
    Ok(out)
}

/// How [`import_jsonl`] reconciles an incoming row against one that already
/// exists locally with the same id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportStrategy {
    /// Leave existing memories untouched; only insert ids not yet present.
    SkipExisting,
    /// Overwrite the local row when the incoming one has a newer
    /// `updated_at`; otherwise keep local.
    Upsert,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportReport {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Imports memories from a previously-exported JSONL blob.
pub fn import_jsonl(pool: &DbPool, events: &EventStore, project_key: &str, incoming: &str, strategy: ImportStrategy) -> Result<ImportReport> {
    let incoming_records = parse_jsonl(incoming)?;
    let local_ids = crate::store::list(pool, project_key, None)?
        .into_iter()
        .map(|m| (m.id.clone(), m))
        .collect::<HashMap<_, _>>();

    let mut report = ImportReport::default();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    for (id, record) in &incoming_records {
        match local_ids.get(id) {
            None => {
                insert_record(&tx, project_key, record)?;
                report.created += 1;
            }
            Some(local) => match strategy {
                ImportStrategy::SkipExisting => report.skipped += 1,
                ImportStrategy::Upsert => {
                    if record.memory.updated_at > local.updated_at {
                        apply_record(&tx, record)?;
                        report.updated += 1;
                    } else {
                        report.skipped += 1;
                    }
                }
            },
        }
    }

    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MemorySynced,
        serde_json::json!({
            "created": report.created,
            "updated": report.updated,
            "skipped": report.skipped,
        }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    Ok(report)
}

fn parse_jsonl(data: &str) -> Result<HashMap<String, MemoryRecord>> {
    let mut records = HashMap::new();
    for (line_number, line) in data.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let record: MemoryRecord = serde_json::from_str(line)
            .map_err(|e| Error::Validation(format!("jsonl line {}: {e}", line_number + 1)))?;
        records.insert(record.memory.id.clone(), record);
    }
    Ok(records)
}

fn insert_record(tx: &rusqlite::Transaction<'_>, project_key: &str, record: &MemoryRecord) -> Result<()> {
    let memory = &record.memory;
    let metadata_json = serde_json::to_string(&memory.metadata)?;
    let embedding_json = serde_json::to_string(&memory.embedding)?;
    let tags_json = serde_json::to_string(&memory.auto_tags)?;
    tx.execute(
        "INSERT INTO memories
            (id, project_key, content, collection, metadata_json, embedding_json, created_at,
             updated_at, valid_from, valid_until, superseded_by, confidence, access_count,
             last_accessed, auto_tags_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        rusqlite::params![
            memory.id, project_key, memory.content, memory.collection, metadata_json,
            embedding_json, memory.created_at.to_rfc3339(), memory.updated_at.to_rfc3339(),
            memory.valid_from.map(|t| t.to_rfc3339()), memory.valid_until.map(|t| t.to_rfc3339()),
            memory.superseded_by, memory.confidence, memory.access_count,
            memory.last_accessed.map(|t| t.to_rfc3339()), tags_json,
        ],
    )?;
    Ok(())
}

fn apply_record(tx: &rusqlite::Transaction<'_>, record: &MemoryRecord) -> Result<()> {
    let memory = &record.memory;
    let metadata_json = serde_json::to_string(&memory.metadata)?;
    let embedding_json = serde_json::to_string(&memory.embedding)?;
    let tags_json = serde_json::to_string(&memory.auto_tags)?;
    tx.execute(
        "UPDATE memories SET content = ?2, collection = ?3, metadata_json = ?4, embedding_json = ?5,
                updated_at = ?6, valid_from = ?7, valid_until = ?8, superseded_by = ?9,
                confidence = ?10, auto_tags_json = ?11
         WHERE id = ?1",
        rusqlite::params![
            memory.id, memory.collection, metadata_json, embedding_json,
            memory.updated_at.to_rfc3339(), memory.valid_from.map(|t| t.to_rfc3339()),
            memory.valid_until.map(|t| t.to_rfc3339()), memory.superseded_by, memory.confidence,
            tags_json,
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::HeuristicAnalyzer;
    use crate::embed::Embedder;
    use crate::store::{store, NewMemory};
    use std::path::PathBuf;
    use substrate_db::PoolRegistry;

    struct StubEmbedder;
    impl Embedder for StubEmbedder {
        fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.1, 0.2, 0.3])
        }
        fn dimension(&self) -> usize {
            3
        }
    }

    fn setup() -> (DbPool, EventStore, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        let registry = PoolRegistry::new(PathBuf::from(tmp.path()));
        let pool = registry.pool_for("proj").unwrap();
        let events = EventStore::new(registry);
        (pool, events, tmp)
    }

    #[test]
    fn export_then_import_into_fresh_project_recreates_memories() {
        let (pool, events, tmp) = setup();
        store(&pool, &events, &StubEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "first memory".into(),
            ..Default::default()
        }).unwrap();
        let exported = export_jsonl(&pool, "proj", &ExportFilter::default()).unwrap();

        let registry2 = PoolRegistry::new(PathBuf::from(tmp.path()));
        let pool2 = registry2.pool_for("proj2").unwrap();
        let events2 = EventStore::new(registry2);
        let report = import_jsonl(&pool2, &events2, "proj2", &exported, ImportStrategy::Upsert).unwrap();

        assert_eq!(report.created, 1);
        assert_eq!(crate::store::list(&pool2, "proj2", None).unwrap().len(), 1);
    }

    #[test]
    fn export_filters_by_collection_and_since() {
        let (pool, events, _tmp) = setup();
        store(&pool, &events, &StubEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "kept".into(),
            collection: "notes".into(),
            ..Default::default()
        }).unwrap();
        store(&pool, &events, &StubEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "dropped".into(),
            collection: "other".into(),
            ..Default::default()
        }).unwrap();

        let exported = export_jsonl(&pool, "proj", &ExportFilter { collection: Some("notes".into()), since: None }).unwrap();
        assert!(exported.contains("kept"));
        assert!(!exported.contains("dropped"));
    }

    #[test]
    fn skip_existing_never_touches_local_rows() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &StubEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "original".into(),
            ..Default::default()
        }).unwrap();
        let base = export_jsonl(&pool, "proj", &ExportFilter::default()).unwrap();

        let mut records = parse_jsonl(&base).unwrap();
        let record = records.get_mut(&memory.id).unwrap();
        record.memory.content = "from elsewhere".into();
        record.memory.updated_at = record.memory.updated_at + chrono::Duration::seconds(1);
        let incoming = format!("{}\n", serde_json::to_string(&record).unwrap());

        let report = import_jsonl(&pool, &events, "proj", &incoming, ImportStrategy::SkipExisting).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(crate::store::get_without_tracking(&pool, &memory.id).unwrap().content, "original");
    }

    #[test]
    fn upsert_strategy_takes_newer_incoming_row() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &StubEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "original".into(),
            ..Default::default()
        }).unwrap();
        let base = export_jsonl(&pool, "proj", &ExportFilter::default()).unwrap();

        let mut records = parse_jsonl(&base).unwrap();
        let record = records.get_mut(&memory.id).unwrap();
        record.memory.content = "edited remotely".into();
        record.memory.updated_at = record.memory.updated_at + chrono::Duration::seconds(1);
        let incoming = format!("{}\n", serde_json::to_string(&record).unwrap());

        let report = import_jsonl(&pool, &events, "proj", &incoming, ImportStrategy::Upsert).unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(crate::store::get_without_tracking(&pool, &memory.id).unwrap().content, "edited remotely");
    }

    #[test]
    fn upsert_strategy_keeps_local_when_incoming_is_older() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &StubEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "original".into(),
            ..Default::default()
        }).unwrap();
        let base = export_jsonl(&pool, "proj", &ExportFilter::default()).unwrap();

        let mut records = parse_jsonl(&base).unwrap();
        let record = records.get_mut(&memory.id).unwrap();
        record.memory.content = "stale".into();
        record.memory.updated_at = record.memory.updated_at - chrono::Duration::seconds(1);
        let incoming = format!("{}\n", serde_json::to_string(&record).unwrap());

        let report = import_jsonl(&pool, &events, "proj", &incoming, ImportStrategy::Upsert).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(crate::store::get_without_tracking(&pool, &memory.id).unwrap().content, "original");
    }
}
