//! Memory CRUD, Mem0-style smart upsert, temporal queries, and
//! decay-weighted ranking.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use substrate_core::error::{Error, Result};
use substrate_db::DbPool;
use substrate_events::{EventStore, EventType};

use crate::analyze::{Analyzer, MemoryOperation};
use crate::embed::{top_k_by_similarity, Embedder};
use crate::models::{generate_memory_id, Memory};

/// Content longer than this is split into overlapping chunks before
/// embedding; each chunk is embedded separately and the vectors averaged.
const MAX_CONTENT_CHARS: usize = 24_000;
/// Character overlap between consecutive chunks, so a fact split across a
/// chunk boundary is still fully represented in at least one chunk.
const CHUNK_OVERLAP: usize = 200;

/// `upsert` considers only candidates at or above this similarity a match
/// worth reconciling against at all.
const UPSERT_CANDIDATE_THRESHOLD: f32 = 0.6;
/// How many similar candidates `upsert` hands to the analyzer.
const UPSERT_CANDIDATE_COUNT: usize = 5;
/// Cosine similarity at or above which new content is treated as verbatim
/// restatement of an existing memory (a no-op) without asking the analyzer.
const EXACT_MATCH_THRESHOLD: f32 = 0.999;

/// `store`'s auto-linking considers candidates at or above this similarity
/// related, capped to this many links.
const AUTO_LINK_THRESHOLD: f32 = 0.7;
const AUTO_LINK_MAX: usize = 5;

/// Half-life baseline (days) for [`decay_factor`]: a memory at the default
/// confidence (0.7) halves in relevance every `90 * (0.5 + 0.7)` days.
const DECAY_HALF_LIFE_BASE_DAYS: f64 = 90.0;

pub struct NewMemory {
    pub content: String,
    pub collection: String,
    pub metadata: serde_json::Value,
    pub confidence: f64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_until: Option<DateTime<Utc>>,
    /// Derive auto-tags via the analyzer. Opt-in: tagging every memory by
    /// default would tag content the caller may not want classified.
    pub auto_tag: bool,
    /// Extract and link entities into the knowledge graph. Opt-in for the
    /// same reason as `auto_tag`.
    pub extract_entities: bool,
    /// Link this memory to the most similar existing memories in its
    /// collection (cosine >= [`AUTO_LINK_THRESHOLD`], capped at
    /// [`AUTO_LINK_MAX`]) via a `related` [`crate::sync`]-visible edge.
    pub auto_link: bool,
}

impl Default for NewMemory {
    fn default() -> Self {
        Self {
            content: String::new(),
            collection: "default".to_string(),
            metadata: serde_json::json!({}),
            confidence: 0.7,
            valid_from: None,
            valid_until: None,
            auto_tag: false,
            extract_entities: false,
            auto_link: false,
        }
    }
}

/// Splits `content` into overlapping chunks if it exceeds
/// [`MAX_CONTENT_CHARS`], embeds each chunk, and averages the resulting
/// vectors component-wise. Short content is embedded directly.
fn embed_content(embedder: &dyn Embedder, content: &str) -> Result<Vec<f32>> {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= MAX_CONTENT_CHARS {
        return embedder.embed(content);
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + MAX_CONTENT_CHARS).min(chars.len());
        chunks.push(chars[start..end].iter().collect::<String>());
        if end == chars.len() {
            break;
        }
        start = end.saturating_sub(CHUNK_OVERLAP);
    }

    let mut sum: Option<Vec<f32>> = None;
    for chunk in &chunks {
        let embedding = embedder.embed(chunk)?;
        sum = Some(match sum {
            None => embedding,
            Some(mut acc) => {
                for (a, b) in acc.iter_mut().zip(embedding.iter()) {
                    *a += b;
                }
                acc
            }
        });
    }
    let mut averaged = sum.unwrap_or_default();
    let n = chunks.len() as f32;
    for x in &mut averaged {
        *x /= n;
    }
    Ok(averaged)
}

/// Stores a memory unconditionally. Use [`upsert`] when the content might
/// restate, update, or contradict an existing memory.
pub fn store(
    pool: &DbPool,
    events: &EventStore,
    embedder: &dyn Embedder,
    analyzer: &dyn Analyzer,
    project_key: &str,
    new: NewMemory,
) -> Result<Memory> {
    let embedding = embed_content(embedder, &new.content)?;
    let auto_tags = if new.auto_tag { analyzer.auto_tags(&new.content) } else { Vec::new() };
    let now = Utc::now();
    let id = generate_memory_id();

    let memory = Memory {
        id: id.clone(),
        project_key: project_key.to_string(),
        content: new.content,
        collection: new.collection,
        metadata: new.metadata,
        embedding,
        created_at: now,
        updated_at: now,
        valid_from: new.valid_from,
        valid_until: new.valid_until,
        superseded_by: None,
        confidence: new.confidence,
        access_count: 0,
        last_accessed: None,
        auto_tags,
    };

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    insert_row(&tx, &memory)?;
    if new.extract_entities {
        link_entities(&tx, project_key, &memory, analyzer)?;
    }
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MemoryStored,
        serde_json::json!({ "memory_id": memory.id, "collection": memory.collection }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    if new.auto_link {
        auto_link(pool, project_key, &memory)?;
    }

    Ok(memory)
}

fn auto_link(pool: &DbPool, project_key: &str, memory: &Memory) -> Result<()> {
    let candidates = list(pool, project_key, Some(&memory.collection))?
        .into_iter()
        .filter(|m| m.id != memory.id)
        .collect::<Vec<_>>();
    let matches = top_k_by_similarity(&memory.embedding, &candidates, |m| m.embedding.as_slice(), AUTO_LINK_MAX);

    let conn = pool.get()?;
    for (other, similarity) in matches {
        if similarity < AUTO_LINK_THRESHOLD {
            continue;
        }
        conn.execute(
            "INSERT OR IGNORE INTO memory_links (source, target, link_type, strength)
             VALUES (?1, ?2, 'related', ?3)",
            params![memory.id, other.id, f64::from(similarity)],
        )?;
    }
    Ok(())
}

/// Stores content via the Mem0 ADD/UPDATE/DELETE/NOOP pattern:
/// 1. Finds up to [`UPSERT_CANDIDATE_COUNT`] memories in the same
///    collection at or above [`UPSERT_CANDIDATE_THRESHOLD`] similarity.
/// 2. No candidates: adds a fresh memory (same as [`store`]).
/// 3. A candidate at or above [`EXACT_MATCH_THRESHOLD`]: no-ops against it.
/// 4. Otherwise asks `analyzer.analyze_operation` to choose add, update,
///    delete, or no-op against one of the candidates.
pub fn upsert(
    pool: &DbPool,
    events: &EventStore,
    embedder: &dyn Embedder,
    analyzer: &dyn Analyzer,
    project_key: &str,
    new: NewMemory,
) -> Result<Memory> {
    let embedding = embed_content(embedder, &new.content)?;
    let pool_candidates = list(pool, project_key, Some(&new.collection))?;
    let matches = top_k_by_similarity(&embedding, &pool_candidates, |m| m.embedding.as_slice(), UPSERT_CANDIDATE_COUNT);
    let candidates: Vec<(Memory, f32)> = matches
        .into_iter()
        .filter(|(_, s)| *s >= UPSERT_CANDIDATE_THRESHOLD)
        .map(|(m, s)| (m.clone(), s))
        .collect();

    if candidates.is_empty() {
        return store(pool, events, embedder, analyzer, project_key, new);
    }
    if let Some((exact, _)) = candidates.iter().find(|(_, s)| *s >= EXACT_MATCH_THRESHOLD) {
        return get_without_tracking(pool, &exact.id);
    }

    let analyzer_candidates: Vec<(String, String)> =
        candidates.iter().map(|(m, _)| (m.id.clone(), m.content.clone())).collect();
    let decision = analyzer.analyze_operation(&new.content, &analyzer_candidates);

    match decision {
        MemoryOperation::Add => store(pool, events, embedder, analyzer, project_key, new),
        MemoryOperation::Noop(id) => get_without_tracking(pool, &id),
        MemoryOperation::Update(id) => update_in_place(pool, events, project_key, &id, new, embedding),
        MemoryOperation::Delete(id) => {
            remove(pool, events, project_key, &id)?;
            store(pool, events, embedder, analyzer, project_key, new)
        }
    }
}

fn update_in_place(
    pool: &DbPool,
    events: &EventStore,
    project_key: &str,
    memory_id: &str,
    new: NewMemory,
    embedding: Vec<f32>,
) -> Result<Memory> {
    let now = Utc::now();
    let metadata_json = serde_json::to_string(&new.metadata)?;
    let embedding_json = serde_json::to_string(&embedding)?;

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE memories SET content = ?1, metadata_json = ?2, embedding_json = ?3,
                updated_at = ?4, confidence = ?5
         WHERE id = ?6",
        params![new.content, metadata_json, embedding_json, now.to_rfc3339(), new.confidence, memory_id],
    )?;
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MemoryUpdated,
        serde_json::json!({ "memory_id": memory_id }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);
    get_without_tracking(pool, memory_id)
}

/// Explicitly marks `old_id` as superseded by `new_id`: sets
/// `superseded_by`/`valid_until` on the old row and records a `supersedes`
/// link from the new memory to the old one. Both memories must already
/// exist — this only links them, it never creates content.
pub fn supersede(pool: &DbPool, events: &EventStore, project_key: &str, old_id: &str, new_id: &str) -> Result<Memory> {
    get_without_tracking(pool, new_id)?;
    let now = Utc::now();

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE memories SET superseded_by = ?1, valid_until = ?2 WHERE id = ?3",
        params![new_id, now.to_rfc3339(), old_id],
    )?;
    if updated == 0 {
        return Err(Error::MemoryNotFound(old_id.to_string()));
    }
    tx.execute("UPDATE memories SET valid_from = ?1 WHERE id = ?2", params![now.to_rfc3339(), new_id])?;
    tx.execute(
        "INSERT OR IGNORE INTO memory_links (source, target, link_type, strength)
         VALUES (?1, ?2, 'supersedes', 1.0)",
        params![new_id, old_id],
    )?;
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MemoryUpdated,
        serde_json::json!({ "memory_id": new_id, "supersedes": old_id }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);

    get_without_tracking(pool, new_id)
}

/// Walks `superseded_by` forward from `memory_id`, returning the full chain
/// from the given memory through whatever most recently superseded it.
/// Guards against a corrupted cycle by stopping after 1000 hops.
pub fn get_supersession_chain(pool: &DbPool, memory_id: &str) -> Result<Vec<Memory>> {
    let mut chain = Vec::new();
    let mut current = get_without_tracking(pool, memory_id)?;
    let mut hops = 0;
    loop {
        let next_id = current.superseded_by.clone();
        chain.push(current);
        let Some(next_id) = next_id else { break };
        hops += 1;
        if hops > 1000 {
            break;
        }
        current = get_without_tracking(pool, &next_id)?;
    }
    Ok(chain)
}

/// Fetches a memory by id without recording an access.
pub fn get_without_tracking(pool: &DbPool, memory_id: &str) -> Result<Memory> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT id, project_key, content, collection, metadata_json, embedding_json,
                created_at, updated_at, valid_from, valid_until, superseded_by, confidence,
                access_count, last_accessed, auto_tags_json
         FROM memories WHERE id = ?1",
        params![memory_id],
        row_to_memory,
    )
    .optional()?
    .ok_or_else(|| Error::MemoryNotFound(memory_id.to_string()))
}

/// Fetches a memory by id and records the access (bumps `access_count`,
/// sets `last_accessed`).
pub fn get(pool: &DbPool, memory_id: &str) -> Result<Memory> {
    let memory = get_without_tracking(pool, memory_id)?;
    track_access(pool, memory_id)?;
    Ok(Memory { access_count: memory.access_count + 1, ..memory })
}

/// Bumps `access_count` and `last_accessed` for a memory without fetching
/// or returning it. Used by [`get`] and by `find` when asked to track.
pub fn track_access(pool: &DbPool, memory_id: &str) -> Result<()> {
    let conn = pool.get()?;
    let updated = conn.execute(
        "UPDATE memories SET access_count = access_count + 1, last_accessed = ?1 WHERE id = ?2",
        params![Utc::now().to_rfc3339(), memory_id],
    )?;
    if updated == 0 {
        return Err(Error::MemoryNotFound(memory_id.to_string()));
    }
    Ok(())
}

/// Hard-deletes a memory.
pub fn remove(pool: &DbPool, events: &EventStore, project_key: &str, memory_id: &str) -> Result<()> {
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let deleted = tx.execute("DELETE FROM memories WHERE id = ?1", params![memory_id])?;
    if deleted == 0 {
        return Err(Error::MemoryNotFound(memory_id.to_string()));
    }
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MemoryDeleted,
        serde_json::json!({ "memory_id": memory_id }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);
    Ok(())
}

/// Lists memories in a project, optionally filtered to one collection.
/// Includes superseded rows — callers that only want current facts should
/// filter with [`Memory::is_valid_at`] or call [`find_valid_at`].
pub fn list(pool: &DbPool, project_key: &str, collection: Option<&str>) -> Result<Vec<Memory>> {
    let conn = pool.get()?;
    let sql = if collection.is_some() {
        "SELECT id, project_key, content, collection, metadata_json, embedding_json,
                created_at, updated_at, valid_from, valid_until, superseded_by, confidence,
                access_count, last_accessed, auto_tags_json
         FROM memories WHERE project_key = ?1 AND collection = ?2"
    } else {
        "SELECT id, project_key, content, collection, metadata_json, embedding_json,
                created_at, updated_at, valid_from, valid_until, superseded_by, confidence,
                access_count, last_accessed, auto_tags_json
         FROM memories WHERE project_key = ?1"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = if let Some(collection) = collection {
        stmt.query_map(params![project_key, collection], row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    } else {
        stmt.query_map(params![project_key], row_to_memory)?
            .collect::<rusqlite::Result<Vec<_>>>()?
    };
    Ok(rows)
}

/// All memories valid at `at` (not superseded, within their
/// `valid_from..valid_until` window), newest first. The building block
/// [`find`] and [`find_valid_at`] both filter down from.
fn list_valid_at(pool: &DbPool, project_key: &str, collection: Option<&str>, at: DateTime<Utc>) -> Result<Vec<Memory>> {
    let mut memories = list(pool, project_key, collection)?;
    memories.retain(|m| m.is_valid_at(at));
    memories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(memories)
}

/// Ranks memories valid at `at` against `query`, exactly like [`find`] but
/// restricted to the `(valid_from..valid_until)` window as of that instant
/// instead of "now".
pub fn find_valid_at(pool: &DbPool, embedder: Option<&dyn Embedder>, project_key: &str, query: &str, at: DateTime<Utc>, opts: &FindOptions) -> Result<Vec<MemoryMatch>> {
    let candidates = list_valid_at(pool, project_key, opts.collection.as_deref(), at)?;
    rank(pool, embedder, query, candidates, opts)
}

/// How far back `find` looks when `decay_tier` narrows results by recency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DecayTier {
    /// Updated within the last 7 days.
    Hot,
    /// Updated within the last 30 days.
    Warm,
    /// No recency cutoff.
    #[default]
    All,
}

impl DecayTier {
    #[must_use]
    fn cutoff_days(self) -> Option<i64> {
        match self {
            Self::Hot => Some(7),
            Self::Warm => Some(30),
            Self::All => None,
        }
    }
}

/// Options for [`find`].
pub struct FindOptions {
    pub collection: Option<String>,
    pub top_k: usize,
    pub decay_tier: DecayTier,
    /// Rank by keyword overlap instead of embeddings (also used as the
    /// automatic fallback when no embedder is available).
    pub fts: bool,
    /// Return full content. When `false`, content longer than 200 chars is
    /// truncated with a trailing `"..."`.
    pub expand: bool,
    /// Bump `access_count`/`last_accessed` on every result returned.
    pub track_access: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self { collection: None, top_k: 10, decay_tier: DecayTier::default(), fts: false, expand: true, track_access: false }
    }
}

/// A ranked `find` result: the memory (possibly content-truncated per
/// `expand`), its raw match score, and the recency/confidence decay factor
/// applied on top of it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MemoryMatch {
    pub memory: Memory,
    pub raw_score: f32,
    pub decay_factor: f64,
    pub score: f64,
}

/// Ranks currently-valid memories against `query`. With an embedder and
/// `fts=false`, ranks by cosine similarity; otherwise (or when no embedder
/// is supplied) falls back to keyword overlap, logging a warning in the
/// embedder-unavailable case. Every raw score is weighted by
/// [`decay_factor`] before sorting, so recent low-confidence memories can
/// still outrank stale high-confidence ones and vice versa.
pub fn find(pool: &DbPool, embedder: Option<&dyn Embedder>, project_key: &str, query: &str, opts: &FindOptions) -> Result<Vec<MemoryMatch>> {
    let now = Utc::now();
    let candidates = list_valid_at(pool, project_key, opts.collection.as_deref(), now)?;
    rank(pool, embedder, query, candidates, opts)
}

/// Shared scoring path for [`find`] and [`find_valid_at`]: applies the
/// `decay_tier` recency cutoff, ranks by embedding similarity or keyword
/// overlap, weights by [`decay_factor`], truncates content per `expand`,
/// and records access per `track_access`.
fn rank(pool: &DbPool, embedder: Option<&dyn Embedder>, query: &str, mut candidates: Vec<Memory>, opts: &FindOptions) -> Result<Vec<MemoryMatch>> {
    let now = Utc::now();
    if let Some(cutoff_days) = opts.decay_tier.cutoff_days() {
        let cutoff = now - chrono::Duration::days(cutoff_days);
        candidates.retain(|m| m.created_at >= cutoff);
    }

    let use_fts = opts.fts || embedder.is_none();
    if opts.fts {
        tracing::debug!("find: fts=true requested, ranking by keyword overlap");
    } else if embedder.is_none() {
        tracing::warn!("find: no embedder configured, falling back to keyword search");
    }

    let scored: Vec<(Memory, f32)> = if use_fts {
        keyword_rank(&candidates, query)
    } else {
        let embedding = embedder.expect("checked above").embed(query)?;
        top_k_by_similarity(&embedding, &candidates, |m| m.embedding.as_slice(), candidates.len())
            .into_iter()
            .map(|(m, s)| (m.clone(), s))
            .collect()
    };

    let mut matches: Vec<MemoryMatch> = scored
        .into_iter()
        .map(|(memory, raw_score)| {
            let decay = decay_factor(&memory, now);
            let score = f64::from(raw_score) * decay;
            MemoryMatch { memory, raw_score, decay_factor: decay, score }
        })
        .collect();
    matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    matches.truncate(opts.top_k);

    if !opts.expand {
        for m in &mut matches {
            if m.memory.content.len() > 200 {
                m.memory.content.truncate(200);
                m.memory.content.push_str("...");
            }
        }
    }
    if opts.track_access {
        for m in &matches {
            track_access(pool, &m.memory.id)?;
        }
    }
    Ok(matches)
}

/// Naive keyword-overlap ranking: fraction of query tokens present in the
/// memory's content, case-insensitive. Used for `fts=true` and as the
/// fallback when no embedder is configured.
fn keyword_rank(candidates: &[Memory], query: &str) -> Vec<(Memory, f32)> {
    let query_tokens: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();
    if query_tokens.is_empty() {
        return candidates.iter().map(|m| (m.clone(), 0.0)).collect();
    }
    candidates
        .iter()
        .map(|m| {
            let content_lower = m.content.to_lowercase();
            let hits = query_tokens.iter().filter(|t| content_lower.contains(t.as_str())).count();
            (m.clone(), hits as f32 / query_tokens.len() as f32)
        })
        .collect()
}

/// `0.5 ^ (age_days / (90 * (0.5 + confidence)))`: a memory's relevance
/// halves every `90 * (0.5 + confidence)` days since it was created, so
/// higher-confidence memories decay more slowly. Anchored on `created_at`,
/// not `updated_at` — only [`validate`] is meant to restart the clock;
/// an ordinary content edit (e.g. the smart-upsert UPDATE path) must not.
#[must_use]
pub fn decay_factor(memory: &Memory, now: DateTime<Utc>) -> f64 {
    let age_days = (now - memory.created_at).num_seconds().max(0) as f64 / 86_400.0;
    let half_life = DECAY_HALF_LIFE_BASE_DAYS * (0.5 + memory.confidence);
    0.5f64.powf(age_days / half_life)
}

/// Resets `created_at`/`updated_at` to now — restarting the recency decay
/// clock — to mark a memory as reconfirmed (`confirmed=true`) or disputed
/// (`confirmed=false`). Disputed memories are not deleted; the caller
/// decides whether to follow up with [`remove`].
pub fn validate(pool: &DbPool, events: &EventStore, project_key: &str, memory_id: &str, confirmed: bool) -> Result<Memory> {
    let now = Utc::now();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let updated = tx.execute(
        "UPDATE memories SET created_at = ?1, updated_at = ?1 WHERE id = ?2",
        params![now.to_rfc3339(), memory_id],
    )?;
    if updated == 0 {
        return Err(Error::MemoryNotFound(memory_id.to_string()));
    }
    let event = events.insert_event_in_tx(
        &tx,
        project_key,
        EventType::MemoryValidated,
        serde_json::json!({ "memory_id": memory_id, "confirmed": confirmed }),
    )?;
    tx.commit()?;
    events.notify_subscribers(project_key, event);
    get_without_tracking(pool, memory_id)
}

/// Aggregate counts for a project's memory store.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MemoryStats {
    pub total: u64,
    pub by_collection: std::collections::BTreeMap<String, u64>,
    pub average_confidence: f64,
}

pub fn stats(pool: &DbPool, project_key: &str) -> Result<MemoryStats> {
    let memories = list(pool, project_key, None)?;
    let mut by_collection = std::collections::BTreeMap::new();
    let mut confidence_sum = 0.0;
    for memory in &memories {
        *by_collection.entry(memory.collection.clone()).or_insert(0u64) += 1;
        confidence_sum += memory.confidence;
    }
    let total = memories.len() as u64;
    Ok(MemoryStats {
        total,
        by_collection,
        average_confidence: if total == 0 { 0.0 } else { confidence_sum / total as f64 },
    })
}

fn link_entities(tx: &rusqlite::Transaction<'_>, project_key: &str, memory: &Memory, analyzer: &dyn Analyzer) -> Result<()> {
    for (name, entity_type) in analyzer.extract_entities(&memory.content) {
        tx.execute(
            "INSERT OR IGNORE INTO entities (project_key, name, entity_type) VALUES (?1, ?2, ?3)",
            params![project_key, name, entity_type],
        )?;
        let entity_id: i64 = tx.query_row(
            "SELECT id FROM entities WHERE project_key = ?1 AND name = ?2 AND entity_type = ?3",
            params![project_key, name, entity_type],
            |row| row.get(0),
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO memory_entities (memory_id, entity_id) VALUES (?1, ?2)",
            params![memory.id, entity_id],
        )?;
    }
    Ok(())
}

fn insert_row(tx: &rusqlite::Transaction<'_>, memory: &Memory) -> Result<()> {
    let metadata_json = serde_json::to_string(&memory.metadata)?;
    let embedding_json = serde_json::to_string(&memory.embedding)?;
    let tags_json = serde_json::to_string(&memory.auto_tags)?;
    tx.execute(
        "INSERT INTO memories
            (id, project_key, content, collection, metadata_json, embedding_json, created_at,
             updated_at, valid_from, valid_until, superseded_by, confidence, access_count,
             last_accessed, auto_tags_json)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0, NULL, ?13)",
        params![
            memory.id, memory.project_key, memory.content, memory.collection, metadata_json,
            embedding_json, memory.created_at.to_rfc3339(), memory.updated_at.to_rfc3339(),
            memory.valid_from.map(|t| t.to_rfc3339()), memory.valid_until.map(|t| t.to_rfc3339()),
            memory.superseded_by, memory.confidence, tags_json,
        ],
    )?;
    Ok(())
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    let embedding_json: String = row.get(5)?;
    let created_at: String = row.get(6)?;
    let updated_at: String = row.get(7)?;
    let valid_from: Option<String> = row.get(8)?;
    let valid_until: Option<String> = row.get(9)?;
    let last_accessed: Option<String> = row.get(13)?;
    let tags_json: String = row.get(14)?;
    let metadata_json: String = row.get(4)?;

    Ok(Memory {
        id: row.get(0)?,
        project_key: row.get(1)?,
        content: row.get(2)?,
        collection: row.get(3)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::json!({})),
        embedding: serde_json::from_str(&embedding_json).unwrap_or_default(),
        created_at: parse_ts(&created_at),
        updated_at: parse_ts(&updated_at),
        valid_from: valid_from.map(|s| parse_ts(&s)),
        valid_until: valid_until.map(|s| parse_ts(&s)),
        superseded_by: row.get(10)?,
        confidence: row.get(11)?,
        access_count: row.get(12)?,
        last_accessed: last_accessed.map(|s| parse_ts(&s)),
        auto_tags: serde_json::from_str(&tags_json).unwrap_or_default(),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyze::HeuristicAnalyzer;
    use std::path::PathBuf;
    use substrate_db::PoolRegistry;

    struct DeterministicEmbedder;
    impl Embedder for DeterministicEmbedder {
        fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let mut v = vec![0.0f32; 4];
            for (i, byte) in text.bytes().enumerate() {
                v[i % 4] += f32::from(byte);
            }
            Ok(v)
        }
        fn dimension(&self) -> usize {
            4
        }
    }

    struct UpdateAnalyzer;
    impl Analyzer for UpdateAnalyzer {
        fn auto_tags(&self, _content: &str) -> Vec<String> {
            Vec::new()
        }
        fn extract_entities(&self, _content: &str) -> Vec<(String, String)> {
            Vec::new()
        }
        fn analyze_operation(&self, _content: &str, candidates: &[(String, String)]) -> MemoryOperation {
            MemoryOperation::Update(candidates[0].0.clone())
        }
    }

    struct DeleteAnalyzer;
    impl Analyzer for DeleteAnalyzer {
        fn auto_tags(&self, _content: &str) -> Vec<String> {
            Vec::new()
        }
        fn extract_entities(&self, _content: &str) -> Vec<(String, String)> {
            Vec::new()
        }
        fn analyze_operation(&self, _content: &str, candidates: &[(String, String)]) -> MemoryOperation {
            MemoryOperation::Delete(candidates[0].0.clone())
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
    fn store_and_get_round_trip() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "Alice prefers tabs over spaces".into(),
            ..Default::default()
        }).unwrap();

        assert!(memory.id.starts_with("mem-"));
        let fetched = get_without_tracking(&pool, &memory.id).unwrap();
        assert_eq!(fetched.content, "Alice prefers tabs over spaces");
        assert_eq!(fetched.access_count, 0);
    }

    #[test]
    fn get_tracks_access_count() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory::default()).unwrap();
        get(&pool, &memory.id).unwrap();
        get(&pool, &memory.id).unwrap();
        assert_eq!(get_without_tracking(&pool, &memory.id).unwrap().access_count, 2);
    }

    #[test]
    fn upsert_exact_match_noops() {
        let (pool, events, _tmp) = setup();
        let first = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "same same same same".into(),
            ..Default::default()
        }).unwrap();

        let second = upsert(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "same same same same".into(),
            ..Default::default()
        }).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(list(&pool, "proj", None).unwrap().len(), 1);
    }

    #[test]
    fn upsert_routes_to_update_when_analyzer_says_so() {
        let (pool, events, _tmp) = setup();
        let first = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "aaaa".into(),
            ..Default::default()
        }).unwrap();

        let second = upsert(&pool, &events, &DeterministicEmbedder, &UpdateAnalyzer, "proj", NewMemory {
            content: "aaab".into(),
            ..Default::default()
        }).unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.content, "aaab");
    }

    #[test]
    fn upsert_routes_to_delete_then_adds_fresh() {
        let (pool, events, _tmp) = setup();
        let first = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "aaaa".into(),
            ..Default::default()
        }).unwrap();

        let second = upsert(&pool, &events, &DeterministicEmbedder, &DeleteAnalyzer, "proj", NewMemory {
            content: "aaab".into(),
            ..Default::default()
        }).unwrap();

        assert_ne!(first.id, second.id);
        assert!(get_without_tracking(&pool, &first.id).is_err());
        assert_eq!(second.content, "aaab");
    }

    #[test]
    fn remove_deletes_the_row() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory::default()).unwrap();
        remove(&pool, &events, "proj", &memory.id).unwrap();
        assert!(get_without_tracking(&pool, &memory.id).is_err());
    }

    #[test]
    fn find_ranks_most_similar_first() {
        let (pool, events, _tmp) = setup();
        store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "aaaa".into(),
            ..Default::default()
        }).unwrap();
        store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "zzzzzzzz".into(),
            ..Default::default()
        }).unwrap();

        let results = find(&pool, Some(&DeterministicEmbedder), "proj", "aaaa", &FindOptions::default()).unwrap();
        assert_eq!(results[0].memory.content, "aaaa");
    }

    #[test]
    fn find_falls_back_to_keyword_search_without_embedder() {
        let (pool, events, _tmp) = setup();
        store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "agents coordinate via file reservations".into(),
            ..Default::default()
        }).unwrap();
        store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "unrelated content about cooking".into(),
            ..Default::default()
        }).unwrap();

        let results = find(&pool, None, "proj", "file reservations", &FindOptions::default()).unwrap();
        assert!(results[0].memory.content.contains("reservations"));
    }

    #[test]
    fn find_expand_false_truncates_long_content() {
        let (pool, events, _tmp) = setup();
        let long_content = "x".repeat(500);
        store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: long_content,
            ..Default::default()
        }).unwrap();

        let opts = FindOptions { expand: false, ..Default::default() };
        let results = find(&pool, Some(&DeterministicEmbedder), "proj", "x", &opts).unwrap();
        assert!(results[0].memory.content.ends_with("..."));
        assert_eq!(results[0].memory.content.len(), 203);
    }

    #[test]
    fn decay_factor_is_one_at_zero_age_and_shrinks_with_time() {
        let memory = Memory { created_at: Utc::now(), confidence: 0.7, ..Default::default() };
        assert!((decay_factor(&memory, Utc::now()) - 1.0).abs() < 1e-9);

        let old = Memory {
            created_at: Utc::now() - chrono::Duration::days(90),
            confidence: 0.7,
            ..Default::default()
        };
        let factor = decay_factor(&old, Utc::now());
        assert!(factor < 0.6 && factor > 0.4);
    }

    #[test]
    fn ordinary_content_update_does_not_restart_decay() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "aaaa".into(),
            ..Default::default()
        }).unwrap();
        let backdated = Utc::now() - chrono::Duration::days(30);
        {
            let conn = pool.get().unwrap();
            conn.execute(
                "UPDATE memories SET created_at = ?1 WHERE id = ?2",
                params![backdated.to_rfc3339(), memory.id],
            ).unwrap();
        }

        let updated = upsert(&pool, &events, &DeterministicEmbedder, &UpdateAnalyzer, "proj", NewMemory {
            content: "aaab".into(),
            ..Default::default()
        }).unwrap();

        assert_eq!(updated.id, memory.id);
        assert!((updated.created_at - backdated).num_seconds().abs() < 2);
    }

    #[test]
    fn validate_resets_age_without_changing_confidence() {
        let (pool, events, _tmp) = setup();
        let memory = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            confidence: 0.6,
            ..Default::default()
        }).unwrap();

        let backdated = Utc::now() - chrono::Duration::days(100);
        {
            let conn = pool.get().unwrap();
            conn.execute(
                "UPDATE memories SET created_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![backdated.to_rfc3339(), memory.id],
            ).unwrap();
        }

        let validated = validate(&pool, &events, "proj", &memory.id, true).unwrap();
        assert_eq!(validated.confidence, 0.6);
        assert!(validated.updated_at > backdated);
    }

    #[test]
    fn supersede_links_and_hides_old_from_find_valid_at() {
        let (pool, events, _tmp) = setup();
        let old = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "v1".into(),
            ..Default::default()
        }).unwrap();
        let new = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "v2".into(),
            ..Default::default()
        }).unwrap();

        supersede(&pool, &events, "proj", &old.id, &new.id).unwrap();

        let opts = FindOptions { fts: true, ..Default::default() };
        let current = find_valid_at(&pool, None, "proj", "v", Utc::now(), &opts).unwrap();
        assert!(current.iter().all(|m| m.memory.id != old.id));
        assert!(current.iter().any(|m| m.memory.id == new.id));
    }

    #[test]
    fn supersession_chain_walks_forward() {
        let (pool, events, _tmp) = setup();
        let v1 = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "v1".into(),
            ..Default::default()
        }).unwrap();
        let v2 = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "v2".into(),
            ..Default::default()
        }).unwrap();
        let v3 = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: "v3".into(),
            ..Default::default()
        }).unwrap();
        supersede(&pool, &events, "proj", &v1.id, &v2.id).unwrap();
        supersede(&pool, &events, "proj", &v2.id, &v3.id).unwrap();

        let chain = get_supersession_chain(&pool, &v1.id).unwrap();
        assert_eq!(chain.iter().map(|m| m.id.clone()).collect::<Vec<_>>(), vec![v1.id, v2.id, v3.id]);
    }

    #[test]
    fn stats_reports_totals_and_average_confidence() {
        let (pool, events, _tmp) = setup();
        store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory::default()).unwrap();
        let stats = stats(&pool, "proj").unwrap();
        assert_eq!(stats.total, 1);
        assert!(stats.average_confidence > 0.0);
    }

    #[test]
    fn long_content_is_chunked_and_averaged() {
        let (pool, events, _tmp) = setup();
        let long_content = "ab".repeat(20_000);
        let memory = store(&pool, &events, &DeterministicEmbedder, &HeuristicAnalyzer, "proj", NewMemory {
            content: long_content.clone(),
            ..Default::default()
        }).unwrap();
        assert_eq!(memory.content, long_content);
        assert_eq!(memory.embedding.len(), 4);
    }
}
