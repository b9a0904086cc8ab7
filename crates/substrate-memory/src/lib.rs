//! Durable per-project agent memory: embeddings, temporal validity, a
//! small knowledge graph, and JSONL sync.
#![forbid(unsafe_code)]

pub mod analyze;
pub mod embed;
pub mod graph;
pub mod models;
pub mod store;
pub mod sync;

pub use analyze::{Analyzer, HeuristicAnalyzer, MemoryOperation};
pub use embed::{cosine_similarity, top_k_by_similarity, Embedder, HashEmbedder};
pub use graph::{
    assert_relationship, find_by_entity, find_entity_by_name, get_entity, get_knowledge_graph,
    get_linked_memories, memories_mentioning, neighborhood, outgoing_relationships, upsert_entity,
    MemoryKnowledgeGraph,
};
pub use models::{generate_memory_id, Entity, Memory, Relationship};
pub use store::{
    decay_factor, find, find_valid_at, get, get_supersession_chain, get_without_tracking, list,
    remove, stats, store, supersede, track_access, upsert, validate, DecayTier, FindOptions,
    MemoryMatch, MemoryStats, NewMemory,
};
pub use sync::{export_jsonl, import_jsonl, ExportFilter, ImportReport, ImportStrategy, MemoryRecord};

#[cfg(feature = "fastembed")]
pub use embed::FastEmbedEmbedder;
