//! Pluggable text analysis used by `store`/`upsert`: auto-tagging, naive
//! entity extraction for the knowledge graph, and the ADD/UPDATE/DELETE/NOOP
//! operation decision `upsert` defers to when new content resembles
//! existing memories.

/// What [`Analyzer::analyze_operation`] decides `upsert` should do with a
/// new piece of content, given similar existing memories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryOperation {
    /// Insert as a brand-new memory.
    Add,
    /// Update the memory at this id in place with the new content.
    Update(String),
    /// The new content contradicts/retracts the memory at this id.
    Delete(String),
    /// The new content adds nothing; leave the store unchanged.
    Noop(String),
}

/// Derives auto-tags and entity mentions from memory content, and decides
/// how new content should be reconciled against similar existing memories.
/// Swappable so tests can use a deterministic stub instead of a real LLM.
pub trait Analyzer: Send + Sync {
    fn auto_tags(&self, content: &str) -> Vec<String>;
    /// Returns `(name, entity_type)` pairs mentioned in `content`.
    fn extract_entities(&self, content: &str) -> Vec<(String, String)>;

    /// Given new `content` and up to a handful of similar existing memories
    /// `(id, content)`, decides whether to add, update, delete, or no-op.
    /// The default heuristic: exact text match is a no-op against that
    /// memory; otherwise always add, since judging "does this contradict an
    /// existing fact" needs real language understanding a heuristic can't
    /// safely approximate.
    fn analyze_operation(&self, content: &str, candidates: &[(String, String)]) -> MemoryOperation {
        if let Some((id, _)) = candidates.iter().find(|(_, c)| c == content) {
            return MemoryOperation::Noop(id.clone());
        }
        MemoryOperation::Add
    }
}

/// Heuristic analyzer: tags from lowercased significant words, entities
/// from capitalized tokens (treated as `"concept"`). Good enough as a
/// default when no smarter analyzer is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicAnalyzer;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "is", "are", "was", "were", "to", "of", "in", "on",
    "for", "with", "this", "that", "it", "as", "by", "at",
];

impl Analyzer for HeuristicAnalyzer {
    fn auto_tags(&self, content: &str) -> Vec<String> {
        let mut tags: Vec<String> = content
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 3)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()))
            .collect();
        tags.sort();
        tags.dedup();
        tags.truncate(10);
        tags
    }

    fn extract_entities(&self, content: &str) -> Vec<(String, String)> {
        let mut entities = Vec::new();
        for word in content.split_whitespace() {
            let trimmed = word.trim_matches(|c: char| !c.is_alphanumeric());
            if trimmed.len() > 1
                && trimmed.chars().next().is_some_and(char::is_uppercase)
                && trimmed.chars().skip(1).any(char::is_lowercase)
            {
                entities.push((trimmed.to_string(), "concept".to_string()));
            }
        }
        entities.sort();
        entities.dedup();
        entities
    }
}
