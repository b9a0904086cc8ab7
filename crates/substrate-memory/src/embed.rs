//! Pluggable embedding backend and brute-force cosine-similarity search.

use substrate_core::error::Result;

/// Turns text into a fixed-dimension vector. Implementations are swappable
/// so tests can run without a model download (see
/// `substrate-test-helpers::StubEmbedder`).
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn dimension(&self) -> usize;
}

/// Cosine similarity between two equal-length vectors. Returns `0.0` for a
/// zero-length or mismatched-length input rather than panicking.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Scans `candidates` and returns the `top_k` most similar to `query`,
/// descending by similarity. O(n) over the candidate set — adequate at the
/// per-project memory volumes this store targets; an ANN index is not
/// warranted.
#[must_use]
pub fn top_k_by_similarity<'a, T>(
    query: &[f32],
    candidates: &'a [T],
    embedding_of: impl Fn(&T) -> &[f32],
    top_k: usize,
) -> Vec<(&'a T, f32)> {
    let mut scored: Vec<(&T, f32)> = candidates
        .iter()
        .map(|c| (c, cosine_similarity(query, embedding_of(c))))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(top_k);
    scored
}

/// Deterministic feature-hashing `Embedder`: every byte of the input text
/// is folded into a fixed-width vector, then L2-normalized. No model
/// download, no network I/O — used when `Config::embedder_url` is unset,
/// so `store`/`upsert` always have a concrete `Embedder` to call even
/// without `fastembed` configured. Similarity under this scheme tracks
/// byte-level overlap, not semantics; callers wanting real semantic
/// search must configure a real embedder.
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut v = vec![0.0f32; self.dimension];
        for (i, byte) in text.bytes().enumerate() {
            v[i % self.dimension] += f32::from(byte);
        }
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(feature = "fastembed")]
pub struct FastEmbedEmbedder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

#[cfg(feature = "fastembed")]
impl FastEmbedEmbedder {
    pub fn try_new(model_name: &str, dimension: usize) -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
        let model_enum = match model_name {
            "nomic-embed-text" => EmbeddingModel::NomicEmbedTextV15,
            "all-minilm" => EmbeddingModel::AllMiniLML6V2,
            _ => EmbeddingModel::BGEBaseENV15,
        };
        let model = TextEmbedding::try_new(InitOptions::new(model_enum))
            .map_err(|e| substrate_core::error::Error::EmbeddingUnavailable(e.to_string()))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimension,
        })
    }
}

#[cfg(feature = "fastembed")]
impl Embedder for FastEmbedEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let model = self
            .model
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| substrate_core::error::Error::EmbeddingUnavailable(e.to_string()))?;
        embeddings
            .pop()
            .ok_or_else(|| substrate_core::error::Error::EmbeddingUnavailable("empty result".into()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_vectors_have_similarity_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn orthogonal_vectors_have_similarity_zero() {
        assert!((cosine_similarity(&[1.0, 0.0], &[0.0, 1.0])).abs() < 1e-6);
    }

    #[test]
    fn mismatched_lengths_return_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn top_k_orders_by_descending_similarity() {
        let candidates = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.9, 0.1]];
        let results = top_k_by_similarity(&[1.0, 0.0], &candidates, |v| v.as_slice(), 2);
        assert_eq!(results.len(), 2);
        assert!(results[0].1 >= results[1].1);
    }

    #[test]
    fn hash_embedder_is_deterministic_and_respects_dimension() {
        let embedder = HashEmbedder::new(16);
        assert_eq!(embedder.dimension(), 16);
        assert_eq!(embedder.embed("hello").unwrap(), embedder.embed("hello").unwrap());
        assert_eq!(embedder.embed("hello").unwrap().len(), 16);
    }
}
