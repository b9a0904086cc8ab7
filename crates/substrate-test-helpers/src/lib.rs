//! Deterministic test doubles and a temp-dir project harness shared across
//! the workspace's crate test suites, so every crate's tests spin up a
//! project the same way instead of reimplementing fixture plumbing.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::rc::Rc;

use substrate_core::error::Result;
use substrate_db::{DbPool, PoolRegistry};
use substrate_events::EventStore;
use substrate_memory::{Analyzer, Embedder};

/// A fresh, on-disk (tempdir-backed) project with its pool and event store
/// wired together, matching how a real project is opened. The `TempDir`
/// must be held for the harness's lifetime — dropping it deletes the files
/// the pool's connections still reference.
pub struct ProjectHarness {
    pub pool: DbPool,
    pub events: EventStore,
    pub project_key: String,
    _tempdir: Rc<tempfile::TempDir>,
}

impl ProjectHarness {
    /// Opens a project named `project_key` in a fresh temp directory.
    #[must_use]
    pub fn new(project_key: &str) -> Self {
        let tempdir = Rc::new(tempfile::tempdir().expect("create temp dir for test project"));
        Self::in_dir(tempdir, project_key)
    }

    /// Opens a second project sharing this harness's temp directory root,
    /// for tests that exercise cross-project isolation or sync.
    #[must_use]
    pub fn sibling(&self, project_key: &str) -> Self {
        Self::in_dir(Rc::clone(&self._tempdir), project_key)
    }

    fn in_dir(tempdir: Rc<tempfile::TempDir>, project_key: &str) -> Self {
        let registry = PoolRegistry::new(PathBuf::from(tempdir.path()));
        let pool = registry.pool_for(project_key).expect("open pool for test project");
        let events = EventStore::new(registry);
        Self {
            pool,
            events,
            project_key: project_key.to_string(),
            _tempdir: tempdir,
        }
    }
}

/// Deterministic embedder for tests: hashes each byte of the input into a
/// fixed-width vector, so identical strings always embed identically and
/// near-identical strings land close together without a model download.
pub struct StubEmbedder {
    dimension: usize,
}

impl StubEmbedder {
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for StubEmbedder {
    fn default() -> Self {
        Self::new(8)
    }
}

impl Embedder for StubEmbedder {
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

/// Analyzer stub returning fixed, predictable output regardless of input —
/// for tests that exercise the auto-tagging/auto-linking plumbing without
/// caring what the tags actually are.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubAnalyzer;

impl Analyzer for StubAnalyzer {
    fn auto_tags(&self, _content: &str) -> Vec<String> {
        vec!["stub-tag".to_string()]
    }

    fn extract_entities(&self, _content: &str) -> Vec<(String, String)> {
        vec![("StubEntity".to_string(), "concept".to_string())]
    }
}
