//! Configuration for the coordination substrate.
//!
//! Everything is read once via [`Config::from_env`]; callers that need to
//! override a value for a test construct a `Config` literal directly instead
//! of mutating the environment.

use std::path::PathBuf;

use crate::paths::default_state_dir;

/// Known embedding models and their output dimension.
/// Unknown models fall back to `EMBED_DIM` or [`Config::embed_dim`]'s default.
const KNOWN_EMBED_DIMS: &[(&str, usize)] = &[
    ("mxbai-embed-large", 1024),
    ("nomic-embed-text", 768),
    ("all-minilm", 384),
];

/// Default embedding dimension when the model is unrecognized and
/// `EMBED_DIM` is unset.
const DEFAULT_EMBED_DIM: usize = 384;

#[derive(Debug, Clone)]
pub struct Config {
    /// Base directory for per-project databases. Default: XDG state dir.
    pub state_dir: PathBuf,
    /// Embedder HTTP endpoint; `None` means no real embedder is configured
    /// (`Embedder` falls back to the pluggable stub / `fastembed` feature).
    pub embedder_url: Option<String>,
    /// Embedder model name; determines `embed_dim` unless `EMBED_DIM` overrides it.
    pub embedder_model: Option<String>,
    /// Explicit embedding dimension override.
    pub embed_dim_override: Option<usize>,
    /// Disables all rate limiting when true (tests, local dev).
    pub rate_limit_disabled: bool,
    /// How often the reservation sweeper scans for TTL-expired rows.
    pub reservation_sweep_interval_ms: u64,
    /// How long Hive tombstones are retained before they may be hard-deleted.
    pub hive_tombstone_ttl_days: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            embedder_url: None,
            embedder_model: None,
            embed_dim_override: None,
            rate_limit_disabled: false,
            reservation_sweep_interval_ms: 60_000,
            hive_tombstone_ttl_days: 30,
        }
    }
}

impl Config {
    /// Builds a `Config` from environment variables, falling back to the
    /// documented defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            state_dir: std::env::var("STATE_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map_or(defaults.state_dir, PathBuf::from),
            embedder_url: env_string("EMBEDDER_URL"),
            embedder_model: env_string("EMBEDDER_MODEL"),
            embed_dim_override: env_usize_opt("EMBED_DIM"),
            rate_limit_disabled: env_bool("RATE_LIMIT_DISABLED", defaults.rate_limit_disabled),
            reservation_sweep_interval_ms: env_u64(
                "RESERVATION_SWEEP_INTERVAL_MS",
                defaults.reservation_sweep_interval_ms,
            ),
            hive_tombstone_ttl_days: env_u64("HIVE_TOMBSTONE_TTL_DAYS", 30)
                .try_into()
                .unwrap_or(30),
        }
    }

    /// Resolves the embedding vector dimension: explicit override, else the
    /// known dimension for `embedder_model`, else [`DEFAULT_EMBED_DIM`].
    #[must_use]
    pub fn embed_dim(&self) -> usize {
        if let Some(d) = self.embed_dim_override {
            return d;
        }
        self.embedder_model
            .as_deref()
            .and_then(|model| {
                KNOWN_EMBED_DIMS
                    .iter()
                    .find(|(name, _)| *name == model)
                    .map(|(_, dim)| *dim)
            })
            .unwrap_or(DEFAULT_EMBED_DIM)
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize_opt(key: &str) -> Option<usize> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}
