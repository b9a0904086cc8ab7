//! Shared data models for the coordination substrate.
//!
//! Every project lives in its own SQLite database (see [`crate::paths`]), so
//! unlike a multi-tenant schema these rows do not need a numeric project FK —
//! `project_key` is carried on a handful of tables (`events`, `agents`)
//! purely for self-description of exported rows; the db file itself is
//! already project-scoped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Agent
// =============================================================================

/// An agent is a named actor — typically an autonomous worker process —
/// collaborating on a project.
///
/// # Naming rules
/// Names are auto-generated as `Adjective+Noun` when omitted at registration
/// (75 adjectives × 132 nouns = 9,900 combinations), case-insensitive unique
/// per project. Callers may also supply their own name; it only has to be
/// non-empty and unique, the adjective+noun vocabulary is a default, not a
/// hard requirement for caller-supplied names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Option<i64>,
    pub project_key: String,
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub registered_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    /// Contact policy gating `send`: "open" | "auto" | "`contacts_only`" | "`block_all`".
    pub contact_policy: String,
}

impl Default for Agent {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: None,
            project_key: String::new(),
            name: String::new(),
            program: String::new(),
            model: String::new(),
            task_description: String::new(),
            registered_at: now,
            last_active_at: now,
            contact_policy: "open".to_string(),
        }
    }
}

// =============================================================================
// Message / Thread
// =============================================================================

/// Importance levels, ordered `urgent > high > normal > low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Normal,
    High,
    Urgent,
}

impl Importance {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

impl std::str::FromStr for Importance {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "urgent" => Ok(Self::Urgent),
            other => Err(crate::error::Error::Validation(format!(
                "invalid importance: {other}"
            ))),
        }
    }
}

/// A message sent between agents, optionally grouped into a thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Option<i64>,
    pub project_key: String,
    pub sender_id: i64,
    pub thread_id: Option<String>,
    pub subject: String,
    pub body_md: String,
    pub importance: String,
    pub ack_required: bool,
    pub created_at: DateTime<Utc>,
    /// JSON array of attachment metadata; not in the distilled wire spec, but
    /// `send`/`read` need somewhere to carry LLM-authored file references.
    pub attachments: String,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: None,
            project_key: String::new(),
            sender_id: 0,
            thread_id: None,
            subject: String::new(),
            body_md: String::new(),
            importance: Importance::Normal.as_str().to_string(),
            ack_required: false,
            created_at: Utc::now(),
            attachments: "[]".to_string(),
        }
    }
}

/// Per-recipient delivery state for a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecipient {
    pub message_id: i64,
    pub agent_id: i64,
    pub read_at: Option<DateTime<Utc>>,
    pub acked_at: Option<DateTime<Utc>>,
}

impl Default for MessageRecipient {
    fn default() -> Self {
        Self {
            message_id: 0,
            agent_id: 0,
            read_at: None,
            acked_at: None,
        }
    }
}

/// A thread is derived from messages sharing a `thread_id`; this row just
/// tracks bookkeeping (creation/last-activity) so `summarize_thread` doesn't
/// have to rescan the whole message table for metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub thread_id: String,
    pub project_key: String,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

// =============================================================================
// File reservations
// =============================================================================

/// A time-bounded exclusive (or shared) claim on a set of file paths/globs.
///
/// One row per `reserve` call: `patterns` holds every path/glob passed in
/// that call, serialized as `patterns_json` in storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Option<i64>,
    pub project_key: String,
    pub agent_id: i64,
    pub patterns: Vec<String>,
    pub exclusive: bool,
    pub reason: String,
    pub reserved_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub released_at: Option<DateTime<Utc>>,
    pub reservation_event_id: Option<i64>,
}

impl Default for Reservation {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: None,
            project_key: String::new(),
            agent_id: 0,
            patterns: Vec::new(),
            exclusive: true,
            reason: String::new(),
            reserved_at: now,
            expires_at: now,
            released_at: None,
            reservation_event_id: None,
        }
    }
}

impl Reservation {
    /// Active iff not released and not past its TTL as of `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.released_at.is_none() && self.expires_at > now
    }
}

/// One path/pattern's conflicting holders, returned by `reserve`/`conflicts_for`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConflict {
    pub path: String,
    pub holders: Vec<String>,
}

// =============================================================================
// Agent contact links (supplemented; default policy leaves `send` unguarded)
// =============================================================================

/// A contact link between two agents, possibly across projects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLink {
    pub id: Option<i64>,
    pub a_project_key: String,
    pub a_agent_id: i64,
    pub b_project_key: String,
    pub b_agent_id: i64,
    /// Status: "pending" | "approved" | "blocked"
    pub status: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Default for AgentLink {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: None,
            a_project_key: String::new(),
            a_agent_id: 0,
            b_project_key: String::new(),
            b_agent_id: 0,
            status: "pending".to_string(),
            reason: String::new(),
            created_at: now,
            updated_at: now,
            expires_at: None,
        }
    }
}

// =============================================================================
// Agent name vocabulary
// =============================================================================

/// Valid adjectives for agent names (75 total).
pub const VALID_ADJECTIVES: &[&str] = &[
    "red",
    "orange",
    "yellow",
    "pink",
    "black",
    "purple",
    "blue",
    "brown",
    "white",
    "green",
    "chartreuse",
    "lilac",
    "fuchsia",
    "azure",
    "amber",
    "coral",
    "crimson",
    "cyan",
    "gold",
    "golden",
    "gray",
    "indigo",
    "ivory",
    "jade",
    "lavender",
    "magenta",
    "maroon",
    "navy",
    "olive",
    "pearl",
    "rose",
    "ruby",
    "sage",
    "scarlet",
    "silver",
    "teal",
    "topaz",
    "violet",
    "cobalt",
    "copper",
    "bronze",
    "emerald",
    "sapphire",
    "turquoise",
    "beige",
    "tan",
    "cream",
    "peach",
    "plum",
    "sunny",
    "misty",
    "foggy",
    "stormy",
    "windy",
    "frosty",
    "dusty",
    "hazy",
    "cloudy",
    "rainy",
    "snowy",
    "icy",
    "mossy",
    "sandy",
    "swift",
    "quiet",
    "bold",
    "calm",
    "bright",
    "dark",
    "wild",
    "silent",
    "gentle",
    "rustic",
    "noble",
    "proud",
];

/// Valid nouns for agent names (132 total).
pub const VALID_NOUNS: &[&str] = &[
    // Geography / Nature
    "stone",
    "lake",
    "creek",
    "pond",
    "mountain",
    "hill",
    "snow",
    "castle",
    "river",
    "forest",
    "valley",
    "canyon",
    "meadow",
    "prairie",
    "desert",
    "island",
    "cliff",
    "cave",
    "glacier",
    "waterfall",
    "spring",
    "stream",
    "reef",
    "dune",
    "ridge",
    "peak",
    "gorge",
    "marsh",
    "brook",
    "glen",
    "grove",
    "fern",
    "hollow",
    "basin",
    "cove",
    "bay",
    "harbor",
    "coast",
    "shore",
    "bluff",
    "knoll",
    "summit",
    "plateau",
    // Animals - mammals
    "dog",
    "cat",
    "bear",
    "fox",
    "wolf",
    "deer",
    "elk",
    "moose",
    "otter",
    "beaver",
    "badger",
    "lynx",
    "puma",
    "squirrel",
    "rabbit",
    "hare",
    "mouse",
    "mink",
    "seal",
    "horse",
    "lion",
    "tiger",
    "panther",
    "leopard",
    "jaguar",
    "coyote",
    "bison",
    "ox",
    // Animals - birds
    "hawk",
    "eagle",
    "owl",
    "falcon",
    "raven",
    "heron",
    "crane",
    "finch",
    "robin",
    "sparrow",
    "duck",
    "goose",
    "swan",
    "dove",
    "wren",
    "jay",
    "lark",
    "kite",
    "condor",
    "osprey",
    "pelican",
    "gull",
    "tern",
    "stork",
    "ibis",
    "cardinal",
    "oriole",
    "thrush",
    // Animals - fish/reptiles
    "trout",
    "salmon",
    "bass",
    "pike",
    "carp",
    "turtle",
    "frog",
    // Trees/Plants
    "pine",
    "oak",
    "maple",
    "birch",
    "cedar",
    "willow",
    "aspen",
    "elm",
    "orchid",
    "lotus",
    "ivy",
    // Structures
    "tower",
    "bridge",
    "forge",
    "mill",
    "barn",
    "gate",
    "anchor",
    "lantern",
    "beacon",
    "compass",
    "horizon",
    "spire",
    "chapel",
    "citadel",
    "fortress",
];

/// Normalizes a user-provided agent name; returns `None` if nothing remains.
///
/// `value.trim()`, drop everything outside `[A-Za-z0-9]`, cap at 128 chars.
#[must_use]
pub fn sanitize_agent_name(value: &str) -> Option<String> {
    let mut cleaned: String = value
        .trim()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    if cleaned.len() > 128 {
        cleaned.truncate(128);
    }

    Some(cleaned)
}

/// Precomputed set of all 9,900 valid lowercased adjective+noun names.
fn valid_names_set() -> &'static std::collections::HashSet<String> {
    static SET: std::sync::OnceLock<std::collections::HashSet<String>> = std::sync::OnceLock::new();
    SET.get_or_init(|| {
        let mut set =
            std::collections::HashSet::with_capacity(VALID_ADJECTIVES.len() * VALID_NOUNS.len());
        for adj in VALID_ADJECTIVES {
            for noun in VALID_NOUNS {
                set.insert(format!("{adj}{noun}"));
            }
        }
        set
    })
}

/// Whether `name` is one of the adjective+noun combinations, case-insensitive.
///
/// This only gates auto-generated names; a caller-supplied name need only be
/// unique per project, so this helper is advisory, not enforced on every
/// registration.
#[must_use]
pub fn is_valid_agent_name(name: &str) -> bool {
    valid_names_set().contains(&name.to_lowercase())
}

fn capitalize_first(s: &str) -> String {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    let mut out: String = first.to_uppercase().collect();
    out.push_str(chars.as_str());
    out
}

/// Generates a random valid `Adjective+Noun` agent name.
#[must_use]
pub fn generate_agent_name() -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    use std::time::{SystemTime, UNIX_EPOCH};

    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());

    let mut hasher = DefaultHasher::new();
    seed.hash(&mut hasher);
    let hash = hasher.finish();

    let adj_idx = usize::try_from(hash % (VALID_ADJECTIVES.len() as u64)).unwrap_or(0);
    let noun_idx = usize::try_from((hash >> 32) % (VALID_NOUNS.len() as u64)).unwrap_or(0);

    let adj_cap = capitalize_first(VALID_ADJECTIVES[adj_idx]);
    let noun_cap = capitalize_first(VALID_NOUNS[noun_idx]);

    format!("{adj_cap}{noun_cap}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_agent_names_case_insensitive() {
        assert!(is_valid_agent_name("GreenLake"));
        assert!(is_valid_agent_name("greenlake"));
        assert!(is_valid_agent_name("GREENLAKE"));
        assert!(is_valid_agent_name("CrimsonFern"));
        assert!(is_valid_agent_name("VioletHorizon"));
    }

    #[test]
    fn invalid_agent_names_rejected() {
        assert!(!is_valid_agent_name("BackendHarmonizer"));
        assert!(!is_valid_agent_name("Alice"));
        assert!(!is_valid_agent_name(""));
    }

    #[test]
    fn exhaustive_name_count() {
        assert_eq!(VALID_ADJECTIVES.len(), 75);
        assert_eq!(VALID_NOUNS.len(), 132);
        assert_eq!(valid_names_set().len(), 75 * 132);
    }

    #[test]
    fn generated_name_is_always_valid() {
        for _ in 0..20 {
            let name = generate_agent_name();
            assert!(is_valid_agent_name(&name), "bad generated name: {name}");
        }
    }

    #[test]
    fn sanitize_strips_non_alphanumeric_and_trims() {
        assert_eq!(
            sanitize_agent_name("  BlueLake "),
            Some("BlueLake".to_string())
        );
        assert_eq!(
            sanitize_agent_name("Blue Lake!"),
            Some("BlueLake".to_string())
        );
        assert_eq!(sanitize_agent_name("$$$"), None);
        assert_eq!(sanitize_agent_name(""), None);
    }

    #[test]
    fn importance_orders_urgent_highest() {
        assert!(Importance::Urgent > Importance::High);
        assert!(Importance::High > Importance::Normal);
        assert!(Importance::Normal > Importance::Low);
    }

    #[test]
    fn importance_from_str_roundtrips() {
        for imp in [
            Importance::Low,
            Importance::Normal,
            Importance::High,
            Importance::Urgent,
        ] {
            let parsed: Importance = imp.as_str().parse().unwrap();
            assert_eq!(parsed, imp);
        }
        assert!("bogus".parse::<Importance>().is_err());
    }

    #[test]
    fn reservation_active_iff_unreleased_and_unexpired() {
        let now = Utc::now();
        let mut r = Reservation {
            expires_at: now + chrono::Duration::seconds(60),
            ..Default::default()
        };
        assert!(r.is_active(now));
        r.released_at = Some(now);
        assert!(!r.is_active(now));
        r.released_at = None;
        r.expires_at = now - chrono::Duration::seconds(1);
        assert!(!r.is_active(now));
    }

    #[test]
    fn message_default_is_normal_importance_no_attachments() {
        let m = Message::default();
        assert_eq!(m.importance, "normal");
        assert_eq!(m.attachments, "[]");
        assert!(!m.ack_required);
    }

    #[test]
    fn agent_default_contact_policy_is_open() {
        assert_eq!(Agent::default().contact_policy, "open");
    }
}
