//! DDL for the per-project coordination-substrate database.
//!
//! One SQLite file per project; every table below lives in that single file.
//! Applied by [`crate::migrate::migrate`] as migration version 1.

/// Core tables: events, agents, messages, threads, reservations.
pub const CREATE_CORE_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS events (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project_key     TEXT NOT NULL,
    type            TEXT NOT NULL,
    sequence        INTEGER NOT NULL,
    timestamp_ms    INTEGER NOT NULL,
    data_json       TEXT NOT NULL,
    UNIQUE (project_key, sequence)
);
CREATE INDEX IF NOT EXISTS idx_events_project_seq ON events (project_key, sequence);
CREATE INDEX IF NOT EXISTS idx_events_project_type ON events (project_key, type);

CREATE TABLE IF NOT EXISTS agents (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project_key     TEXT NOT NULL,
    name            TEXT NOT NULL,
    program         TEXT NOT NULL DEFAULT '',
    model           TEXT NOT NULL DEFAULT '',
    task_description TEXT NOT NULL DEFAULT '',
    registered_at   TEXT NOT NULL,
    last_active_at  TEXT NOT NULL,
    contact_policy  TEXT NOT NULL DEFAULT 'open',
    UNIQUE (project_key, name COLLATE NOCASE)
);

CREATE TABLE IF NOT EXISTS agent_links (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    a_project_key   TEXT NOT NULL,
    a_agent_id      INTEGER NOT NULL,
    b_project_key   TEXT NOT NULL,
    b_agent_id      INTEGER NOT NULL,
    status          TEXT NOT NULL DEFAULT 'pending',
    reason          TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    expires_at      TEXT
);

CREATE TABLE IF NOT EXISTS threads (
    thread_id       TEXT PRIMARY KEY,
    project_key     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    last_activity_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project_key     TEXT NOT NULL,
    sender_id       INTEGER NOT NULL REFERENCES agents (id),
    thread_id       TEXT,
    subject         TEXT NOT NULL DEFAULT '',
    body_md         TEXT NOT NULL DEFAULT '',
    importance      TEXT NOT NULL DEFAULT 'normal',
    ack_required    INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    attachments     TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages (thread_id);
CREATE INDEX IF NOT EXISTS idx_messages_project_created ON messages (project_key, created_at);

CREATE TABLE IF NOT EXISTS message_recipients (
    message_id      INTEGER NOT NULL REFERENCES messages (id),
    agent_id        INTEGER NOT NULL REFERENCES agents (id),
    read_at         TEXT,
    acked_at        TEXT,
    PRIMARY KEY (message_id, agent_id)
);
CREATE INDEX IF NOT EXISTS idx_recipients_agent ON message_recipients (agent_id);

CREATE TABLE IF NOT EXISTS reservations (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    project_key             TEXT NOT NULL,
    agent_id                INTEGER NOT NULL REFERENCES agents (id),
    patterns_json           TEXT NOT NULL,
    exclusive               INTEGER NOT NULL DEFAULT 1,
    reason                  TEXT NOT NULL DEFAULT '',
    reserved_at             TEXT NOT NULL,
    expires_at              TEXT NOT NULL,
    released_at             TEXT,
    reservation_event_id    INTEGER
);
CREATE INDEX IF NOT EXISTS idx_reservations_active
    ON reservations (project_key, released_at, expires_at);
CREATE INDEX IF NOT EXISTS idx_reservations_agent ON reservations (agent_id);

CREATE TABLE IF NOT EXISTS rate_limit_buckets (
    agent_id        INTEGER NOT NULL,
    endpoint        TEXT NOT NULL,
    tokens          REAL NOT NULL,
    last_refill_ms  INTEGER NOT NULL,
    PRIMARY KEY (agent_id, endpoint)
);
";

/// Hive (work-item graph) tables.
pub const CREATE_HIVE_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS cells (
    id              TEXT PRIMARY KEY,
    project_key     TEXT NOT NULL,
    title           TEXT NOT NULL,
    description     TEXT,
    status          TEXT NOT NULL DEFAULT 'open',
    priority        INTEGER NOT NULL DEFAULT 2,
    issue_type      TEXT NOT NULL DEFAULT 'task',
    parent_id       TEXT REFERENCES cells (id),
    assignee        TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    closed_at       TEXT,
    deleted_at      TEXT,
    is_blocked      INTEGER NOT NULL DEFAULT 0,
    metadata_json   TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_cells_project_status ON cells (project_key, status);
CREATE INDEX IF NOT EXISTS idx_cells_parent ON cells (parent_id);

CREATE TABLE IF NOT EXISTS cell_dependencies (
    from_cell       TEXT NOT NULL REFERENCES cells (id),
    to_cell         TEXT NOT NULL REFERENCES cells (id),
    relationship    TEXT NOT NULL,
    PRIMARY KEY (from_cell, to_cell, relationship)
);
CREATE INDEX IF NOT EXISTS idx_cell_deps_to ON cell_dependencies (to_cell);

CREATE TABLE IF NOT EXISTS cell_labels (
    cell_id         TEXT NOT NULL REFERENCES cells (id),
    name            TEXT NOT NULL,
    PRIMARY KEY (cell_id, name)
);

CREATE TABLE IF NOT EXISTS cell_comments (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    cell_id         TEXT NOT NULL REFERENCES cells (id),
    author          TEXT NOT NULL,
    body            TEXT NOT NULL,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_comments_cell ON cell_comments (cell_id);
";

/// Memory store tables.
pub const CREATE_MEMORY_TABLES_SQL: &str = r"
CREATE TABLE IF NOT EXISTS memories (
    id              TEXT PRIMARY KEY,
    project_key     TEXT NOT NULL,
    content         TEXT NOT NULL,
    collection      TEXT NOT NULL DEFAULT 'default',
    metadata_json   TEXT NOT NULL DEFAULT '{}',
    embedding_json  TEXT NOT NULL DEFAULT '[]',
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    valid_from      TEXT,
    valid_until     TEXT,
    superseded_by   TEXT REFERENCES memories (id),
    confidence      REAL NOT NULL DEFAULT 0.7,
    access_count    INTEGER NOT NULL DEFAULT 0,
    last_accessed   TEXT,
    auto_tags_json  TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_memories_project_collection ON memories (project_key, collection);
CREATE INDEX IF NOT EXISTS idx_memories_superseded_by ON memories (superseded_by);

CREATE TABLE IF NOT EXISTS memory_links (
    source          TEXT NOT NULL REFERENCES memories (id),
    target          TEXT NOT NULL REFERENCES memories (id),
    link_type       TEXT NOT NULL,
    strength        REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (source, target, link_type)
);

CREATE TABLE IF NOT EXISTS entities (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    project_key     TEXT NOT NULL,
    name            TEXT NOT NULL,
    entity_type     TEXT NOT NULL,
    UNIQUE (project_key, name, entity_type)
);

CREATE TABLE IF NOT EXISTS relationships (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    subject_entity  INTEGER NOT NULL REFERENCES entities (id),
    predicate       TEXT NOT NULL,
    object_entity   INTEGER NOT NULL REFERENCES entities (id),
    confidence      REAL NOT NULL DEFAULT 0.7,
    memory_id       TEXT NOT NULL REFERENCES memories (id)
);
CREATE INDEX IF NOT EXISTS idx_relationships_subject ON relationships (subject_entity);
CREATE INDEX IF NOT EXISTS idx_relationships_object ON relationships (object_entity);

CREATE TABLE IF NOT EXISTS memory_entities (
    memory_id       TEXT NOT NULL REFERENCES memories (id),
    entity_id       INTEGER NOT NULL REFERENCES entities (id),
    PRIMARY KEY (memory_id, entity_id)
);
";

/// FTS5 virtual tables over `messages(subject, body)` and `memories(content)`.
/// `messages_fts` is content-linked via triggers so it can never drift from
/// the source rows; `memories_fts` is maintained explicitly by
/// `substrate-memory` since memory content is mutated by `upsert`.
pub const CREATE_FTS_TABLES_SQL: &str = r"
CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts USING fts5(
    subject, body_md,
    content='messages', content_rowid='id'
);
CREATE TRIGGER IF NOT EXISTS messages_fts_ai AFTER INSERT ON messages BEGIN
    INSERT INTO messages_fts(rowid, subject, body_md) VALUES (new.id, new.subject, new.body_md);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_ad AFTER DELETE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, subject, body_md)
    VALUES ('delete', old.id, old.subject, old.body_md);
END;
CREATE TRIGGER IF NOT EXISTS messages_fts_au AFTER UPDATE ON messages BEGIN
    INSERT INTO messages_fts(messages_fts, rowid, subject, body_md)
    VALUES ('delete', old.id, old.subject, old.body_md);
    INSERT INTO messages_fts(rowid, subject, body_md) VALUES (new.id, new.subject, new.body_md);
END;

CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content, tokenize='porter unicode61'
);
";

/// All table/trigger DDL, applied as migration version 1.
#[must_use]
pub fn full_schema_sql() -> String {
    format!(
        "{CREATE_CORE_TABLES_SQL}{CREATE_HIVE_TABLES_SQL}{CREATE_MEMORY_TABLES_SQL}{CREATE_FTS_TABLES_SQL}"
    )
}
