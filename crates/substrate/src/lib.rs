//! A single `Substrate` handle over the four coordination subsystems
//! (events, mail, hive, memory), one SQLite file per project. Every
//! pass-through method here is a thin call into the subsystem crate that
//! actually implements the operation; this crate adds project-scoping and
//! a shared embedder/config, nothing else.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use substrate_core::config::Config;
use substrate_core::error::Result;
use substrate_db::{DbPool, PoolRegistry};
use substrate_events::{Event, EventStore, ReadFilter};
use substrate_hive::{CellFilter, CellUpdate, EpicResult, NewCell, NewSubtask};
use substrate_mail::{InboxOptions, MessageView, NewAgent, SendRequest, ThreadSummary};
use substrate_memory::{Analyzer, Embedder, FindOptions, HashEmbedder, HeuristicAnalyzer, Memory, MemoryMatch, MemoryStats, NewMemory};

/// Top-level handle: owns the per-project connection pool registry and the
/// shared event store. Cheap to clone (both inner types are `Arc`-backed).
#[derive(Clone)]
pub struct Substrate {
    registry: PoolRegistry,
    events: EventStore,
    config: Config,
}

impl Substrate {
    /// Opens the substrate rooted at `config.state_dir`, creating it if
    /// absent.
    #[must_use]
    pub fn open(config: Config) -> Self {
        let registry = PoolRegistry::new(config.state_dir.clone());
        let events = EventStore::new(registry.clone());
        Self { registry, events, config }
    }

    /// Opens the substrate using [`Config::from_env`].
    #[must_use]
    pub fn open_default() -> Self {
        Self::open(Config::from_env())
    }

    /// Opens the substrate at an explicit directory, ignoring the
    /// environment. Mainly for tests and embedding in another tool.
    #[must_use]
    pub fn open_at(state_dir: PathBuf) -> Self {
        Self::open(Config { state_dir, ..Config::default() })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &EventStore {
        &self.events
    }

    /// Opens (creating on first use) the per-project database and returns a
    /// scoped handle to it.
    pub fn project(&self, project_key: &str) -> Result<Project> {
        let pool = self.registry.pool_for(project_key)?;
        Ok(Project {
            pool,
            events: self.events.clone(),
            project_key: project_key.to_string(),
            embedder: build_embedder(&self.config),
            analyzer: HeuristicAnalyzer,
        })
    }
}

fn build_embedder(config: &Config) -> HashEmbedder {
    // `embedder_url`/`embedder_model` select a real model at the MCP-tool
    // layer above this crate (an HTTP-backed `Embedder` or the `fastembed`
    // feature's `FastEmbedEmbedder`); absent one, the deterministic
    // hashing embedder keeps `store`/`upsert` always callable.
    HashEmbedder::new(config.embed_dim())
}

/// All operations scoped to one project's database. `substrate-core`,
/// `substrate-events`, `substrate-mail`, `substrate-hive`, and
/// `substrate-memory` each own the actual behavior; this type just carries
/// the pool/event-store/embedder triple so callers don't thread them
/// through every call.
pub struct Project {
    pool: DbPool,
    events: EventStore,
    project_key: String,
    embedder: HashEmbedder,
    analyzer: HeuristicAnalyzer,
}

impl Project {
    #[must_use]
    pub fn project_key(&self) -> &str {
        &self.project_key
    }

    #[must_use]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    // ---- Events --------------------------------------------------------

    pub fn read_events(&self, filter: &ReadFilter) -> Result<Vec<Event>> {
        self.events.read(&self.project_key, filter)
    }

    // ---- Agents ---------------------------------------------------------

    pub fn register_agent(&self, new: NewAgent) -> Result<substrate_core::models::Agent> {
        substrate_mail::agents::register(&self.pool, &self.events, &self.project_key, new)
    }

    pub fn touch_agent(&self, agent_id: i64) -> Result<()> {
        substrate_mail::agents::touch(&self.pool, &self.events, &self.project_key, agent_id)
    }

    pub fn agent(&self, agent_id: i64) -> Result<substrate_core::models::Agent> {
        substrate_mail::agents::get(&self.pool, &self.project_key, agent_id)
    }

    pub fn agent_by_name(&self, name: &str) -> Result<substrate_core::models::Agent> {
        substrate_mail::agents::get_by_name(&self.pool, &self.project_key, name)
    }

    // ---- Mail -------------------------------------------------------------

    pub fn send(&self, rate_limit_disabled: bool, req: SendRequest) -> Result<MessageView> {
        substrate_mail::send(&self.pool, &self.events, &self.project_key, rate_limit_disabled, req)
    }

    pub fn inbox(&self, agent_id: i64, opts: &InboxOptions) -> Result<Vec<MessageView>> {
        substrate_mail::inbox(&self.pool, agent_id, opts)
    }

    pub fn read_message(&self, message_id: i64, agent_id: i64) -> Result<MessageView> {
        substrate_mail::read(&self.pool, &self.events, &self.project_key, message_id, agent_id)
    }

    pub fn ack_message(&self, message_id: i64, agent_id: i64) -> Result<()> {
        substrate_mail::ack(&self.pool, &self.events, &self.project_key, message_id, agent_id)
    }

    pub fn summarize_thread(&self, thread_id: &str) -> Result<ThreadSummary> {
        substrate_mail::summarize_thread(&self.pool, thread_id)
    }

    pub fn search_messages(&self, agent_id: i64, query: &str, limit: i64) -> Result<Vec<substrate_core::models::Message>> {
        substrate_mail::search(&self.pool, agent_id, query, limit)
    }

    // ---- Reservations -------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn reserve(
        &self,
        rate_limit_disabled: bool,
        agent_id: i64,
        patterns: Vec<String>,
        exclusive: bool,
        reason: String,
        ttl_seconds: u32,
    ) -> Result<substrate_core::models::Reservation> {
        substrate_mail::reserve(
            &self.pool,
            &self.events,
            &self.project_key,
            rate_limit_disabled,
            agent_id,
            patterns,
            exclusive,
            reason,
            ttl_seconds,
        )
    }

    pub fn release_reservation(&self, reservation_id: i64, agent_id: i64) -> Result<()> {
        substrate_mail::release(&self.pool, &self.events, &self.project_key, reservation_id, agent_id)
    }

    pub fn conflicts_for(&self, path: &str, exclude_agent_id: Option<i64>) -> Result<Vec<substrate_core::models::ReservationConflict>> {
        substrate_mail::conflicts_for(&self.pool, &self.project_key, path, exclude_agent_id)
    }

    /// Releases every expired reservation. Intended to be called
    /// periodically by a background task (see [`Substrate::config`]'s
    /// `reservation_sweep_interval_ms`).
    pub fn sweep_expired_reservations(&self) -> Result<u64> {
        substrate_mail::sweep_expired(&self.pool, &self.events, &self.project_key)
    }

    // ---- Hive -----------------------------------------------------------

    pub fn create_cell(&self, new: NewCell) -> Result<substrate_hive::Cell> {
        substrate_hive::create(&self.pool, &self.events, &self.project_key, new)
    }

    pub fn create_epic(&self, title: String, description: Option<String>, subtasks: Vec<NewSubtask>) -> Result<EpicResult> {
        substrate_hive::create_epic(&self.pool, &self.events, &self.project_key, title, description, subtasks)
    }

    pub fn cell(&self, cell_id: &str) -> Result<substrate_hive::Cell> {
        substrate_hive::get(&self.pool, cell_id)
    }

    pub fn query_cells(&self, filter: &CellFilter) -> Result<Vec<substrate_hive::Cell>> {
        substrate_hive::query(&self.pool, &self.project_key, filter)
    }

    pub fn update_cell(&self, cell_id: &str, patch: CellUpdate) -> Result<substrate_hive::Cell> {
        substrate_hive::update(&self.pool, &self.events, &self.project_key, cell_id, patch)
    }

    pub fn close_cell(&self, cell_id: &str, reason: &str, result: Option<&str>) -> Result<substrate_hive::Cell> {
        substrate_hive::close(&self.pool, &self.events, &self.project_key, cell_id, reason, result)
    }

    pub fn reopen_cell(&self, cell_id: &str) -> Result<substrate_hive::Cell> {
        substrate_hive::reopen(&self.pool, &self.events, &self.project_key, cell_id)
    }

    pub fn delete_cell(&self, cell_id: &str, reason: &str) -> Result<()> {
        substrate_hive::delete(&self.pool, &self.events, &self.project_key, cell_id, reason)
    }

    pub fn ready_cells(&self) -> Result<Vec<substrate_hive::Cell>> {
        substrate_hive::ready(&self.pool, &self.project_key)
    }

    pub fn blocked_cells(&self) -> Result<Vec<substrate_hive::BlockedCell>> {
        substrate_hive::blocked(&self.pool, &self.project_key)
    }

    pub fn statistics(&self) -> Result<substrate_hive::Statistics> {
        substrate_hive::statistics(&self.pool, &self.project_key)
    }

    pub fn resolve_partial_cell_id(&self, partial: &str) -> Result<substrate_hive::PartialIdMatch> {
        substrate_hive::resolve_partial_id(&self.pool, &self.project_key, partial)
    }

    pub fn add_dependency(&self, from_cell: &str, to_cell: &str, relationship: &str) -> Result<()> {
        substrate_hive::add_dependency(&self.pool, &self.events, &self.project_key, from_cell, to_cell, relationship)
    }

    // ---- Memory -----------------------------------------------------------

    pub fn store_memory(&self, new: NewMemory) -> Result<Memory> {
        substrate_memory::store(&self.pool, &self.events, &self.embedder, &self.analyzer, &self.project_key, new)
    }

    pub fn upsert_memory(&self, new: NewMemory) -> Result<Memory> {
        substrate_memory::upsert(&self.pool, &self.events, &self.embedder, &self.analyzer, &self.project_key, new)
    }

    pub fn find_memory(&self, query: &str, opts: &FindOptions) -> Result<Vec<MemoryMatch>> {
        substrate_memory::find(&self.pool, Some(&self.embedder as &dyn Embedder), &self.project_key, query, opts)
    }

    pub fn get_memory(&self, memory_id: &str) -> Result<Memory> {
        substrate_memory::get(&self.pool, memory_id)
    }

    pub fn remove_memory(&self, memory_id: &str) -> Result<()> {
        substrate_memory::remove(&self.pool, &self.events, &self.project_key, memory_id)
    }

    pub fn list_memories(&self, collection: Option<&str>) -> Result<Vec<Memory>> {
        substrate_memory::list(&self.pool, &self.project_key, collection)
    }

    pub fn memory_stats(&self) -> Result<MemoryStats> {
        substrate_memory::stats(&self.pool, &self.project_key)
    }

    pub fn validate_memory(&self, memory_id: &str, confirmed: bool) -> Result<Memory> {
        substrate_memory::validate(&self.pool, &self.events, &self.project_key, memory_id, confirmed)
    }

    pub fn supersede_memory(&self, old_id: &str, new_id: &str) -> Result<Memory> {
        substrate_memory::supersede(&self.pool, &self.events, &self.project_key, old_id, new_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use substrate_mail::SendRequest;

    fn open() -> (Substrate, tempfile::TempDir) {
        let tmp = tempfile::tempdir().unwrap();
        (Substrate::open_at(tmp.path().to_path_buf()), tmp)
    }

    #[test]
    fn register_then_send_then_inbox_round_trips() {
        let (substrate, _tmp) = open();
        let project = substrate.project("proj").unwrap();

        let alice = project
            .register_agent(NewAgent { name: Some("alice".into()), ..Default::default() })
            .unwrap();
        let bob = project
            .register_agent(NewAgent { name: Some("bob".into()), ..Default::default() })
            .unwrap();

        project
            .send(
                true,
                SendRequest {
                    sender_id: alice.id.unwrap(),
                    recipient_ids: vec![bob.id.unwrap()],
                    thread_id: None,
                    subject: "hi".into(),
                    body_md: "hello".into(),
                    importance: substrate_core::models::Importance::Normal,
                    ack_required: false,
                    attachments: serde_json::json!([]),
                },
            )
            .unwrap();

        let inbox = project.inbox(bob.id.unwrap(), &InboxOptions::default()).unwrap();
        assert_eq!(inbox.len(), 1);
    }

    #[test]
    fn store_and_find_memory_round_trips() {
        let (substrate, _tmp) = open();
        let project = substrate.project("proj").unwrap();

        project
            .store_memory(NewMemory { content: "the deployment runs on port 8080".into(), ..Default::default() })
            .unwrap();

        let results = project.find_memory("deployment port", &FindOptions::default()).unwrap();
        assert!(!results.is_empty());
    }

    #[test]
    fn create_and_close_cell_round_trips() {
        let (substrate, _tmp) = open();
        let project = substrate.project("proj").unwrap();

        let cell = project.create_cell(NewCell { title: "fix the bug".into(), ..Default::default() }).unwrap();
        let closed = project.close_cell(&cell.id, "fixed", Some("shipped in v1")).unwrap();
        assert_eq!(closed.status, "closed");
    }

    #[test]
    fn projects_are_isolated_by_key() {
        let (substrate, _tmp) = open();
        let a = substrate.project("proj-a").unwrap();
        let b = substrate.project("proj-b").unwrap();

        a.register_agent(NewAgent { name: Some("alice".into()), ..Default::default() }).unwrap();
        assert!(b.agent_by_name("alice").is_err());
    }
}
