//! Work-item graph: cells, dependencies with cycle detection, a denormalized
//! `is_blocked` cache, and JSONL export/import with three-way merge.

#![forbid(unsafe_code)]

pub mod cells;
pub mod graph;
pub mod models;
pub mod queries;
pub mod sync;

pub use cells::{
    close, create, create_epic, delete, get, get_including_deleted, list_all, query, reopen,
    set_status, update, CellFilter, CellUpdate, EpicResult, NewCell, NewSubtask,
};
pub use graph::{add_dependency, remove_dependency, rebuild_blocked_cache};
pub use models::{generate_cell_id, generate_subtask_id, Cell, CellComment, CellDependency, CellStatus};
pub use queries::{
    blocked, epics_eligible_for_closure, ready, resolve_partial_id, stale, statistics,
    BlockedCell, PartialIdMatch, Statistics,
};
pub use sync::{export_jsonl, import_jsonl, CellRecord, CommentRecord, MergeReport};
