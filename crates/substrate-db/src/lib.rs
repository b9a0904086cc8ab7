//! SQLite persistence for the coordination substrate.
//!
//! This crate provides:
//! - DDL for every table and FTS5 virtual table
//! - Idempotent integer-versioned migrations
//! - A per-project connection pool (`r2d2` over `rusqlite`)
//!
//! Each project gets its own SQLite file; there is no cross-project querying
//! at this layer. Row-level CRUD lives in the subsystem crates that own each
//! table (`substrate-events`, `substrate-mail`, `substrate-hive`,
//! `substrate-memory`) so each subsystem exclusively owns its own projection
//! tables.

#![forbid(unsafe_code)]

pub mod migrate;
pub mod pool;
pub mod schema;

pub use migrate::migrate;
pub use pool::{DbPool, PoolRegistry};
pub use schema::full_schema_sql;
