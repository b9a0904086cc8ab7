//! Shared types for the coordination substrate.
//!
//! This crate provides:
//! - Configuration (`Config`, environment parsing)
//! - Data models (`Agent`, `Message`, `Reservation`, etc.)
//! - Agent name validation and generation
//! - The error taxonomy shared by every other crate
//! - Per-project state-directory path resolution
//! - Conservative glob-vs-glob overlap detection for reservation conflicts

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod models;
pub mod pattern_overlap;
pub mod paths;

pub use config::Config;
pub use error::{Error, Result};
pub use models::{
    Agent, AgentLink, Importance, Message, MessageRecipient, Reservation, ReservationConflict,
    Thread, VALID_ADJECTIVES, VALID_NOUNS, generate_agent_name, is_valid_agent_name,
    sanitize_agent_name,
};
pub use pattern_overlap::{CompiledPattern, has_glob_meta, patterns_overlap};
pub use paths::{default_state_dir, project_db_path, project_slug};
