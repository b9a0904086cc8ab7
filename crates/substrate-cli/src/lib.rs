//! Command-line front end over the coordination substrate.
//!
//! Thin by design: every subcommand parses its arguments, opens a
//! [`substrate::Substrate`] handle rooted at `--state-dir` (or
//! `Config::from_env`'s default), calls straight into the one matching
//! `Project` method, and prints the result as JSON. No business logic
//! lives here.

#![forbid(unsafe_code)]

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;
use substrate::Substrate;
use substrate_core::config::Config;
use substrate_core::error::{Error, Result};
use substrate_mail::{InboxOptions, NewAgent, SendRequest};
use substrate_memory::{FindOptions, NewMemory};

#[derive(Debug, Parser)]
#[command(name = "substrate", about = "Coordination substrate: mail, work cells, and memory for cooperating agents")]
pub struct Cli {
    /// Project identifier; each project gets its own SQLite database.
    #[arg(long, global = true, default_value = "default")]
    pub project: String,

    /// Overrides `Config::from_env`'s state directory.
    #[arg(long, global = true)]
    pub state_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Register a new agent.
    Register {
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value = "")]
        program: String,
        #[arg(long, default_value = "")]
        model: String,
        #[arg(long, default_value = "")]
        task: String,
    },
    /// Send a message.
    Send {
        #[arg(long)]
        sender_id: i64,
        #[arg(long, required = true)]
        to: Vec<i64>,
        #[arg(long)]
        thread_id: Option<String>,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        body: String,
        #[arg(long)]
        urgent: bool,
        #[arg(long)]
        ack_required: bool,
    },
    /// List an agent's inbox.
    Inbox {
        #[arg(long)]
        agent_id: i64,
        #[arg(long, default_value_t = 5)]
        limit: i64,
        #[arg(long)]
        urgent_only: bool,
    },
    /// Reserve a set of path globs.
    Reserve {
        #[arg(long)]
        agent_id: i64,
        #[arg(long, required = true)]
        pattern: Vec<String>,
        #[arg(long)]
        exclusive: bool,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value_t = 1800)]
        ttl_seconds: u32,
    },
    /// Release a reservation.
    Release {
        #[arg(long)]
        reservation_id: i64,
        #[arg(long)]
        agent_id: i64,
    },
    /// Create a work cell.
    CreateCell {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: Option<String>,
        #[arg(long, default_value_t = 2)]
        priority: i32,
    },
    /// Close a work cell.
    CloseCell {
        #[arg(long)]
        cell_id: String,
        #[arg(long)]
        reason: String,
        #[arg(long)]
        result: Option<String>,
    },
    /// List cells that are ready to work on.
    Ready,
    /// Store a memory.
    Remember {
        #[arg(long)]
        content: String,
        #[arg(long, default_value = "default")]
        collection: String,
    },
    /// Search memories.
    Recall {
        #[arg(long)]
        query: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

/// Runs `cli.command` against a freshly-opened substrate and returns the
/// JSON value to print. Separated from `main` so tests can drive it
/// without going through process argv/exit.
pub fn run(cli: &Cli) -> Result<serde_json::Value> {
    let config = match &cli.state_dir {
        Some(dir) => Config { state_dir: dir.clone(), ..Config::from_env() },
        None => Config::from_env(),
    };
    let substrate = Substrate::open(config);
    let project = substrate.project(&cli.project)?;

    let value = match &cli.command {
        Command::Register { name, program, model, task } => {
            let agent = project.register_agent(NewAgent {
                name: name.clone(),
                program: program.clone(),
                model: model.clone(),
                task_description: task.clone(),
            })?;
            serde_json::to_value(agent).map_err(Error::from)?
        }
        Command::Send { sender_id, to, thread_id, subject, body, urgent, ack_required } => {
            let view = project.send(
                false,
                SendRequest {
                    sender_id: *sender_id,
                    recipient_ids: to.clone(),
                    thread_id: thread_id.clone(),
                    subject: subject.clone(),
                    body_md: body.clone(),
                    importance: if *urgent {
                        substrate_core::models::Importance::Urgent
                    } else {
                        substrate_core::models::Importance::Normal
                    },
                    ack_required: *ack_required,
                    attachments: json!([]),
                },
            )?;
            serde_json::to_value(view).map_err(Error::from)?
        }
        Command::Inbox { agent_id, limit, urgent_only } => {
            let opts = InboxOptions { limit: *limit, urgent_only: *urgent_only, since_ts: None };
            let messages = project.inbox(*agent_id, &opts)?;
            serde_json::to_value(messages).map_err(Error::from)?
        }
        Command::Reserve { agent_id, pattern, exclusive, reason, ttl_seconds } => {
            let reservation = project.reserve(
                false,
                *agent_id,
                pattern.clone(),
                *exclusive,
                reason.clone(),
                *ttl_seconds,
            )?;
            serde_json::to_value(reservation).map_err(Error::from)?
        }
        Command::Release { reservation_id, agent_id } => {
            project.release_reservation(*reservation_id, *agent_id)?;
            json!({ "released": true })
        }
        Command::CreateCell { title, description, priority } => {
            let cell = project.create_cell(substrate_hive::NewCell {
                title: title.clone(),
                description: description.clone(),
                priority: *priority,
                ..Default::default()
            })?;
            serde_json::to_value(cell).map_err(Error::from)?
        }
        Command::CloseCell { cell_id, reason, result } => {
            let cell = project.close_cell(cell_id, reason, result.as_deref())?;
            serde_json::to_value(cell).map_err(Error::from)?
        }
        Command::Ready => {
            let cells = project.ready_cells()?;
            serde_json::to_value(cells).map_err(Error::from)?
        }
        Command::Remember { content, collection } => {
            let memory = project.store_memory(NewMemory {
                content: content.clone(),
                collection: collection.clone(),
                ..Default::default()
            })?;
            serde_json::to_value(memory).map_err(Error::from)?
        }
        Command::Recall { query, limit } => {
            let opts = FindOptions { top_k: *limit, ..Default::default() };
            let matches = project.find_memory(query, &opts)?;
            serde_json::to_value(matches).map_err(Error::from)?
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(project: &str, state_dir: PathBuf, command: Command) -> Cli {
        Cli { project: project.to_string(), state_dir: Some(state_dir), command }
    }

    #[test]
    fn register_and_inbox_round_trip_through_run() {
        let tmp = tempfile::tempdir().unwrap();

        let registered = run(&cli(
            "proj",
            tmp.path().to_path_buf(),
            Command::Register { name: Some("alice".into()), program: "cli".into(), model: "n/a".into(), task: "test".into() },
        ))
        .unwrap();
        let agent_id = registered["id"].as_i64().unwrap();

        let inbox = run(&cli(
            "proj",
            tmp.path().to_path_buf(),
            Command::Inbox { agent_id, limit: 5, urgent_only: false },
        ))
        .unwrap();
        assert!(inbox.as_array().unwrap().is_empty());
    }

    #[test]
    fn remember_and_recall_round_trip_through_run() {
        let tmp = tempfile::tempdir().unwrap();

        run(&cli(
            "proj",
            tmp.path().to_path_buf(),
            Command::Remember { content: "the release train leaves fridays".into(), collection: "default".into() },
        ))
        .unwrap();

        let found = run(&cli(
            "proj",
            tmp.path().to_path_buf(),
            Command::Recall { query: "release train".into(), limit: 10 },
        ))
        .unwrap();
        assert!(!found.as_array().unwrap().is_empty());
    }
}
