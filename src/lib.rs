//! taskweave - task scheduling core
//!
//! Tasks with a parent/subtask hierarchy, dependency edges and recurring
//! schedules, plus the `tw` CLI that drives them.
//!
//! # Core Concepts
//!
//! - **Hierarchy**: every task has at most one parent; the hierarchy stays a forest
//! - **Dependencies**: directed `depends_on` edges that must stay acyclic
//! - **Recurrence**: a template task materializes one open instance at a time
//!
//! # Module Organization
//!
//! - `dates`: calendar arithmetic with month-end clamping
//! - `recurrence`: recurrence rules and the instance engine
//! - `graph`: adjacency maps, ancestor walks and cycle checks
//! - `task`: task records and the snapshot they are mutated through
//! - `store`: JSON persistence under `.tw/`
//! - `lock`: file locking and atomic writes
//! - `config`: `.tw.toml` loading
//! - `error`: error types and exit codes
//! - `events`: JSONL event output
//! - `output`: human and JSON output for the CLI
//! - `cli`: command-line interface using clap

pub mod cli;
pub mod config;
pub mod dates;
pub mod error;
pub mod events;
pub mod graph;
pub mod lock;
pub mod output;
pub mod recurrence;
pub mod store;
pub mod task;

pub use error::{Error, Result};
