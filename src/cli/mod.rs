//! Command-line interface for tw
//!
//! This module defines the CLI structure using clap derive macros.
//! Each command group is implemented in its own submodule.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::events::{Event, EventDestination, EventKind, EventSink};
use crate::output::OutputOptions;
use crate::store::TaskStore;

mod dep;
mod init;
mod recur;
mod task;

/// tw - tasks with subtasks, dependencies and recurring schedules
#[derive(Parser, Debug)]
#[command(name = "tw")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace directory holding `.tw/` (defaults to current directory)
    #[arg(long, global = true, env = "TW_DIR")]
    pub dir: Option<PathBuf>,

    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit JSONL events to a file, or `-` for stdout
    #[arg(long, global = true, value_name = "PATH")]
    pub events: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a task store in the workspace
    Init,

    /// Create, inspect and update tasks
    #[command(subcommand)]
    Task(TaskCommands),

    /// Manage dependency edges between tasks
    #[command(subcommand)]
    Dep(DepCommands),

    /// Manage recurring schedules
    #[command(subcommand)]
    Recur(RecurCommands),

    /// Materialize due instances of every recurring task
    Tick,

    /// Check the stored hierarchy and dependency graph for cycles
    Validate,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommands {
    /// Create a task
    New {
        title: String,

        #[arg(long)]
        description: Option<String>,

        /// low, medium, high, urgent
        #[arg(long)]
        priority: Option<String>,

        #[arg(long)]
        project: Option<String>,

        #[arg(long)]
        assignee: Option<String>,

        /// Estimated effort in hours
        #[arg(long)]
        estimate: Option<f64>,

        /// Sort position among siblings
        #[arg(long)]
        position: Option<i32>,

        #[arg(long = "category")]
        categories: Vec<String>,

        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: Option<String>,

        /// Due date (YYYY-MM-DD)
        #[arg(long)]
        due: Option<String>,

        /// Parent task id
        #[arg(long)]
        parent: Option<String>,
    },

    /// List tasks
    List {
        /// Filter by status: todo, in_progress, done
        #[arg(long)]
        status: Option<String>,
    },

    /// List open tasks whose dependencies are all done
    Ready,

    /// Show a task with its relations
    Show { id: String },

    /// Set task status
    Status { id: String, status: String },

    /// Mark a task in progress
    Start { id: String },

    /// Mark a task done
    Done { id: String },

    /// Move a task back to todo
    Reopen { id: String },

    /// Manage the parent/subtask hierarchy
    #[command(subcommand)]
    Parent(ParentCommands),

    /// Delete a task
    Rm { id: String },
}

#[derive(Subcommand, Debug)]
pub enum ParentCommands {
    /// Set the parent of a task
    Set { child: String, parent: String },

    /// Move a task to the root
    Clear { child: String },
}

#[derive(Subcommand, Debug)]
pub enum DepCommands {
    /// Record that TASK depends on DEPENDS_ON
    Add { task: String, depends_on: String },

    /// Remove a dependency edge
    Rm { task: String, depends_on: String },

    /// Report whether a task's dependencies are all done
    Check { task: String },
}

#[derive(Subcommand, Debug)]
pub enum RecurCommands {
    /// Attach (or replace) a recurrence rule
    Set {
        id: String,

        /// daily, weekly, monthly, yearly, weekdays, custom
        #[arg(long)]
        pattern: String,

        #[arg(long, default_value_t = 1)]
        interval: u32,

        /// Days of week, e.g. `mon,thu` or `0,3`
        #[arg(long)]
        days: Option<String>,

        #[arg(long)]
        day_of_month: Option<u32>,

        #[arg(long)]
        month: Option<u32>,

        /// Last date an occurrence may fall on (YYYY-MM-DD)
        #[arg(long, conflicts_with = "count")]
        until: Option<String>,

        /// Maximum number of generated instances
        #[arg(long)]
        count: Option<u32>,
    },

    /// Remove a recurrence rule
    Clear {
        id: String,

        /// Also delete generated instances that are not done
        #[arg(long, conflicts_with = "keep_instances")]
        cascade: bool,

        /// Keep generated instances even if configured to cascade
        #[arg(long)]
        keep_instances: bool,
    },

    /// Preview the next occurrence date
    Next { id: String },

    /// Mark INSTANCE as generated from TEMPLATE
    Link { instance: String, template: String },

    /// Detach an instance from its template
    Unlink { instance: String },
}

/// Flags shared by every command.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    pub dir: Option<PathBuf>,
    pub json: bool,
    pub quiet: bool,
    pub events: Option<String>,
}

impl GlobalOptions {
    fn root(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(std::env::current_dir()?),
        }
    }

    fn open_store(&self) -> Result<TaskStore> {
        Ok(TaskStore::open(self.root()?))
    }

    /// Output options; events on stdout take precedence over other output.
    fn output(&self, events_to_stdout: bool) -> OutputOptions {
        OutputOptions {
            json: self.json && !events_to_stdout,
            quiet: self.quiet || events_to_stdout,
        }
    }

    fn open_event_sink(&self) -> Result<(Option<EventSink>, bool)> {
        let destination = EventDestination::parse(self.events.as_deref());
        let sink = destination.as_ref().map(|dest| dest.open()).transpose()?;
        let events_to_stdout = matches!(destination, Some(EventDestination::Stdout));
        Ok((sink, events_to_stdout))
    }
}

/// Write one event; failures come back as a warning for the human output.
fn emit_event<T: Serialize>(sink: &mut Option<EventSink>, kind: EventKind, data: T) -> Option<String> {
    let sink = sink.as_mut()?;
    let event = match Event::new(kind).with_data(data) {
        Ok(event) => event,
        Err(err) => return Some(format!("event output failed: {err}")),
    };
    if let Err(err) = sink.emit(&event) {
        return Some(format!("event output failed: {err}"));
    }
    None
}

fn parse_date(label: &str, value: Option<&str>) -> Result<Option<NaiveDate>> {
    let Some(value) = value else {
        return Ok(None);
    };
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .map(Some)
        .map_err(|err| Error::InvalidArgument(format!("invalid {label} date '{value}': {err}")))
}

impl Cli {
    pub fn run(self) -> Result<()> {
        let global = GlobalOptions {
            dir: self.dir,
            json: self.json,
            quiet: self.quiet,
            events: self.events,
        };

        match self.command {
            Commands::Init => init::run(global),
            Commands::Tick => recur::run_tick(global),
            Commands::Validate => init::run_validate(global),
            Commands::Task(cmd) => match cmd {
                TaskCommands::New {
                    title,
                    description,
                    priority,
                    project,
                    assignee,
                    estimate,
                    position,
                    categories,
                    tags,
                    start,
                    due,
                    parent,
                } => task::run_new(task::NewOptions {
                    title,
                    description,
                    priority,
                    project,
                    assignee,
                    estimate,
                    position,
                    categories,
                    tags,
                    start,
                    due,
                    parent,
                    global,
                }),
                TaskCommands::List { status } => task::run_list(task::ListOptions { status, global }),
                TaskCommands::Ready => task::run_ready(global),
                TaskCommands::Show { id } => task::run_show(task::ShowOptions { id, global }),
                TaskCommands::Status { id, status } => {
                    task::run_status(task::StatusOptions { id, status, global })
                }
                TaskCommands::Start { id } => task::run_status(task::StatusOptions {
                    id,
                    status: "in_progress".to_string(),
                    global,
                }),
                TaskCommands::Done { id } => task::run_status(task::StatusOptions {
                    id,
                    status: "done".to_string(),
                    global,
                }),
                TaskCommands::Reopen { id } => task::run_status(task::StatusOptions {
                    id,
                    status: "todo".to_string(),
                    global,
                }),
                TaskCommands::Parent(cmd) => match cmd {
                    ParentCommands::Set { child, parent } => task::run_parent(task::ParentOptions {
                        child,
                        parent: Some(parent),
                        global,
                    }),
                    ParentCommands::Clear { child } => task::run_parent(task::ParentOptions {
                        child,
                        parent: None,
                        global,
                    }),
                },
                TaskCommands::Rm { id } => task::run_rm(task::ShowOptions { id, global }),
            },
            Commands::Dep(cmd) => match cmd {
                DepCommands::Add { task, depends_on } => dep::run_add(dep::EdgeOptions {
                    task,
                    depends_on,
                    global,
                }),
                DepCommands::Rm { task, depends_on } => dep::run_rm(dep::EdgeOptions {
                    task,
                    depends_on,
                    global,
                }),
                DepCommands::Check { task } => dep::run_check(task, global),
            },
            Commands::Recur(cmd) => match cmd {
                RecurCommands::Set {
                    id,
                    pattern,
                    interval,
                    days,
                    day_of_month,
                    month,
                    until,
                    count,
                } => recur::run_set(recur::SetOptions {
                    id,
                    pattern,
                    interval,
                    days,
                    day_of_month,
                    month,
                    until,
                    count,
                    global,
                }),
                RecurCommands::Clear {
                    id,
                    cascade,
                    keep_instances,
                } => recur::run_clear(recur::ClearOptions {
                    id,
                    cascade: if cascade {
                        Some(true)
                    } else if keep_instances {
                        Some(false)
                    } else {
                        None
                    },
                    global,
                }),
                RecurCommands::Next { id } => recur::run_next(id, global),
                RecurCommands::Link { instance, template } => recur::run_link(recur::LinkOptions {
                    instance,
                    template: Some(template),
                    global,
                }),
                RecurCommands::Unlink { instance } => recur::run_link(recur::LinkOptions {
                    instance,
                    template: None,
                    global,
                }),
            },
        }
    }
}
