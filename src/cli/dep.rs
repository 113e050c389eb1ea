//! tw dep command implementations.

use chrono::Utc;

use crate::cli::{emit_event, GlobalOptions};
use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};

pub struct EdgeOptions {
    pub task: String,
    pub depends_on: String,
    pub global: GlobalOptions,
}

pub fn run_add(options: EdgeOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;

    let edge = store.update(|snapshot| {
        let task = snapshot.resolve_id(&options.task)?;
        let depends_on = snapshot.resolve_id(&options.depends_on)?;
        snapshot.add_dependency(&task, &depends_on, Utc::now())
    })?;

    let mut human = HumanOutput::new("Dependency added");
    if let Some(warning) = emit_event(&mut event_sink, EventKind::DependencyAdded, &edge) {
        human.push_warning(warning);
    }
    human.push_summary("Task", edge.task_id.clone());
    human.push_summary("Depends on", edge.depends_on_id.clone());

    emit_success(options.global.output(events_to_stdout), "dep add", &edge, Some(&human))
}

pub fn run_rm(options: EdgeOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;

    let edge = store.update(|snapshot| {
        let task = snapshot.resolve_id(&options.task)?;
        let depends_on = snapshot.resolve_id(&options.depends_on)?;
        snapshot.remove_dependency(&task, &depends_on)
    })?;

    let mut human = HumanOutput::new("Dependency removed");
    if let Some(warning) = emit_event(&mut event_sink, EventKind::DependencyRemoved, &edge) {
        human.push_warning(warning);
    }
    human.push_summary("Task", edge.task_id.clone());
    human.push_summary("Depends on", edge.depends_on_id.clone());

    emit_success(options.global.output(events_to_stdout), "dep rm", &edge, Some(&human))
}

pub fn run_check(task: String, global: GlobalOptions) -> Result<()> {
    let store = global.open_store()?;
    let snapshot = store.load()?;
    let id = snapshot.resolve_id(&task)?;
    let readiness = snapshot.can_complete(&id)?;

    let mut human = HumanOutput::new(if readiness.ready {
        "Ready to complete"
    } else {
        "Blocked"
    });
    human.push_summary("Task", readiness.task_id.clone());
    for blocker in &readiness.blocking {
        human.push_detail(format!("waiting on {blocker}"));
    }
    if let Some(first) = readiness.blocking.first() {
        human.push_next_step(format!("tw task show {first}"));
    }

    emit_success(global.output(false), "dep check", &readiness, Some(&human))
}
