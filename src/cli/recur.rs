//! tw recur and tw tick command implementations.

use chrono::{NaiveDate, Utc};
use serde::Serialize;

use crate::cli::{emit_event, parse_date, GlobalOptions};
use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::recurrence::{self, RecurrenceConfig, RecurrencePattern, RecurrenceSpec};
use crate::task::Task;

pub struct SetOptions {
    pub id: String,
    pub pattern: String,
    pub interval: u32,
    pub days: Option<String>,
    pub day_of_month: Option<u32>,
    pub month: Option<u32>,
    pub until: Option<String>,
    pub count: Option<u32>,
    pub global: GlobalOptions,
}

pub struct ClearOptions {
    pub id: String,
    /// `None` falls back to `recurrence.cascade_on_clear`.
    pub cascade: Option<bool>,
    pub global: GlobalOptions,
}

pub struct LinkOptions {
    pub instance: String,
    pub template: Option<String>,
    pub global: GlobalOptions,
}

#[derive(Serialize)]
struct NextOutput {
    id: String,
    rule: String,
    next: Option<NaiveDate>,
}

#[derive(Serialize)]
struct TickOutput {
    created: Vec<Task>,
}

#[derive(Serialize)]
struct LinkOutput {
    instance: String,
    template: Option<String>,
}

pub fn run_set(options: SetOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;

    let pattern: RecurrencePattern = options.pattern.parse()?;
    let spec = RecurrenceSpec {
        pattern,
        interval: options.interval,
        days_of_week: options
            .days
            .as_deref()
            .map(recurrence::parse_days_of_week)
            .transpose()?
            .unwrap_or_default(),
        day_of_month: options.day_of_month,
        month_of_year: options.month,
        end_date: parse_date("until", options.until.as_deref())?,
        count: options.count,
    };
    let rule = RecurrenceConfig::new(spec)?;
    let settings = store.config().recurrence.clone();

    let task = store.update(|snapshot| {
        let id = snapshot.resolve_id(&options.id)?;
        snapshot
            .set_recurrence(&id, rule, &settings, Utc::now())
            .cloned()
    })?;

    let description = task
        .recurrence
        .as_ref()
        .map(RecurrenceConfig::describe)
        .unwrap_or_default();
    let mut human = HumanOutput::new("Recurrence set");
    if let Some(warning) = emit_event(&mut event_sink, EventKind::RecurrenceSet, &task) {
        human.push_warning(warning);
    }
    human.push_summary("ID", task.id.clone());
    human.push_summary("Repeats", description);
    human.push_next_step("tw tick");

    emit_success(options.global.output(events_to_stdout), "recur set", &task, Some(&human))
}

pub fn run_clear(options: ClearOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;
    let cascade = options
        .cascade
        .unwrap_or(store.config().recurrence.cascade_on_clear);

    let cleared = store.update(|snapshot| {
        let id = snapshot.resolve_id(&options.id)?;
        snapshot.clear_recurrence(&id, cascade, Utc::now())
    })?;

    let mut human = HumanOutput::new("Recurrence cleared");
    if let Some(warning) = emit_event(&mut event_sink, EventKind::RecurrenceCleared, &cleared) {
        human.push_warning(warning);
    }
    human.push_summary("ID", cleared.task.id.clone());
    if !cleared.removed_instances.is_empty() {
        human.push_summary("Removed instances", cleared.removed_instances.join(", "));
    }

    emit_success(
        options.global.output(events_to_stdout),
        "recur clear",
        &cleared,
        Some(&human),
    )
}

pub fn run_next(id: String, global: GlobalOptions) -> Result<()> {
    let store = global.open_store()?;
    let snapshot = store.load()?;
    let id = snapshot.resolve_id(&id)?;
    let next = snapshot.next_occurrence(&id, Utc::now().date_naive())?;
    let rule = snapshot
        .get(&id)?
        .recurrence
        .as_ref()
        .map(RecurrenceConfig::describe)
        .unwrap_or_default();

    let mut human = HumanOutput::new("Next occurrence");
    human.push_summary("ID", id.clone());
    human.push_summary("Repeats", rule.clone());
    match next {
        Some(date) => human.push_summary("Next", date.to_string()),
        None => human.push_summary("Next", "none (schedule ended)"),
    }

    let output = NextOutput { id, rule, next };
    emit_success(global.output(false), "recur next", &output, Some(&human))
}

pub fn run_link(options: LinkOptions) -> Result<()> {
    let store = options.global.open_store()?;

    let output = store.update(|snapshot| {
        let instance = snapshot.resolve_id(&options.instance)?;
        let template = options
            .template
            .as_deref()
            .map(|template| snapshot.resolve_id(template))
            .transpose()?;
        snapshot.set_recurrence_parent(&instance, template.as_deref(), Utc::now())?;
        Ok(LinkOutput { instance, template })
    })?;

    let mut human = HumanOutput::new(match output.template {
        Some(_) => "Instance linked",
        None => "Instance unlinked",
    });
    human.push_summary("Instance", output.instance.clone());
    if let Some(template) = output.template.as_ref() {
        human.push_summary("Template", template.clone());
    }

    let command = if output.template.is_some() {
        "recur link"
    } else {
        "recur unlink"
    };
    emit_success(options.global.output(false), command, &output, Some(&human))
}

pub fn run_tick(global: GlobalOptions) -> Result<()> {
    let store = global.open_store()?;
    let (mut event_sink, events_to_stdout) = global.open_event_sink()?;
    let ids = store.id_generator();

    let created = store.update(|snapshot| snapshot.advance_all_due(&ids, Utc::now()))?;

    let mut human = HumanOutput::new(if created.is_empty() {
        "tw tick: nothing due"
    } else {
        "tw tick: instances created"
    });
    for instance in &created {
        if let Some(warning) = emit_event(&mut event_sink, EventKind::InstanceCreated, instance) {
            human.push_warning(warning);
        }
        let when = instance
            .due_date
            .or(instance.start_date)
            .map(|date| format!(" ({date})"))
            .unwrap_or_default();
        human.push_detail(format!("{} {}{when}", instance.id, instance.title));
    }
    human.push_summary("Created", created.len().to_string());

    let output = TickOutput { created };
    emit_success(global.output(events_to_stdout), "tick", &output, Some(&human))
}
