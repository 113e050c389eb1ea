//! tw task command implementations.

use chrono::Utc;
use serde::Serialize;

use crate::cli::{emit_event, parse_date, GlobalOptions};
use crate::error::Result;
use crate::events::EventKind;
use crate::output::{emit_success, HumanOutput};
use crate::task::{NewTask, Priority, StatusChange, Task, TaskRelations, TaskStatus};

pub struct NewOptions {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub project: Option<String>,
    pub assignee: Option<String>,
    pub estimate: Option<f64>,
    pub position: Option<i32>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub start: Option<String>,
    pub due: Option<String>,
    pub parent: Option<String>,
    pub global: GlobalOptions,
}

pub struct ListOptions {
    pub status: Option<String>,
    pub global: GlobalOptions,
}

pub struct ShowOptions {
    pub id: String,
    pub global: GlobalOptions,
}

pub struct StatusOptions {
    pub id: String,
    pub status: String,
    pub global: GlobalOptions,
}

pub struct ParentOptions {
    pub child: String,
    pub parent: Option<String>,
    pub global: GlobalOptions,
}

#[derive(Serialize)]
struct TaskListOutput<'a> {
    total: usize,
    tasks: Vec<&'a Task>,
}

#[derive(Serialize)]
struct TaskDetailsOutput<'a> {
    task: &'a Task,
    relations: TaskRelations,
    ready: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    blocking: Vec<String>,
}

#[derive(Serialize)]
struct ParentOutput {
    task: String,
    parent: Option<String>,
}

pub fn run_new(options: NewOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;
    let priority = options
        .priority
        .as_deref()
        .map(str::parse::<Priority>)
        .transpose()?;
    let start_date = parse_date("start", options.start.as_deref())?;
    let due_date = parse_date("due", options.due.as_deref())?;

    let ids = store.id_generator();
    let config = store.config().tasks.clone();
    let task = store.update(|snapshot| {
        let parent = options
            .parent
            .as_deref()
            .map(|parent| snapshot.resolve_id(parent))
            .transpose()?;
        let new = NewTask {
            title: options.title,
            description: options.description,
            priority,
            project: options.project,
            assignee: options.assignee,
            estimated_hours: options.estimate,
            position: options.position,
            categories: options.categories,
            tags: options.tags,
            start_date,
            due_date,
            parent,
        };
        snapshot.create_task(new, &ids, &config, Utc::now())
    })?;

    let mut human = HumanOutput::new("Task created");
    if let Some(warning) = emit_event(&mut event_sink, EventKind::TaskCreated, &task) {
        human.push_warning(warning);
    }
    human.push_summary("ID", task.id.clone());
    human.push_summary("Title", task.title.clone());
    human.push_summary("Priority", task.priority.to_string());
    if let Some(parent) = task.parent_task_id.as_ref() {
        human.push_summary("Parent", parent.clone());
    }
    if let Some(due) = task.due_date {
        human.push_summary("Due", due.to_string());
    }

    emit_success(options.global.output(events_to_stdout), "task new", &task, Some(&human))
}

pub fn run_list(options: ListOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let status = options
        .status
        .as_deref()
        .map(str::parse::<TaskStatus>)
        .transpose()?;
    let snapshot = store.load()?;
    let tasks = snapshot.list(status);

    let mut human = HumanOutput::new("Tasks");
    human.push_summary("Total", tasks.len().to_string());
    if let Some(status) = status {
        human.push_summary("Status", status.to_string());
    }
    for task in &tasks {
        human.push_detail(format_task_line(task));
    }

    let output = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(options.global.output(false), "task list", &output, Some(&human))
}

pub fn run_ready(global: GlobalOptions) -> Result<()> {
    let store = global.open_store()?;
    let snapshot = store.load()?;
    let tasks = snapshot.ready_tasks();

    let mut human = HumanOutput::new("Ready tasks");
    human.push_summary("Total", tasks.len().to_string());
    for task in &tasks {
        human.push_detail(format_task_line(task));
    }

    let output = TaskListOutput {
        total: tasks.len(),
        tasks,
    };
    emit_success(global.output(false), "task ready", &output, Some(&human))
}

pub fn run_show(options: ShowOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let snapshot = store.load()?;
    let id = snapshot.resolve_id(&options.id)?;
    let task = snapshot.get(&id)?;
    let relations = snapshot.relations(&id)?;
    let readiness = snapshot.can_complete(&id)?;

    let mut human = HumanOutput::new(format!("{} {}", task.id, task.title));
    human.push_summary("Status", task.status.to_string());
    human.push_summary("Priority", task.priority.to_string());
    if let Some(project) = task.project.as_ref() {
        human.push_summary("Project", project.clone());
    }
    if let Some(assignee) = task.assignee.as_ref() {
        human.push_summary("Assignee", assignee.clone());
    }
    if let Some(start) = task.start_date {
        human.push_summary("Start", start.to_string());
    }
    if let Some(due) = task.due_date {
        human.push_summary("Due", due.to_string());
    }
    if let Some(completed) = task.completed_at {
        human.push_summary("Completed", completed.to_rfc3339());
    }
    if let Some(rule) = task.recurrence.as_ref() {
        human.push_summary("Repeats", rule.describe());
    }
    push_relations(&mut human, &relations);
    if !task.tags.is_empty() {
        human.push_summary("Tags", task.tags.join(", "));
    }
    if let Some(description) = task.description.as_ref() {
        human.push_detail(description.clone());
    }
    if !readiness.ready {
        human.push_warning(format!("blocked by {}", readiness.blocking.join(", ")));
    }

    let output = TaskDetailsOutput {
        task,
        relations,
        ready: readiness.ready,
        blocking: readiness.blocking,
    };
    emit_success(options.global.output(false), "task show", &output, Some(&human))
}

pub fn run_status(options: StatusOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;
    let status: TaskStatus = options.status.parse()?;
    let ids = store.id_generator();
    let settings = store.config().recurrence.clone();

    let change: StatusChange = store.update(|snapshot| {
        let id = snapshot.resolve_id(&options.id)?;
        snapshot.set_status(&id, status, &settings, &ids, Utc::now())
    })?;

    let mut human = HumanOutput::new(if change.changed {
        "Task status updated"
    } else {
        "Task status unchanged"
    });
    let mut warnings = Vec::new();
    if change.changed {
        warnings.extend(emit_event(
            &mut event_sink,
            EventKind::TaskStatusChanged,
            serde_json::json!({
                "id": change.task.id,
                "status": change.task.status,
                "propagated": change.propagated,
            }),
        ));
    }
    for instance in change.next_instance.iter().chain(&change.propagated_instances) {
        warnings.extend(emit_event(&mut event_sink, EventKind::InstanceCreated, instance));
    }
    for warning in warnings {
        human.push_warning(warning);
    }

    human.push_summary("ID", change.task.id.clone());
    human.push_summary("Status", change.task.status.to_string());
    if !change.propagated.is_empty() {
        human.push_summary("Also completed", change.propagated.join(", "));
    }
    for instance in change.next_instance.iter().chain(&change.propagated_instances) {
        let due = instance
            .due_date
            .or(instance.start_date)
            .map(|date| format!(" ({date})"))
            .unwrap_or_default();
        human.push_summary("Next instance", format!("{}{due}", instance.id));
    }
    if !change.blocking.is_empty() {
        human.push_warning(format!(
            "dependencies still open: {}",
            change.blocking.join(", ")
        ));
    }

    emit_success(
        options.global.output(events_to_stdout),
        "task status",
        &change,
        Some(&human),
    )
}

pub fn run_parent(options: ParentOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;

    let output = store.update(|snapshot| {
        let child = snapshot.resolve_id(&options.child)?;
        let parent = options
            .parent
            .as_deref()
            .map(|parent| snapshot.resolve_id(parent))
            .transpose()?;
        snapshot.set_parent(&child, parent.as_deref(), Utc::now())?;
        Ok(ParentOutput {
            task: child,
            parent,
        })
    })?;

    let (header, kind) = match output.parent {
        Some(_) => ("Parent set", EventKind::TaskParentSet),
        None => ("Parent cleared", EventKind::TaskParentCleared),
    };
    let mut human = HumanOutput::new(header);
    if let Some(warning) = emit_event(&mut event_sink, kind, &output) {
        human.push_warning(warning);
    }
    human.push_summary("Task", output.task.clone());
    if let Some(parent) = output.parent.as_ref() {
        human.push_summary("Parent", parent.clone());
    }

    let command = if output.parent.is_some() {
        "task parent set"
    } else {
        "task parent clear"
    };
    emit_success(options.global.output(events_to_stdout), command, &output, Some(&human))
}

pub fn run_rm(options: ShowOptions) -> Result<()> {
    let store = options.global.open_store()?;
    let (mut event_sink, events_to_stdout) = options.global.open_event_sink()?;

    let removed = store.update(|snapshot| {
        let id = snapshot.resolve_id(&options.id)?;
        snapshot.delete_task(&id, Utc::now())
    })?;

    let mut human = HumanOutput::new("Task deleted");
    if let Some(warning) = emit_event(&mut event_sink, EventKind::TaskDeleted, &removed) {
        human.push_warning(warning);
    }
    human.push_summary("ID", removed.id.clone());
    human.push_summary("Title", removed.title.clone());

    emit_success(options.global.output(events_to_stdout), "task rm", &removed, Some(&human))
}

fn format_task_line(task: &Task) -> String {
    let mut line = format!("{} [{}] {} ({})", task.id, task.status, task.title, task.priority);
    if let Some(due) = task.due_date {
        line.push_str(&format!(" due {due}"));
    }
    if task.is_recurring() {
        line.push_str(" (recurring)");
    }
    line
}

fn push_relations(human: &mut HumanOutput, relations: &TaskRelations) {
    if let Some(parent) = relations.parent.as_ref() {
        human.push_summary("Parent", parent.clone());
    }
    if !relations.children.is_empty() {
        human.push_summary("Children", relations.children.join(", "));
    }
    if !relations.depends_on.is_empty() {
        human.push_summary("Depends on", relations.depends_on.join(", "));
    }
    if !relations.dependents.is_empty() {
        human.push_summary("Needed by", relations.dependents.join(", "));
    }
    if let Some(template) = relations.recurrence_parent.as_ref() {
        human.push_summary("Instance of", template.clone());
    }
    if !relations.instances.is_empty() {
        human.push_summary("Instances", relations.instances.join(", "));
    }
}
