//! Task records and the in-memory unit of work they are mutated through.
//!
//! A [`TaskSnapshot`] holds every task and dependency edge of a store. The
//! store loads it under lock, applies one operation and writes it back, so
//! each check below runs against the same state the mutation lands in.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use ulid::Ulid;

use crate::config::{RecurrenceSettings, TasksConfig};
use crate::error::{Error, Result};
use crate::graph::TaskGraph;
use crate::recurrence::{self, RecurrenceConfig};

pub const TASKS_SCHEMA_VERSION: &str = "tw.tasks.v1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProgress,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            other => Err(Error::InvalidArgument(format!(
                "unknown task status '{other}' (expected todo|in_progress|done)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "medium" => Ok(Priority::Medium),
            "high" => Ok(Priority::High),
            "urgent" => Ok(Priority::Urgent),
            other => Err(Error::InvalidArgument(format!(
                "unknown task priority '{other}' (expected low|medium|high|urgent)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub position: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub categories: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence_parent_id: Option<String>,
    /// Present only on recurring templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurrence: Option<RecurrenceConfig>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: None,
            status: TaskStatus::Todo,
            priority: Priority::default(),
            project: None,
            assignee: None,
            estimated_hours: None,
            position: 0,
            categories: Vec::new(),
            tags: Vec::new(),
            start_date: None,
            due_date: None,
            completed_at: None,
            parent_task_id: None,
            recurrence_parent_id: None,
            recurrence: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Apply a status change. Entering `done` stamps `completed_at`,
    /// leaving it clears the stamp. Returns whether anything changed.
    pub fn transition(&mut self, status: TaskStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.completed_at = match status {
            TaskStatus::Done => Some(now),
            TaskStatus::Todo | TaskStatus::InProgress => None,
        };
        self.updated_at = now;
        true
    }
}

/// Directed edge: `task_id` is not ready until `depends_on_id` is done.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDependency {
    pub task_id: String,
    pub depends_on_id: String,
    pub created_at: DateTime<Utc>,
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub project: Option<String>,
    pub assignee: Option<String>,
    pub estimated_hours: Option<f64>,
    pub position: Option<i32>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub parent: Option<String>,
}

/// Generates `<prefix>-<ulid>` task identifiers.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn from_config(config: &TasksConfig) -> Self {
        Self::new(config.id_prefix.trim())
    }

    pub fn next_id(&self) -> String {
        format!("{}-{}", self.prefix, Ulid::new().to_string().to_ascii_lowercase())
    }
}

/// Whether a task's direct dependencies are all done.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Readiness {
    pub task_id: String,
    pub ready: bool,
    /// Dependencies that are not done yet.
    pub blocking: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct TaskRelations {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recurrence_parent: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub instances: Vec<String>,
}

/// Outcome of a status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub task: Task,
    pub changed: bool,
    /// Ancestors automatically moved to `done`, nearest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub propagated: Vec<String>,
    /// Next recurring instance created because this one was completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_instance: Option<Task>,
    /// Instances scheduled for propagated ancestors that were themselves
    /// recurring instances.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub propagated_instances: Vec<Task>,
    /// Dependencies still open when the task was marked done.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocking: Vec<String>,
}

/// Outcome of clearing a task's recurrence.
#[derive(Debug, Clone, Serialize)]
pub struct RecurrenceCleared {
    pub task: Task,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub removed_instances: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub schema_version: String,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub dependencies: Vec<TaskDependency>,
}

impl TaskSnapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: TASKS_SCHEMA_VERSION.to_string(),
            generated_at: Utc::now(),
            tasks: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn graph(&self) -> TaskGraph {
        TaskGraph::from_tasks(&self.tasks, &self.dependencies)
    }

    pub fn get(&self, task_id: &str) -> Result<&Task> {
        self.tasks
            .iter()
            .find(|task| task.id == task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    pub fn get_mut(&mut self, task_id: &str) -> Result<&mut Task> {
        self.tasks
            .iter_mut()
            .find(|task| task.id == task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.tasks.iter().any(|task| task.id == task_id)
    }

    /// Resolve a full id, or a unique case-insensitive prefix or suffix of one.
    pub fn resolve_id(&self, input: &str) -> Result<String> {
        let needle = input.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return Err(Error::InvalidArgument("task id cannot be empty".to_string()));
        }
        if let Some(task) = self.tasks.iter().find(|task| task.id.eq_ignore_ascii_case(&needle)) {
            return Ok(task.id.clone());
        }
        let matches: Vec<&str> = self
            .tasks
            .iter()
            .map(|task| task.id.as_str())
            .filter(|id| {
                let id = id.to_ascii_lowercase();
                id.starts_with(&needle) || id.ends_with(&needle)
            })
            .collect();
        match matches.as_slice() {
            [] => Err(Error::TaskNotFound(input.trim().to_string())),
            [only] => Ok(only.to_string()),
            _ => Err(Error::InvalidArgument(format!(
                "task id '{}' is ambiguous ({} matches)",
                input.trim(),
                matches.len()
            ))),
        }
    }

    pub fn children(&self, task_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.parent_task_id.as_deref() == Some(task_id))
            .collect()
    }

    pub fn instances_of(&self, template_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.recurrence_parent_id.as_deref() == Some(template_id))
            .collect()
    }

    pub fn create_task(
        &mut self,
        new: NewTask,
        ids: &IdGenerator,
        config: &TasksConfig,
        now: DateTime<Utc>,
    ) -> Result<Task> {
        let title = new.title.trim();
        if title.is_empty() {
            return Err(Error::InvalidArgument("title cannot be empty".to_string()));
        }
        if let (Some(start), Some(due)) = (new.start_date, new.due_date) {
            if due < start {
                return Err(Error::InvalidArgument(format!(
                    "due date {due} is before start date {start}"
                )));
            }
        }
        if let Some(parent) = new.parent.as_deref() {
            self.get(parent)?;
        }

        let mut task = Task::new(ids.next_id(), title, now);
        task.description = new.description;
        task.priority = new.priority.unwrap_or(config.default_priority);
        task.project = new.project;
        task.assignee = new.assignee;
        task.estimated_hours = new.estimated_hours;
        task.position = new.position.unwrap_or_else(|| self.next_position(new.parent.as_deref()));
        task.categories = normalize_labels(&new.categories);
        task.tags = normalize_labels(&new.tags);
        task.start_date = new.start_date;
        task.due_date = new.due_date;
        task.parent_task_id = new.parent;

        debug!(task = %task.id, parent = ?task.parent_task_id, "created task");
        self.tasks.push(task.clone());
        Ok(task)
    }

    /// Move a task under `new_parent`, or to the root with `None`.
    pub fn set_parent(
        &mut self,
        task_id: &str,
        new_parent: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<&Task> {
        self.get(task_id)?;
        if let Some(parent) = new_parent {
            if parent != task_id {
                self.get(parent)?;
            }
        }
        self.graph().check_parent(task_id, new_parent)?;

        let task = self.get_mut(task_id)?;
        task.parent_task_id = new_parent.map(str::to_string);
        task.updated_at = now;
        info!(task = task_id, parent = ?new_parent, "parent updated");
        Ok(task)
    }

    /// Link `instance_id` to the recurring template `template_id`.
    pub fn set_recurrence_parent(
        &mut self,
        instance_id: &str,
        template_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<&Task> {
        self.get(instance_id)?;
        if let Some(template) = template_id {
            if template != instance_id && !self.get(template)?.is_recurring() {
                return Err(Error::InvalidArgument(format!(
                    "task {template} is not a recurring template"
                )));
            }
        }
        self.graph().check_recurrence_parent(instance_id, template_id)?;
        // A template has at most one open instance.
        let linking_open = !self.get(instance_id)?.is_done();
        if let Some(template) = template_id.filter(|_| linking_open) {
            let existing = self
                .instances_of(template)
                .into_iter()
                .find(|instance| instance.id != instance_id && !instance.is_done());
            if let Some(existing) = existing {
                return Err(Error::OpenInstanceExists {
                    template: template.to_string(),
                    instance: existing.id.clone(),
                });
            }
        }

        let task = self.get_mut(instance_id)?;
        task.recurrence_parent_id = template_id.map(str::to_string);
        task.updated_at = now;
        Ok(task)
    }

    pub fn add_dependency(
        &mut self,
        task_id: &str,
        depends_on_id: &str,
        now: DateTime<Utc>,
    ) -> Result<TaskDependency> {
        self.get(task_id)?;
        self.get(depends_on_id)?;
        self.graph().check_dependency(task_id, depends_on_id)?;

        let edge = TaskDependency {
            task_id: task_id.to_string(),
            depends_on_id: depends_on_id.to_string(),
            created_at: now,
        };
        self.dependencies.push(edge.clone());
        info!(task = task_id, depends_on = depends_on_id, "dependency added");
        Ok(edge)
    }

    pub fn remove_dependency(&mut self, task_id: &str, depends_on_id: &str) -> Result<TaskDependency> {
        let position = self
            .dependencies
            .iter()
            .position(|dep| dep.task_id == task_id && dep.depends_on_id == depends_on_id)
            .ok_or_else(|| Error::DependencyNotFound {
                task: task_id.to_string(),
                depends_on: depends_on_id.to_string(),
            })?;
        info!(task = task_id, depends_on = depends_on_id, "dependency removed");
        Ok(self.dependencies.remove(position))
    }

    /// Advisory readiness check; marking a blocked task done is not refused.
    pub fn can_complete(&self, task_id: &str) -> Result<Readiness> {
        self.get(task_id)?;
        let mut blocking: Vec<String> = self
            .dependencies
            .iter()
            .filter(|dep| dep.task_id == task_id)
            .filter(|dep| {
                self.get(&dep.depends_on_id)
                    .map(|task| !task.is_done())
                    .unwrap_or(false)
            })
            .map(|dep| dep.depends_on_id.clone())
            .collect();
        blocking.sort();
        blocking.dedup();
        Ok(Readiness {
            task_id: task_id.to_string(),
            ready: blocking.is_empty(),
            blocking,
        })
    }

    /// Open tasks whose dependencies are all done.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        let mut ready: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| !task.is_done())
            .filter(|task| {
                self.can_complete(&task.id)
                    .map(|readiness| readiness.ready)
                    .unwrap_or(false)
            })
            .collect();
        sort_tasks(&mut ready);
        ready
    }

    pub fn relations(&self, task_id: &str) -> Result<TaskRelations> {
        let task = self.get(task_id)?;
        let mut children: Vec<String> = self.children(task_id).iter().map(|t| t.id.clone()).collect();
        let mut instances: Vec<String> = self
            .instances_of(task_id)
            .iter()
            .map(|t| t.id.clone())
            .collect();
        let mut depends_on: Vec<String> = self
            .dependencies
            .iter()
            .filter(|dep| dep.task_id == task_id)
            .map(|dep| dep.depends_on_id.clone())
            .collect();
        let mut dependents: Vec<String> = self
            .dependencies
            .iter()
            .filter(|dep| dep.depends_on_id == task_id)
            .map(|dep| dep.task_id.clone())
            .collect();

        children.sort();
        instances.sort();
        depends_on.sort();
        dependents.sort();

        Ok(TaskRelations {
            parent: task.parent_task_id.clone(),
            children,
            depends_on,
            dependents,
            recurrence_parent: task.recurrence_parent_id.clone(),
            instances,
        })
    }

    /// Change a task's status, then propagate completion up the hierarchy
    /// and, for a completed recurring instance, optionally schedule the next
    /// one.
    pub fn set_status(
        &mut self,
        task_id: &str,
        status: TaskStatus,
        settings: &RecurrenceSettings,
        ids: &IdGenerator,
        now: DateTime<Utc>,
    ) -> Result<StatusChange> {
        let blocking = if status == TaskStatus::Done {
            self.can_complete(task_id)?.blocking
        } else {
            Vec::new()
        };

        let task = self.get_mut(task_id)?;
        let changed = task.transition(status, now);
        let parent = task.parent_task_id.clone();
        let template = task.recurrence_parent_id.clone();
        if changed {
            info!(task = task_id, %status, "status changed");
        }

        let propagated = match (changed, parent) {
            (true, Some(parent)) => self.propagate_parent_status(&parent, now)?,
            _ => Vec::new(),
        };

        let completed = changed && status == TaskStatus::Done && settings.advance_on_complete;
        let next_instance = match template.as_deref() {
            Some(template) if completed => self.advance_if_due(template, ids, now)?,
            _ => None,
        };

        let mut propagated_instances = Vec::new();
        if settings.advance_on_complete {
            let mut advanced: HashSet<String> = HashSet::new();
            if completed {
                advanced.extend(template);
            }
            for id in &propagated {
                let Some(template) = self.get(id)?.recurrence_parent_id.clone() else {
                    continue;
                };
                if !advanced.insert(template.clone()) {
                    continue;
                }
                if let Some(instance) = self.advance_if_due(&template, ids, now)? {
                    propagated_instances.push(instance);
                }
            }
        }

        Ok(StatusChange {
            task: self.get(task_id)?.clone(),
            changed,
            propagated,
            next_instance,
            propagated_instances,
            blocking,
        })
    }

    /// Mark `parent_id` done once all of its direct subtasks are done, then
    /// repeat for its own parent. Returns the ids moved to `done`.
    pub fn propagate_parent_status(&mut self, parent_id: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        self.get(parent_id)?;
        let mut completed = Vec::new();
        let mut visited: HashSet<String> = HashSet::new();
        let mut current = Some(parent_id.to_string());

        while let Some(id) = current.take() {
            if !visited.insert(id.clone()) {
                break;
            }
            let children = self.children(&id);
            if children.is_empty() || children.iter().any(|child| !child.is_done()) {
                break;
            }
            let Ok(task) = self.get_mut(&id) else {
                break;
            };
            if !task.transition(TaskStatus::Done, now) {
                break;
            }
            debug!(task = %id, "all subtasks done, parent completed");
            current = task.parent_task_id.clone();
            completed.push(id);
        }

        Ok(completed)
    }

    /// Replace the recurrence rule of a task (fields are never merged).
    pub fn set_recurrence(
        &mut self,
        task_id: &str,
        config: RecurrenceConfig,
        settings: &RecurrenceSettings,
        now: DateTime<Utc>,
    ) -> Result<&Task> {
        config.check_policy(settings)?;
        let task = self.get_mut(task_id)?;
        info!(task = task_id, rule = %config.describe(), "recurrence set");
        task.recurrence = Some(config);
        task.updated_at = now;
        Ok(task)
    }

    /// Remove the recurrence rule. With `cascade`, generated instances that
    /// are not done are deleted as well.
    pub fn clear_recurrence(
        &mut self,
        task_id: &str,
        cascade: bool,
        now: DateTime<Utc>,
    ) -> Result<RecurrenceCleared> {
        let task = self.get_mut(task_id)?;
        if task.recurrence.take().is_none() {
            return Err(Error::InvalidArgument(format!(
                "task {task_id} is not recurring"
            )));
        }
        task.updated_at = now;

        let mut removed_instances = Vec::new();
        if cascade {
            let open: Vec<String> = self
                .instances_of(task_id)
                .iter()
                .filter(|instance| !instance.is_done())
                .map(|instance| instance.id.clone())
                .collect();
            for id in open {
                self.delete_task(&id, now)?;
                removed_instances.push(id);
            }
        }

        info!(task = task_id, removed = removed_instances.len(), "recurrence cleared");
        Ok(RecurrenceCleared {
            task: self.get(task_id)?.clone(),
            removed_instances,
        })
    }

    /// Preview the next occurrence of a template without creating anything.
    pub fn next_occurrence(&self, template_id: &str, today: NaiveDate) -> Result<Option<NaiveDate>> {
        let template = self.get(template_id)?;
        if !template.is_recurring() {
            return Err(Error::InvalidArgument(format!(
                "task {template_id} is not recurring"
            )));
        }
        let instances = self.instances_of(template_id);
        Ok(recurrence::next_occurrence(template, &instances, today))
    }

    /// Create the next instance of a template if it is due.
    pub fn advance_if_due(
        &mut self,
        template_id: &str,
        ids: &IdGenerator,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>> {
        let template = self.get(template_id)?;
        let instances = self.instances_of(template_id);
        let Some(instance) = recurrence::advance_if_due(template, &instances, now, || ids.next_id())
        else {
            return Ok(None);
        };
        info!(template = template_id, instance = %instance.id, "recurring instance created");
        self.tasks.push(instance.clone());
        Ok(Some(instance))
    }

    /// Run [`TaskSnapshot::advance_if_due`] for every recurring template.
    pub fn advance_all_due(&mut self, ids: &IdGenerator, now: DateTime<Utc>) -> Result<Vec<Task>> {
        let templates: Vec<String> = self
            .tasks
            .iter()
            .filter(|task| task.is_recurring())
            .map(|task| task.id.clone())
            .collect();
        let mut created = Vec::new();
        for template in templates {
            if let Some(instance) = self.advance_if_due(&template, ids, now)? {
                created.push(instance);
            }
        }
        Ok(created)
    }

    /// Delete a task. Subtasks and generated instances are detached, and
    /// every dependency edge touching the task is dropped.
    pub fn delete_task(&mut self, task_id: &str, now: DateTime<Utc>) -> Result<Task> {
        let position = self
            .tasks
            .iter()
            .position(|task| task.id == task_id)
            .ok_or_else(|| Error::TaskNotFound(task_id.to_string()))?;
        let removed = self.tasks.remove(position);

        for task in self.tasks.iter_mut() {
            if task.parent_task_id.as_deref() == Some(task_id) {
                task.parent_task_id = None;
                task.updated_at = now;
            }
            if task.recurrence_parent_id.as_deref() == Some(task_id) {
                task.recurrence_parent_id = None;
                task.updated_at = now;
            }
        }
        self.dependencies
            .retain(|dep| dep.task_id != task_id && dep.depends_on_id != task_id);

        info!(task = task_id, "task deleted");
        Ok(removed)
    }

    /// Tasks filtered by status, in display order.
    pub fn list(&self, status: Option<TaskStatus>) -> Vec<&Task> {
        let mut tasks: Vec<&Task> = self
            .tasks
            .iter()
            .filter(|task| status.map_or(true, |status| task.status == status))
            .collect();
        sort_tasks(&mut tasks);
        tasks
    }

    pub fn status_counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for task in &self.tasks {
            *counts.entry(task.status.as_str()).or_insert(0) += 1;
        }
        counts
    }

    fn next_position(&self, parent: Option<&str>) -> i32 {
        self.tasks
            .iter()
            .filter(|task| task.parent_task_id.as_deref() == parent)
            .map(|task| task.position)
            .max()
            .map_or(0, |max| max.saturating_add(1))
    }
}

/// Open tasks first, then by priority (highest first), due date, position, id.
pub fn sort_tasks(tasks: &mut [&Task]) {
    tasks.sort_by(|left, right| {
        left.is_done()
            .cmp(&right.is_done())
            .then_with(|| right.priority.cmp(&left.priority))
            .then_with(|| match (left.due_date, right.due_date) {
                (Some(l), Some(r)) => l.cmp(&r),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| left.position.cmp(&right.position))
            .then_with(|| left.id.cmp(&right.id))
    });
}

fn normalize_labels(raw: &[String]) -> Vec<String> {
    let mut labels: Vec<String> = raw
        .iter()
        .flat_map(|value| value.split(','))
        .map(|value| value.trim().to_lowercase().replace(' ', "-"))
        .filter(|value| !value.is_empty())
        .collect();
    labels.sort();
    labels.dedup();
    labels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recurrence::{RecurrencePattern, RecurrenceSpec};
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).single().expect("valid timestamp")
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    struct Fixture {
        snapshot: TaskSnapshot,
        ids: IdGenerator,
        config: TasksConfig,
        settings: RecurrenceSettings,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                snapshot: TaskSnapshot::empty(),
                ids: IdGenerator::new("tw"),
                config: TasksConfig::default(),
                settings: RecurrenceSettings::default(),
            }
        }

        fn add(&mut self, title: &str) -> String {
            self.add_under(title, None)
        }

        fn add_under(&mut self, title: &str, parent: Option<&str>) -> String {
            let new = NewTask {
                title: title.to_string(),
                parent: parent.map(str::to_string),
                ..NewTask::default()
            };
            self.snapshot
                .create_task(new, &self.ids, &self.config, at(2025, 1, 1))
                .expect("create task")
                .id
        }

        fn set_status(&mut self, id: &str, status: TaskStatus) -> StatusChange {
            self.snapshot
                .set_status(id, status, &self.settings, &self.ids, at(2025, 1, 2))
                .expect("status change")
        }

        fn status(&self, id: &str) -> TaskStatus {
            self.snapshot.get(id).expect("task").status
        }
    }

    #[test]
    fn create_task_normalizes_and_positions() {
        let mut fx = Fixture::new();
        let new = NewTask {
            title: "  Write report ".to_string(),
            tags: vec!["Work, Q1".to_string(), "work".to_string()],
            ..NewTask::default()
        };
        let task = fx
            .snapshot
            .create_task(new, &fx.ids, &fx.config, at(2025, 1, 1))
            .expect("create");
        assert_eq!(task.title, "Write report");
        assert_eq!(task.tags, vec!["q1".to_string(), "work".to_string()]);
        assert_eq!(task.priority, Priority::Medium);
        assert!(task.id.starts_with("tw-"));

        let second = fx.add("Second");
        assert_eq!(fx.snapshot.get(&second).expect("task").position, 1);
    }

    #[test]
    fn create_task_rejects_bad_input() {
        let mut fx = Fixture::new();
        let empty = NewTask::default();
        assert!(fx.snapshot.create_task(empty, &fx.ids, &fx.config, at(2025, 1, 1)).is_err());

        let backwards = NewTask {
            title: "Backwards".to_string(),
            start_date: Some(date(2025, 1, 5)),
            due_date: Some(date(2025, 1, 1)),
            ..NewTask::default()
        };
        assert!(fx.snapshot.create_task(backwards, &fx.ids, &fx.config, at(2025, 1, 1)).is_err());

        let orphan = NewTask {
            title: "Orphan".to_string(),
            parent: Some("tw-missing".to_string()),
            ..NewTask::default()
        };
        let err = fx
            .snapshot
            .create_task(orphan, &fx.ids, &fx.config, at(2025, 1, 1))
            .unwrap_err();
        assert!(matches!(err, Error::TaskNotFound(_)));
    }

    #[test]
    fn transition_stamps_and_clears_completed_at() {
        let mut task = Task::new("tw-1", "One", at(2025, 1, 1));
        assert!(task.transition(TaskStatus::InProgress, at(2025, 1, 2)));
        assert!(task.completed_at.is_none());
        assert!(task.transition(TaskStatus::Done, at(2025, 1, 3)));
        assert_eq!(task.completed_at, Some(at(2025, 1, 3)));
        assert!(!task.transition(TaskStatus::Done, at(2025, 1, 4)));
        assert_eq!(task.completed_at, Some(at(2025, 1, 3)));
        assert!(task.transition(TaskStatus::Todo, at(2025, 1, 5)));
        assert!(task.completed_at.is_none());
    }

    #[test]
    fn set_parent_guards_hierarchy() {
        let mut fx = Fixture::new();
        let a = fx.add("A");
        let b = fx.add("B");

        let err = fx.snapshot.set_parent(&a, Some(&a), at(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, Error::SelfReference(_)));

        fx.snapshot.set_parent(&a, Some(&b), at(2025, 1, 2)).expect("a under b");
        let err = fx.snapshot.set_parent(&b, Some(&a), at(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, Error::CircularHierarchy { .. }));
        assert_eq!(fx.snapshot.get(&b).expect("b").parent_task_id, None);

        fx.snapshot.set_parent(&a, None, at(2025, 1, 2)).expect("a to root");
        assert_eq!(fx.snapshot.get(&a).expect("a").parent_task_id, None);
    }

    #[test]
    fn dependency_cycle_leaves_first_edge() {
        let mut fx = Fixture::new();
        let a = fx.add("A");
        let b = fx.add("B");
        fx.snapshot.add_dependency(&a, &b, at(2025, 1, 2)).expect("a depends on b");
        let err = fx.snapshot.add_dependency(&b, &a, at(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, Error::CircularDependency { .. }));
        assert_eq!(fx.snapshot.dependencies.len(), 1);
        assert_eq!(fx.snapshot.dependencies[0].task_id, a);

        let err = fx.snapshot.add_dependency(&a, &b, at(2025, 1, 2)).unwrap_err();
        assert!(matches!(err, Error::DuplicateDependency { .. }));

        fx.snapshot.remove_dependency(&a, &b).expect("remove");
        assert!(fx.snapshot.dependencies.is_empty());
        assert!(matches!(
            fx.snapshot.remove_dependency(&a, &b).unwrap_err(),
            Error::DependencyNotFound { .. }
        ));
    }

    #[test]
    fn can_complete_reports_blocking_dependencies() {
        let mut fx = Fixture::new();
        let task = fx.add("Ship");
        let first = fx.add("Build");
        let second = fx.add("Test");
        fx.snapshot.add_dependency(&task, &first, at(2025, 1, 2)).expect("dep");
        fx.snapshot.add_dependency(&task, &second, at(2025, 1, 2)).expect("dep");
        fx.set_status(&first, TaskStatus::Done);

        let readiness = fx.snapshot.can_complete(&task).expect("readiness");
        assert!(!readiness.ready);
        assert_eq!(readiness.blocking, vec![second.clone()]);

        fx.set_status(&second, TaskStatus::Done);
        let readiness = fx.snapshot.can_complete(&task).expect("readiness");
        assert!(readiness.ready);
        assert!(readiness.blocking.is_empty());
    }

    #[test]
    fn completing_blocked_task_is_advisory() {
        let mut fx = Fixture::new();
        let task = fx.add("Ship");
        let dep = fx.add("Build");
        fx.snapshot.add_dependency(&task, &dep, at(2025, 1, 2)).expect("dep");
        let change = fx.set_status(&task, TaskStatus::Done);
        assert!(change.changed);
        assert_eq!(change.blocking, vec![dep]);
        assert_eq!(fx.status(&task), TaskStatus::Done);
    }

    #[test]
    fn ready_tasks_exclude_blocked_and_done() {
        let mut fx = Fixture::new();
        let blocked = fx.add("Blocked");
        let blocker = fx.add("Blocker");
        let finished = fx.add("Finished");
        fx.snapshot.add_dependency(&blocked, &blocker, at(2025, 1, 2)).expect("dep");
        fx.set_status(&finished, TaskStatus::Done);

        let ready: Vec<&str> = fx.snapshot.ready_tasks().iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ready, vec![blocker.as_str()]);
    }

    #[test]
    fn completing_last_subtask_completes_ancestors() {
        let mut fx = Fixture::new();
        let root = fx.add("Root");
        let parent = fx.add_under("Parent", Some(&root));
        let sibling = fx.add_under("Sibling", Some(&root));
        let subtasks: Vec<String> = (0..3)
            .map(|i| fx.add_under(&format!("Sub {i}"), Some(&parent)))
            .collect();
        fx.set_status(&sibling, TaskStatus::Done);

        fx.set_status(&subtasks[0], TaskStatus::Done);
        fx.set_status(&subtasks[1], TaskStatus::InProgress);
        assert_eq!(fx.status(&parent), TaskStatus::Todo);

        fx.set_status(&subtasks[1], TaskStatus::Done);
        let change = fx.set_status(&subtasks[2], TaskStatus::Done);
        assert_eq!(change.propagated, vec![parent.clone(), root.clone()]);
        assert_eq!(fx.status(&parent), TaskStatus::Done);
        assert_eq!(fx.status(&root), TaskStatus::Done);
        assert!(fx.snapshot.get(&root).expect("root").completed_at.is_some());
    }

    #[test]
    fn propagation_stops_at_open_sibling() {
        let mut fx = Fixture::new();
        let root = fx.add("Root");
        let parent = fx.add_under("Parent", Some(&root));
        fx.add_under("Open sibling", Some(&root));
        let leaf = fx.add_under("Leaf", Some(&parent));

        let change = fx.set_status(&leaf, TaskStatus::Done);
        assert_eq!(change.propagated, vec![parent.clone()]);
        assert_eq!(fx.status(&root), TaskStatus::Todo);
    }

    #[test]
    fn propagation_ignores_childless_parent() {
        let mut fx = Fixture::new();
        let lonely = fx.add("Lonely");
        let done = fx.snapshot.propagate_parent_status(&lonely, at(2025, 1, 2)).expect("propagate");
        assert!(done.is_empty());
        assert_eq!(fx.status(&lonely), TaskStatus::Todo);
    }

    fn daily_template(fx: &mut Fixture) -> String {
        let id = fx.add("Standup");
        {
            let task = fx.snapshot.get_mut(&id).expect("template");
            task.due_date = Some(date(2025, 1, 3));
            task.tags = vec!["team".to_string()];
        }
        let config = RecurrenceConfig::new(RecurrenceSpec::new(RecurrencePattern::Daily)).expect("valid");
        fx.snapshot
            .set_recurrence(&id, config, &fx.settings, at(2025, 1, 1))
            .expect("set recurrence");
        id
    }

    #[test]
    fn advance_creates_single_open_instance() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);

        let first = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 3))
            .expect("advance")
            .expect("instance");
        assert_eq!(first.recurrence_parent_id.as_deref(), Some(template.as_str()));
        assert_eq!(first.tags, vec!["team".to_string()]);

        let again = fx.snapshot.advance_if_due(&template, &fx.ids, at(2025, 1, 3)).expect("advance");
        assert!(again.is_none());
        assert_eq!(fx.snapshot.instances_of(&template).len(), 1);
    }

    #[test]
    fn completing_instance_schedules_next() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);
        let first = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 3))
            .expect("advance")
            .expect("instance");

        let change = fx.set_status(&first.id, TaskStatus::Done);
        let next = change.next_instance.expect("next instance");
        assert_eq!(next.due_date, Some(date(2025, 1, 5)));

        fx.settings.advance_on_complete = false;
        let change = fx.set_status(&next.id, TaskStatus::Done);
        assert!(change.next_instance.is_none());
    }

    #[test]
    fn advance_all_due_visits_every_template() {
        let mut fx = Fixture::new();
        let first = daily_template(&mut fx);
        let second = daily_template(&mut fx);
        fx.add("Plain");

        let created = fx.snapshot.advance_all_due(&fx.ids, at(2025, 1, 3)).expect("tick");
        assert_eq!(created.len(), 2);
        assert_eq!(fx.snapshot.instances_of(&first).len(), 1);
        assert_eq!(fx.snapshot.instances_of(&second).len(), 1);

        let created = fx.snapshot.advance_all_due(&fx.ids, at(2025, 1, 3)).expect("tick");
        assert!(created.is_empty());
    }

    #[test]
    fn clear_recurrence_cascades_to_open_instances() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);
        let first = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 3))
            .expect("advance")
            .expect("instance");
        fx.settings.advance_on_complete = false;
        fx.set_status(&first.id, TaskStatus::Done);
        let second = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 4))
            .expect("advance")
            .expect("instance");

        let cleared = fx
            .snapshot
            .clear_recurrence(&template, true, at(2025, 1, 5))
            .expect("clear");
        assert_eq!(cleared.removed_instances, vec![second.id.clone()]);
        assert!(!cleared.task.is_recurring());
        assert!(fx.snapshot.contains(&first.id));
        assert!(!fx.snapshot.contains(&second.id));

        assert!(fx.snapshot.clear_recurrence(&template, false, at(2025, 1, 5)).is_err());
    }

    #[test]
    fn recurrence_parent_link_requires_template() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);
        let plain = fx.add("Plain");
        let other = fx.add("Other");

        assert!(fx.snapshot.set_recurrence_parent(&other, Some(&plain), at(2025, 1, 2)).is_err());
        fx.snapshot
            .set_recurrence_parent(&plain, Some(&template), at(2025, 1, 2))
            .expect("link");
        assert!(matches!(
            fx.snapshot
                .set_recurrence_parent(&template, Some(&template), at(2025, 1, 2))
                .unwrap_err(),
            Error::SelfReference(_)
        ));
    }

    #[test]
    fn recurrence_link_keeps_one_open_instance() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);
        let first = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 3))
            .expect("advance")
            .expect("instance");
        let adopted = fx.add("Adopted");

        let err = fx
            .snapshot
            .set_recurrence_parent(&adopted, Some(&template), at(2025, 1, 3))
            .unwrap_err();
        assert!(matches!(err, Error::OpenInstanceExists { ref instance, .. } if *instance == first.id));
        assert!(fx.snapshot.get(&adopted).expect("task").recurrence_parent_id.is_none());

        // Finished tasks can still be attached as history.
        fx.settings.advance_on_complete = false;
        fx.set_status(&adopted, TaskStatus::Done);
        fx.snapshot
            .set_recurrence_parent(&adopted, Some(&template), at(2025, 1, 3))
            .expect("link done task");
        assert!(fx.snapshot.advance_if_due(&template, &fx.ids, at(2025, 1, 4)).expect("advance").is_none());
    }

    #[test]
    fn propagated_instance_completion_schedules_next() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);
        let first = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 3))
            .expect("advance")
            .expect("instance");
        let checklist = fx.add_under("Checklist", Some(&first.id));

        let change = fx.set_status(&checklist, TaskStatus::Done);
        assert_eq!(change.propagated, vec![first.id.clone()]);
        assert!(change.next_instance.is_none());
        assert_eq!(change.propagated_instances.len(), 1);
        let next = &change.propagated_instances[0];
        assert_eq!(next.recurrence_parent_id.as_deref(), Some(template.as_str()));
        assert_eq!(next.due_date, Some(date(2025, 1, 5)));
        assert_eq!(fx.snapshot.instances_of(&template).len(), 2);
    }

    #[test]
    fn position_after_largest_sibling_saturates() {
        let mut fx = Fixture::new();
        let first = fx.add("First");
        fx.snapshot.get_mut(&first).expect("task").position = i32::MAX;

        let second = fx.add("Second");
        assert_eq!(fx.snapshot.get(&second).expect("task").position, i32::MAX);
    }

    #[test]
    fn delete_detaches_relations() {
        let mut fx = Fixture::new();
        let parent = fx.add("Parent");
        let child = fx.add_under("Child", Some(&parent));
        let other = fx.add("Other");
        fx.snapshot.add_dependency(&other, &parent, at(2025, 1, 2)).expect("dep");

        fx.snapshot.delete_task(&parent, at(2025, 1, 3)).expect("delete");
        assert_eq!(fx.snapshot.get(&child).expect("child").parent_task_id, None);
        assert!(fx.snapshot.dependencies.is_empty());
        assert!(fx.snapshot.delete_task(&parent, at(2025, 1, 3)).is_err());
    }

    #[test]
    fn resolve_id_accepts_unique_fragments() {
        let mut snapshot = TaskSnapshot::empty();
        snapshot.tasks.push(Task::new("tw-01abc", "One", at(2025, 1, 1)));
        snapshot.tasks.push(Task::new("tw-01abd", "Two", at(2025, 1, 1)));

        assert_eq!(snapshot.resolve_id("TW-01ABC").expect("exact"), "tw-01abc");
        assert_eq!(snapshot.resolve_id("abd").expect("suffix"), "tw-01abd");
        assert!(matches!(
            snapshot.resolve_id("tw-01").unwrap_err(),
            Error::InvalidArgument(_)
        ));
        assert!(matches!(
            snapshot.resolve_id("zzz").unwrap_err(),
            Error::TaskNotFound(_)
        ));
    }

    #[test]
    fn relations_cover_all_links() {
        let mut fx = Fixture::new();
        let template = daily_template(&mut fx);
        let child = fx.add_under("Child", Some(&template));
        let dep = fx.add("Dep");
        fx.snapshot.add_dependency(&template, &dep, at(2025, 1, 2)).expect("dep");
        let instance = fx
            .snapshot
            .advance_if_due(&template, &fx.ids, at(2025, 1, 3))
            .expect("advance")
            .expect("instance");

        let relations = fx.snapshot.relations(&template).expect("relations");
        assert_eq!(relations.children, vec![child]);
        assert_eq!(relations.depends_on, vec![dep.clone()]);
        assert_eq!(relations.instances, vec![instance.id.clone()]);

        let relations = fx.snapshot.relations(&dep).expect("relations");
        assert_eq!(relations.dependents, vec![template.clone()]);
        let relations = fx.snapshot.relations(&instance.id).expect("relations");
        assert_eq!(relations.recurrence_parent, Some(template));
    }

    #[test]
    fn status_parses_loosely() {
        assert_eq!("in-progress".parse::<TaskStatus>().expect("status"), TaskStatus::InProgress);
        assert_eq!("DONE".parse::<TaskStatus>().expect("status"), TaskStatus::Done);
        assert!("closed".parse::<TaskStatus>().is_err());
        assert_eq!("urgent".parse::<Priority>().expect("priority"), Priority::Urgent);
    }
}
