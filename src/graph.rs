//! Task relationship graph.
//!
//! Three relations are kept as explicit adjacency maps rather than walked
//! through task records:
//! - `parent_task_id`: child -> parent, must form a forest
//! - `recurrence_parent_id`: instance -> template, must form a forest
//! - dependencies: task -> set of tasks it depends on, must stay acyclic
//!
//! Every check here runs before the caller applies the mutation it guards.

use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};

use tracing::debug;

use crate::error::{Error, Result};
use crate::task::{Task, TaskDependency};

/// Map from a node to its single parent.
pub type ParentMap = BTreeMap<String, String>;

/// Map from a node to the nodes it points at.
pub type EdgeMap = BTreeMap<String, BTreeSet<String>>;

/// Ancestors of `start`, nearest first, not including `start`.
///
/// Stops at the first repeated node so a corrupted map cannot loop forever.
pub fn ancestors<'a>(parents: &'a ParentMap, start: &str) -> Vec<&'a str> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut chain = Vec::new();
    let mut current = parents.get(start);
    while let Some(parent) = current {
        if parent == start || !seen.insert(parent.as_str()) {
            break;
        }
        chain.push(parent.as_str());
        current = parents.get(parent);
    }
    chain
}

/// Whether `target` is `start` or one of its ancestors.
pub fn is_ancestor_or_self(parents: &ParentMap, start: &str, target: &str) -> bool {
    start == target || ancestors(parents, start).contains(&target)
}

/// Breadth-first reachability from `from` to `to` along `edges`.
pub fn reaches(edges: &EdgeMap, from: &str, to: &str) -> bool {
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    queue.push_back(from);

    while let Some(current) = queue.pop_front() {
        if current == to {
            return true;
        }
        if !visited.insert(current) {
            continue;
        }
        if let Some(next) = edges.get(current) {
            for id in next {
                if !visited.contains(id.as_str()) {
                    queue.push_back(id.as_str());
                }
            }
        }
    }

    false
}

#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    tasks: BTreeSet<String>,
    parent_of: ParentMap,
    recurrence_parent_of: ParentMap,
    depends_on: EdgeMap,
}

impl TaskGraph {
    pub fn from_tasks(tasks: &[Task], dependencies: &[TaskDependency]) -> Self {
        let mut graph = TaskGraph::default();
        for task in tasks {
            graph.tasks.insert(task.id.clone());
            if let Some(parent) = &task.parent_task_id {
                graph.parent_of.insert(task.id.clone(), parent.clone());
            }
            if let Some(template) = &task.recurrence_parent_id {
                graph
                    .recurrence_parent_of
                    .insert(task.id.clone(), template.clone());
            }
        }
        for dep in dependencies {
            graph.insert_dependency(&dep.task_id, &dep.depends_on_id);
        }
        graph
    }

    pub fn parent(&self, task_id: &str) -> Option<&str> {
        self.parent_of.get(task_id).map(String::as_str)
    }

    pub fn ancestors(&self, task_id: &str) -> Vec<&str> {
        ancestors(&self.parent_of, task_id)
    }

    pub fn dependencies(&self, task_id: &str) -> impl Iterator<Item = &str> {
        self.depends_on
            .get(task_id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    pub fn has_dependency(&self, task_id: &str, depends_on_id: &str) -> bool {
        self.depends_on
            .get(task_id)
            .is_some_and(|set| set.contains(depends_on_id))
    }

    /// Validate moving `task_id` under `new_parent` (or to the root).
    pub fn check_parent(&self, task_id: &str, new_parent: Option<&str>) -> Result<()> {
        check_forest_link(&self.parent_of, task_id, new_parent).map_err(|err| {
            debug!(task = task_id, parent = ?new_parent, %err, "rejected parent link");
            match err {
                LinkError::SelfReference => Error::SelfReference(task_id.to_string()),
                LinkError::Cycle(parent) => Error::CircularHierarchy {
                    task: task_id.to_string(),
                    parent,
                },
            }
        })
    }

    /// Validate linking `instance_id` to the recurring template `template_id`.
    pub fn check_recurrence_parent(&self, instance_id: &str, template_id: Option<&str>) -> Result<()> {
        check_forest_link(&self.recurrence_parent_of, instance_id, template_id).map_err(|err| {
            debug!(instance = instance_id, template = ?template_id, %err, "rejected recurrence link");
            match err {
                LinkError::SelfReference => Error::SelfReference(instance_id.to_string()),
                LinkError::Cycle(parent) => Error::CircularHierarchy {
                    task: instance_id.to_string(),
                    parent,
                },
            }
        })
    }

    /// Validate the edge `task_id -> depends_on_id`.
    ///
    /// The edge closes a cycle exactly when `task_id` is already reachable
    /// from `depends_on_id`.
    pub fn check_dependency(&self, task_id: &str, depends_on_id: &str) -> Result<()> {
        let rejected = if task_id == depends_on_id {
            Some(Error::SelfReference(task_id.to_string()))
        } else if self.has_dependency(task_id, depends_on_id) {
            Some(Error::DuplicateDependency {
                task: task_id.to_string(),
                depends_on: depends_on_id.to_string(),
            })
        } else if reaches(&self.depends_on, depends_on_id, task_id) {
            Some(Error::CircularDependency {
                task: task_id.to_string(),
                depends_on: depends_on_id.to_string(),
            })
        } else {
            None
        };

        match rejected {
            Some(err) => {
                debug!(task = task_id, depends_on = depends_on_id, %err, "rejected dependency");
                Err(err)
            }
            None => Ok(()),
        }
    }

    pub fn set_parent(&mut self, task_id: &str, new_parent: Option<&str>) -> Result<()> {
        self.check_parent(task_id, new_parent)?;
        match new_parent {
            Some(parent) => {
                self.parent_of.insert(task_id.to_string(), parent.to_string());
            }
            None => {
                self.parent_of.remove(task_id);
            }
        }
        Ok(())
    }

    pub fn add_dependency(&mut self, task_id: &str, depends_on_id: &str) -> Result<()> {
        self.check_dependency(task_id, depends_on_id)?;
        self.insert_dependency(task_id, depends_on_id);
        Ok(())
    }

    /// Check relations loaded from disk, which may have been edited by hand.
    pub fn validate(&self) -> Result<()> {
        self.check_references()?;
        for (task, parent) in &self.parent_of {
            if task == parent {
                return Err(Error::SelfReference(task.clone()));
            }
            if has_parent_cycle(&self.parent_of, task) {
                return Err(Error::CircularHierarchy {
                    task: task.clone(),
                    parent: parent.clone(),
                });
            }
        }
        for (instance, template) in &self.recurrence_parent_of {
            if instance == template {
                return Err(Error::SelfReference(instance.clone()));
            }
            if has_parent_cycle(&self.recurrence_parent_of, instance) {
                return Err(Error::CircularHierarchy {
                    task: instance.clone(),
                    parent: template.clone(),
                });
            }
        }
        if let Some((task, depends_on)) = find_dependency_cycle(&self.depends_on) {
            return Err(Error::CircularDependency { task, depends_on });
        }
        Ok(())
    }

    /// Every parent and template link must point at a known task.
    fn check_references(&self) -> Result<()> {
        let links = [
            ("parent", &self.parent_of),
            ("recurrence template", &self.recurrence_parent_of),
        ];
        for (relation, map) in links {
            if let Some((task, target)) = map.iter().find(|(_, target)| !self.tasks.contains(*target)) {
                return Err(Error::MissingReference {
                    task: task.clone(),
                    relation,
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }

    fn insert_dependency(&mut self, task_id: &str, depends_on_id: &str) {
        self.depends_on
            .entry(task_id.to_string())
            .or_default()
            .insert(depends_on_id.to_string());
    }
}

#[derive(Debug)]
enum LinkError {
    SelfReference,
    Cycle(String),
}

impl std::fmt::Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::SelfReference => f.write_str("self reference"),
            LinkError::Cycle(parent) => write!(f, "cycle through {parent}"),
        }
    }
}

fn check_forest_link(
    parents: &ParentMap,
    node: &str,
    new_parent: Option<&str>,
) -> std::result::Result<(), LinkError> {
    let Some(new_parent) = new_parent else {
        return Ok(());
    };
    if new_parent == node {
        return Err(LinkError::SelfReference);
    }
    // Walking up from the new parent must never reach the node itself.
    if is_ancestor_or_self(parents, new_parent, node) {
        return Err(LinkError::Cycle(new_parent.to_string()));
    }
    Ok(())
}

fn has_parent_cycle(parents: &ParentMap, start: &str) -> bool {
    let mut seen: HashSet<&str> = HashSet::new();
    seen.insert(start);
    let mut current = parents.get(start);
    while let Some(parent) = current {
        if !seen.insert(parent.as_str()) {
            return true;
        }
        current = parents.get(parent);
    }
    false
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// First back edge found by an iterative depth-first search.
fn find_dependency_cycle(edges: &EdgeMap) -> Option<(String, String)> {
    let mut marks: BTreeMap<&str, Mark> = BTreeMap::new();

    for root in edges.keys() {
        if marks.contains_key(root.as_str()) {
            continue;
        }
        let mut stack: Vec<(&str, Vec<&str>)> = vec![(root.as_str(), children(edges, root))];
        marks.insert(root.as_str(), Mark::Visiting);

        while let Some((node, pending)) = stack.last_mut() {
            let node = *node;
            match pending.pop() {
                Some(next) => match marks.get(next) {
                    Some(Mark::Visiting) => return Some((node.to_string(), next.to_string())),
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(next, Mark::Visiting);
                        stack.push((next, children(edges, next)));
                    }
                },
                None => {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                }
            }
        }
    }

    None
}

fn children<'a>(edges: &'a EdgeMap, node: &str) -> Vec<&'a str> {
    edges
        .get(node)
        .map(|set| set.iter().rev().map(String::as_str).collect())
        .unwrap_or_default()
}
