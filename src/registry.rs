use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::{Arc, RwLock},
};

use futures::future::BoxFuture;
use tracing::debug;

use crate::error::{CascadeError, Result};

pub type TaskAction = Box<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// A named unit of build work: an ordered list of prerequisite task names
/// and a zero-argument asynchronous action.
pub struct TaskSpec {
    pub name: String,
    pub prerequisites: Vec<String>,
    action: TaskAction,
}

/// Registry of task definitions. Tasks are registered once at startup and
/// only invoked afterwards; the registry itself is the single owner of the
/// graph (no process-wide globals).
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, Arc<TaskSpec>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(&self, name: &str, prerequisites: &[&str], action: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut tasks = self.tasks.write().expect("task registry lock poisoned");

        if tasks.contains_key(name) {
            return Err(CascadeError::Task(format!(
                "Task '{}' is already registered",
                name
            )));
        }

        // Dedupe while keeping order; a repeated prerequisite would
        // otherwise inflate the in-degree bookkeeping in the sort.
        let mut unique_prerequisites: Vec<String> = Vec::new();
        for prerequisite in prerequisites {
            if !unique_prerequisites.iter().any(|p| p.as_str() == *prerequisite) {
                unique_prerequisites.push(prerequisite.to_string());
            }
        }

        let spec = TaskSpec {
            name: name.to_string(),
            prerequisites: unique_prerequisites,
            action: Box::new(move || {
                let fut: BoxFuture<'static, Result<()>> = Box::pin(action());
                fut
            }),
        };
        tasks.insert(name.to_string(), Arc::new(spec));
        Ok(())
    }

    /// Resolves the transitive prerequisite closure of `name` and returns a
    /// valid topological execution order ending in `name` itself. Fails on
    /// unknown tasks, unknown prerequisites, and cycles, before any action
    /// has run.
    pub fn execution_order(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.ordered_tasks(name)?.1)
    }

    /// Runs `name` after all of its prerequisites, depth-first: each
    /// prerequisite fully completes before any dependent's action starts,
    /// and every task in the closure executes at most once. The first
    /// failure aborts the invocation, so a dependent of a failed
    /// prerequisite never runs and the prerequisite's error is surfaced.
    pub async fn run(&self, name: &str) -> Result<()> {
        let (needed, order) = self.ordered_tasks(name)?;
        let by_name: HashMap<&str, &Arc<TaskSpec>> =
            needed.iter().map(|t| (t.name.as_str(), t)).collect();

        for task_name in &order {
            let task = by_name[task_name.as_str()];
            debug!(task = %task.name, "running task");
            (task.action)().await?;
        }

        Ok(())
    }

    /// Runs the given tasks strictly in order, each waiting for the
    /// previous to finish, short-circuiting on the first failure.
    pub async fn run_sequence(&self, names: &[&str]) -> Result<()> {
        for name in names {
            self.run(name).await?;
        }
        Ok(())
    }

    /// Resolves the closure of `name` together with its execution order.
    /// An order that misses any resolved task means the sort dropped one;
    /// that must surface as an error rather than a run that silently skips
    /// actions.
    fn ordered_tasks(&self, name: &str) -> Result<(Vec<Arc<TaskSpec>>, Vec<String>)> {
        let needed = self.required_tasks(name)?;
        let order = sort_topologically(&needed);

        if order.len() != needed.len() {
            return Err(CascadeError::Dependency(format!(
                "Task '{}' produced an incomplete execution order ({} of {} tasks)",
                name,
                order.len(),
                needed.len()
            )));
        }

        Ok((needed, order))
    }

    /// Collects `name` and its transitive prerequisites, validating that
    /// every referenced task exists and the subgraph is acyclic.
    fn required_tasks(&self, name: &str) -> Result<Vec<Arc<TaskSpec>>> {
        let tasks = self.tasks.read().expect("task registry lock poisoned");

        if !tasks.contains_key(name) {
            return Err(CascadeError::Task(format!("Task '{}' not found", name)));
        }

        let mut needed: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(name.to_string());

        while let Some(current) = queue.pop_front() {
            if needed.contains(&current) {
                continue;
            }

            let task = tasks.get(&current).ok_or_else(|| {
                CascadeError::Dependency(format!(
                    "Task '{}' is required as a prerequisite but doesn't exist",
                    current
                ))
            })?;
            needed.insert(current);

            for dep in &task.prerequisites {
                if !needed.contains(dep) {
                    queue.push_back(dep.clone());
                }
            }
        }

        let specs: Vec<Arc<TaskSpec>> = needed.iter().map(|id| Arc::clone(&tasks[id])).collect();
        detect_cycles(&specs)?;
        Ok(specs)
    }
}

fn sort_topologically(tasks: &[Arc<TaskSpec>]) -> Vec<String> {
    let mut in_degrees: HashMap<&str, usize> = HashMap::new();

    for task in tasks {
        in_degrees.insert(&task.name, task.prerequisites.len());
    }

    let mut queue: VecDeque<&str> = VecDeque::new();
    for (task_name, &in_degree) in &in_degrees {
        if in_degree == 0 {
            queue.push_back(task_name);
        }
    }

    let mut sorted: Vec<String> = Vec::new();

    while let Some(task_name) = queue.pop_front() {
        sorted.push(task_name.to_string());

        for dependent in tasks {
            if !dependent.prerequisites.iter().any(|dep| dep == task_name) {
                continue;
            }

            if let Some(count) = in_degrees.get_mut(dependent.name.as_str()) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(&dependent.name);
                }
            }
        }
    }

    sorted
}

fn detect_cycles(tasks: &[Arc<TaskSpec>]) -> Result<()> {
    let task_map: HashMap<&str, &Arc<TaskSpec>> =
        tasks.iter().map(|t| (t.name.as_str(), t)).collect();

    for task in tasks {
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        if has_cycle(&task.name, &task_map, &mut visited, &mut path) {
            path.push(task.name.clone());
            return Err(CascadeError::Dependency(format!(
                "Circular dependency: {}",
                path.join(" -> ")
            )));
        }
    }

    Ok(())
}

fn has_cycle(
    task_name: &str,
    task_map: &HashMap<&str, &Arc<TaskSpec>>,
    visited: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if path.iter().any(|name| name == task_name) {
        return true;
    }

    if visited.contains(task_name) {
        return false;
    }

    visited.insert(task_name.to_string());
    path.push(task_name.to_string());

    if let Some(task) = task_map.get(task_name) {
        for dep in &task.prerequisites {
            if has_cycle(dep, task_map, visited, path) {
                return true;
            }
        }
    }

    path.pop();

    false
}
