// ABOUTME: In-memory task graph: construction, mutation, status transitions, stats
// ABOUTME: Owns dependency edge management including the insertion-time cycle pre-check

use std::collections::{HashSet, VecDeque};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{GraphError, Result};
use super::task::{IdGenerator, Task, TaskStatus, DEFAULT_MAX_RETRIES};

/// Flat plan description used to build a graph. Dependencies reference task
/// IDs — either explicit `id` entries or the IDs the generator assigns in
/// list order. Unknown IDs are treated as external and satisfied.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSpec {
    pub goal: String,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskSpec {
    pub description: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGraph {
    pub id: String,
    pub goal: String,
    pub root_tasks: Vec<String>,
    pub tasks: IndexMap<String, Task>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct GraphStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub total_retries: u32,
    pub average_duration_ms: Option<f64>,
}

impl TaskGraph {
    /// Build a graph from a flat plan. IDs come from the injected generator
    /// unless a spec entry carries its own. Cycles are not checked here; that
    /// is the explicit `validate()` call.
    pub fn from_plan(spec: PlanSpec, ids: &mut dyn IdGenerator) -> Result<Self> {
        let graph_id = ids.next_id();
        let mut tasks: IndexMap<String, Task> = IndexMap::with_capacity(spec.tasks.len());

        for entry in spec.tasks {
            let id = entry.id.unwrap_or_else(|| ids.next_id());
            if tasks.contains_key(&id) {
                return Err(GraphError::DuplicateTaskId { task_id: id });
            }
            let mut task = Task::new(id.clone(), entry.description)
                .with_dependencies(entry.dependencies)
                .with_max_retries(entry.max_retries.unwrap_or(DEFAULT_MAX_RETRIES));
            task.metadata = entry.metadata;
            tasks.insert(id, task);
        }

        let now = Utc::now();
        let mut graph = Self {
            id: graph_id,
            goal: spec.goal,
            root_tasks: Vec::new(),
            tasks,
            created_at: now,
            updated_at: now,
        };
        graph.recompute_roots();

        debug!(
            graph_id = %graph.id,
            tasks = graph.tasks.len(),
            roots = graph.root_tasks.len(),
            "task graph built"
        );
        Ok(graph)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Add a task. Its dependency list may reference IDs that do not exist
    /// yet; validation surfaces them later if they never appear.
    pub fn add_task(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(GraphError::DuplicateTaskId {
                task_id: task.id.clone(),
            });
        }
        self.tasks.insert(task.id.clone(), task);
        self.recompute_roots();
        self.touch();
        Ok(())
    }

    /// Remove a task, stripping its ID from every other task's dependency
    /// list and from the root set. Removal of a depended-on task is allowed.
    pub fn remove_task(&mut self, id: &str) -> Result<Task> {
        let removed = self
            .tasks
            .shift_remove(id)
            .ok_or_else(|| GraphError::TaskNotFound {
                task_id: id.to_string(),
            })?;

        for task in self.tasks.values_mut() {
            task.dependencies.retain(|dep| dep != id);
        }
        self.recompute_roots();
        self.touch();
        Ok(removed)
    }

    /// Insert a dependency edge `task -> dep`. Refused for self-edges,
    /// unknown endpoints, duplicates, and edges that would close a loop.
    pub fn add_dependency(&mut self, task_id: &str, dep_id: &str) -> Result<()> {
        if task_id == dep_id {
            return Err(GraphError::SelfDependency {
                task_id: task_id.to_string(),
            });
        }
        if !self.tasks.contains_key(dep_id) {
            return Err(GraphError::DependencyNotFound {
                task_id: task_id.to_string(),
                dependency: dep_id.to_string(),
            });
        }
        let task = self
            .tasks
            .get(task_id)
            .ok_or_else(|| GraphError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        if task.dependencies.iter().any(|d| d == dep_id) {
            return Err(GraphError::DuplicateDependency {
                task_id: task_id.to_string(),
                dependency: dep_id.to_string(),
            });
        }
        if self.would_create_cycle(task_id, dep_id) {
            return Err(GraphError::WouldCreateCycle {
                task_id: task_id.to_string(),
                dependency: dep_id.to_string(),
            });
        }

        if let Some(task) = self.tasks.get_mut(task_id) {
            task.dependencies.push(dep_id.to_string());
        }
        self.recompute_roots();
        self.touch();
        Ok(())
    }

    pub fn remove_dependency(&mut self, task_id: &str, dep_id: &str) -> Result<()> {
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| GraphError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;
        let before = task.dependencies.len();
        task.dependencies.retain(|d| d != dep_id);
        if task.dependencies.len() == before {
            return Err(GraphError::DependencyNotFound {
                task_id: task_id.to_string(),
                dependency: dep_id.to_string(),
            });
        }
        self.recompute_roots();
        self.touch();
        Ok(())
    }

    /// True iff `task_id` is reachable from `dep_id` by following dependency
    /// edges forward, i.e. `dep_id` already transitively depends on
    /// `task_id`, so adding `task_id -> dep_id` would close a loop.
    /// Work-list BFS, O(V+E) per call.
    pub fn would_create_cycle(&self, task_id: &str, dep_id: &str) -> bool {
        let mut visited: HashSet<&str> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::new();
        queue.push_back(dep_id);
        visited.insert(dep_id);

        while let Some(current) = queue.pop_front() {
            if current == task_id {
                return true;
            }
            if let Some(task) = self.tasks.get(current) {
                for dep in &task.dependencies {
                    if visited.insert(dep.as_str()) {
                        queue.push_back(dep.as_str());
                    }
                }
            }
        }
        false
    }

    /// Transition a task's status. Stamps `started_at` on `InProgress` and
    /// `completed_at` on terminal states, then re-scans every pending task
    /// and flips those with a failed dependency to `Blocked`. The re-scan is
    /// global and only runs here — a task can sit transiently `Pending` with
    /// a failed dependency until the next transition.
    pub fn update_status(
        &mut self,
        id: &str,
        status: TaskStatus,
        error: Option<String>,
    ) -> Result<()> {
        let now = Utc::now();
        let task = self
            .tasks
            .get_mut(id)
            .ok_or_else(|| GraphError::TaskNotFound {
                task_id: id.to_string(),
            })?;

        task.status = status;
        match status {
            TaskStatus::Pending => {
                task.error = None;
                task.started_at = None;
                task.completed_at = None;
            }
            TaskStatus::InProgress => {
                task.started_at = Some(now);
                task.completed_at = None;
            }
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped => {
                task.completed_at = Some(now);
                task.error = error;
            }
            TaskStatus::Blocked => {}
        }

        self.propagate_blocked();
        self.touch();
        Ok(())
    }

    /// IDs of tasks directly depending on `id`.
    pub fn direct_dependents(&self, id: &str) -> Vec<String> {
        self.tasks
            .values()
            .filter(|t| t.dependencies.iter().any(|d| d == id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// IDs of all tasks transitively depending on `id`, excluding `id`
    /// itself. Work-list BFS over reverse edges.
    pub fn transitive_dependents(&self, id: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut out = Vec::new();
        queue.push_back(id.to_string());
        visited.insert(id.to_string());

        while let Some(current) = queue.pop_front() {
            for dependent in self.direct_dependents(&current) {
                if visited.insert(dependent.clone()) {
                    out.push(dependent.clone());
                    queue.push_back(dependent);
                }
            }
        }
        out
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            total: self.tasks.len(),
            ..GraphStats::default()
        };
        let mut durations: Vec<i64> = Vec::new();

        for task in self.tasks.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Blocked => stats.blocked += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
            stats.total_retries += task.retry_count;
            if let Some(ms) = task.duration_ms() {
                durations.push(ms);
            }
        }

        if !durations.is_empty() {
            let sum: i64 = durations.iter().sum();
            stats.average_duration_ms = Some(sum as f64 / durations.len() as f64);
        }
        stats
    }

    /// Roots are tasks whose dependencies are empty or entirely external
    /// (IDs not present in the graph).
    fn recompute_roots(&mut self) {
        let known: HashSet<&String> = self.tasks.keys().collect();
        self.root_tasks = self
            .tasks
            .values()
            .filter(|t| t.dependencies.iter().all(|d| !known.contains(d)))
            .map(|t| t.id.clone())
            .collect();
    }

    fn propagate_blocked(&mut self) {
        let failed: HashSet<String> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.id.clone())
            .collect();
        if failed.is_empty() {
            return;
        }

        for task in self.tasks.values_mut() {
            if task.status == TaskStatus::Pending
                && task.dependencies.iter().any(|d| failed.contains(d))
            {
                task.status = TaskStatus::Blocked;
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::task::SequentialIdGenerator;

    fn spec(entries: &[(&str, &[&str])]) -> PlanSpec {
        PlanSpec {
            goal: "test plan".to_string(),
            tasks: entries
                .iter()
                .map(|(id, deps)| TaskSpec {
                    description: format!("task {}", id),
                    id: Some(id.to_string()),
                    dependencies: deps.iter().map(|d| d.to_string()).collect(),
                    ..TaskSpec::default()
                })
                .collect(),
        }
    }

    fn diamond() -> TaskGraph {
        let mut ids = SequentialIdGenerator::default();
        TaskGraph::from_plan(
            spec(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]),
            &mut ids,
        )
        .unwrap()
    }

    #[test]
    fn test_from_plan_assigns_roots() {
        let graph = diamond();
        assert_eq!(graph.tasks.len(), 4);
        assert_eq!(graph.root_tasks, vec!["a"]);
    }

    #[test]
    fn test_external_dependencies_count_as_roots() {
        let mut ids = SequentialIdGenerator::default();
        let graph = TaskGraph::from_plan(
            spec(&[("a", &["external-thing"]), ("b", &["a"])]),
            &mut ids,
        )
        .unwrap();

        // "a" depends only on an unknown ID, so it roots the graph.
        assert_eq!(graph.root_tasks, vec!["a"]);
    }

    #[test]
    fn test_duplicate_id_rejected_at_build() {
        let mut ids = SequentialIdGenerator::default();
        let result = TaskGraph::from_plan(spec(&[("a", &[]), ("a", &[])]), &mut ids);
        assert_eq!(
            result.err(),
            Some(GraphError::DuplicateTaskId {
                task_id: "a".to_string()
            })
        );
    }

    #[test]
    fn test_add_dependency_rejections() {
        let mut graph = diamond();

        assert_eq!(
            graph.add_dependency("a", "a").err(),
            Some(GraphError::SelfDependency {
                task_id: "a".to_string()
            })
        );
        assert!(matches!(
            graph.add_dependency("a", "nope").err(),
            Some(GraphError::DependencyNotFound { .. })
        ));
        assert!(matches!(
            graph.add_dependency("b", "a").err(),
            Some(GraphError::DuplicateDependency { .. })
        ));
        // d transitively depends on a; a -> d would close a loop
        assert!(matches!(
            graph.add_dependency("a", "d").err(),
            Some(GraphError::WouldCreateCycle { .. })
        ));
    }

    #[test]
    fn test_would_create_cycle_is_reachability() {
        let graph = diamond();

        // a is reachable from d via dependency edges
        assert!(graph.would_create_cycle("a", "d"));
        assert!(graph.would_create_cycle("b", "d"));
        // d is not reachable from a
        assert!(!graph.would_create_cycle("d", "a"));
        assert!(!graph.would_create_cycle("b", "c"));
    }

    #[test]
    fn test_remove_task_strips_edges_and_roots() {
        let mut graph = diamond();
        graph.remove_task("a").unwrap();

        assert!(!graph.tasks.contains_key("a"));
        assert!(graph.tasks["b"].dependencies.is_empty());
        assert!(graph.tasks["c"].dependencies.is_empty());
        // b and c become roots now
        assert!(graph.root_tasks.contains(&"b".to_string()));
        assert!(graph.root_tasks.contains(&"c".to_string()));
    }

    #[test]
    fn test_update_status_stamps_timestamps() {
        let mut graph = diamond();

        graph
            .update_status("a", TaskStatus::InProgress, None)
            .unwrap();
        let a = graph.get("a").unwrap();
        assert!(a.started_at.is_some());
        assert!(a.completed_at.is_none());

        graph.update_status("a", TaskStatus::Completed, None).unwrap();
        assert!(graph.get("a").unwrap().completed_at.is_some());

        // Resetting to pending clears stamps and error
        graph.update_status("a", TaskStatus::Pending, None).unwrap();
        let a = graph.get("a").unwrap();
        assert!(a.started_at.is_none());
        assert!(a.completed_at.is_none());
        assert!(a.error.is_none());
    }

    #[test]
    fn test_failure_blocks_pending_dependents() {
        let mut graph = diamond();
        graph
            .update_status("a", TaskStatus::Failed, Some("boom".to_string()))
            .unwrap();

        assert_eq!(graph.get("b").unwrap().status, TaskStatus::Blocked);
        assert_eq!(graph.get("c").unwrap().status, TaskStatus::Blocked);
        // d depends on b/c which are blocked, not failed; it stays pending
        assert_eq!(graph.get("d").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_dependent_queries() {
        let graph = diamond();

        let mut direct = graph.direct_dependents("a");
        direct.sort();
        assert_eq!(direct, vec!["b", "c"]);

        let mut all = graph.transitive_dependents("a");
        all.sort();
        assert_eq!(all, vec!["b", "c", "d"]);
        assert!(graph.transitive_dependents("d").is_empty());
    }

    #[test]
    fn test_stats_counts_and_average() {
        let mut graph = diamond();
        graph
            .update_status("a", TaskStatus::InProgress, None)
            .unwrap();
        graph.update_status("a", TaskStatus::Completed, None).unwrap();
        graph
            .update_status("b", TaskStatus::Failed, Some("err".to_string()))
            .unwrap();

        let stats = graph.stats();
        assert_eq!(stats.total, 4);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        // d got blocked by b's failure
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.pending, 1);
        // only "a" has both timestamps
        assert!(stats.average_duration_ms.is_some());
    }

    #[test]
    fn test_clone_is_deep() {
        let original = diamond();
        let mut copy = original.clone();
        copy.update_status("a", TaskStatus::Completed, None).unwrap();
        copy.tasks.get_mut("b").unwrap().dependencies.clear();

        assert_eq!(original.get("a").unwrap().status, TaskStatus::Pending);
        assert_eq!(original.get("b").unwrap().dependencies, vec!["a"]);
    }
}
