// ABOUTME: Stateless execution analysis and dry-run layer planning
// ABOUTME: Classifies tasks by runnability and derives overall progress without side effects

use std::collections::{HashMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graph::{Graph, NodeIndex};
use petgraph::Direction;
use serde::Serialize;

use super::error::{EngineError, Result};
use crate::graph::{TaskGraph, TaskStatus};

/// Snapshot classification of every task plus overall progress. Pure
/// derivation from current statuses; calling it never mutates the graph,
/// and it is the only view the scheduler consults per iteration.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionAnalysis {
    pub executable: Vec<String>,
    pub in_progress: Vec<String>,
    pub blocked: Vec<String>,
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
    /// Percentage of tasks in a terminal state.
    pub progress: f64,
    pub is_complete: bool,
    pub can_continue: bool,
}

pub fn analyze_execution(graph: &TaskGraph) -> ExecutionAnalysis {
    let mut analysis = ExecutionAnalysis::default();
    let total = graph.tasks.len();
    let mut terminal = 0usize;

    for task in graph.tasks.values() {
        match task.status {
            TaskStatus::Pending => {
                // Dependencies outside the graph are external and treated as met.
                let deps_met = task.dependencies.iter().all(|dep| {
                    graph
                        .get(dep)
                        .map(|d| d.status == TaskStatus::Completed)
                        .unwrap_or(true)
                });
                if deps_met {
                    analysis.executable.push(task.id.clone());
                }
            }
            TaskStatus::InProgress => analysis.in_progress.push(task.id.clone()),
            TaskStatus::Blocked => analysis.blocked.push(task.id.clone()),
            TaskStatus::Completed => analysis.completed.push(task.id.clone()),
            TaskStatus::Failed => analysis.failed.push(task.id.clone()),
            TaskStatus::Skipped => analysis.skipped.push(task.id.clone()),
        }
        if task.status.is_terminal() {
            terminal += 1;
        }
    }

    analysis.progress = if total == 0 {
        0.0
    } else {
        (terminal as f64 / total as f64) * 100.0
    };
    analysis.is_complete = !graph.tasks.is_empty()
        && graph
            .tasks
            .values()
            .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped));
    analysis.can_continue = !analysis.executable.is_empty() || !analysis.in_progress.is_empty();
    analysis
}

/// Plan the execution as parallel layers without running anything: every
/// task in layer i has all internal dependencies in layers 0..i. The
/// layering partitions the tasks exactly once and is stable for a given
/// graph. Fails on cycles.
pub fn dry_run(graph: &TaskGraph) -> Result<Vec<Vec<String>>> {
    let mut dag: Graph<String, ()> = Graph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();

    for id in graph.tasks.keys() {
        let node = dag.add_node(id.clone());
        indices.insert(id.as_str(), node);
    }
    for task in graph.tasks.values() {
        let task_node = indices[task.id.as_str()];
        for dep in &task.dependencies {
            // External dependencies don't constrain the layering.
            if let Some(&dep_node) = indices.get(dep.as_str()) {
                dag.add_edge(dep_node, task_node, ());
            }
        }
    }

    let sorted = toposort(&dag, None).map_err(|cycle| EngineError::CircularDependency {
        tasks: vec![dag[cycle.node_id()].clone()],
    })?;

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut placed: HashSet<NodeIndex> = HashSet::new();
    let mut remaining: Vec<NodeIndex> = sorted;

    while !remaining.is_empty() {
        let (ready, rest): (Vec<NodeIndex>, Vec<NodeIndex>) =
            remaining.into_iter().partition(|&node| {
                dag.neighbors_directed(node, Direction::Incoming)
                    .all(|dep| placed.contains(&dep))
            });
        if ready.is_empty() {
            // Unreachable once toposort succeeded.
            break;
        }
        placed.extend(ready.iter().copied());
        layers.push(ready.into_iter().map(|n| dag[n].clone()).collect());
        remaining = rest;
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PlanSpec, SequentialIdGenerator, TaskSpec};

    fn build(entries: &[(&str, &[&str])]) -> TaskGraph {
        let mut ids = SequentialIdGenerator::default();
        TaskGraph::from_plan(
            PlanSpec {
                goal: "analysis test".to_string(),
                tasks: entries
                    .iter()
                    .map(|(id, deps)| TaskSpec {
                        description: format!("task {}", id),
                        id: Some(id.to_string()),
                        dependencies: deps.iter().map(|d| d.to_string()).collect(),
                        ..TaskSpec::default()
                    })
                    .collect(),
            },
            &mut ids,
        )
        .unwrap()
    }

    #[test]
    fn test_initial_analysis_lists_roots_executable() {
        let graph = build(&[("a", &[]), ("b", &["a"]), ("c", &["a"])]);
        let analysis = analyze_execution(&graph);

        assert_eq!(analysis.executable, vec!["a"]);
        assert!(!analysis.is_complete);
        assert!(analysis.can_continue);
        assert_eq!(analysis.progress, 0.0);
    }

    #[test]
    fn test_fanout_becomes_executable_together() {
        let mut graph = build(&[("a", &[]), ("b", &["a"]), ("c", &["a"])]);
        graph
            .update_status("a", TaskStatus::Completed, None)
            .unwrap();

        let analysis = analyze_execution(&graph);
        let mut executable = analysis.executable.clone();
        executable.sort();
        assert_eq!(executable, vec!["b", "c"]);
    }

    #[test]
    fn test_analysis_has_no_side_effects() {
        let graph = build(&[("a", &[]), ("b", &["a"])]);
        let first = analyze_execution(&graph);
        let second = analyze_execution(&graph);

        assert_eq!(first.executable, second.executable);
        assert_eq!(graph.get("a").unwrap().status, TaskStatus::Pending);
    }

    #[test]
    fn test_complete_requires_all_completed_or_skipped() {
        let mut graph = build(&[("a", &[]), ("b", &["a"])]);
        graph
            .update_status("a", TaskStatus::Completed, None)
            .unwrap();
        assert!(!analyze_execution(&graph).is_complete);

        graph.update_status("b", TaskStatus::Skipped, None).unwrap();
        let analysis = analyze_execution(&graph);
        assert!(analysis.is_complete);
        assert_eq!(analysis.progress, 100.0);
        assert!(!analysis.can_continue);
    }

    #[test]
    fn test_empty_graph_is_never_complete() {
        // Empty graphs are a validation error, not a successful no-op run.
        let graph = build(&[]);
        let analysis = analyze_execution(&graph);

        assert!(!analysis.is_complete);
        assert!(!analysis.can_continue);
        assert_eq!(analysis.progress, 0.0);
    }

    #[test]
    fn test_failed_graph_cannot_continue() {
        let mut graph = build(&[("a", &[]), ("b", &["a"])]);
        graph
            .update_status("a", TaskStatus::Failed, Some("boom".to_string()))
            .unwrap();

        let analysis = analyze_execution(&graph);
        assert!(!analysis.is_complete);
        assert!(!analysis.can_continue);
        assert_eq!(analysis.failed, vec!["a"]);
        assert_eq!(analysis.blocked, vec!["b"]);
    }

    #[test]
    fn test_dry_run_layers_partition_tasks() {
        let graph = build(&[("a", &[]), ("b", &["a"]), ("c", &["a"]), ("d", &["b", "c"])]);
        let layers = dry_run(&graph).unwrap();

        assert_eq!(layers.len(), 3);
        assert_eq!(layers[0], vec!["a"]);
        let mut middle = layers[1].clone();
        middle.sort();
        assert_eq!(middle, vec!["b", "c"]);
        assert_eq!(layers[2], vec!["d"]);

        // Partition: every task exactly once
        let flat: Vec<&String> = layers.iter().flatten().collect();
        assert_eq!(flat.len(), graph.tasks.len());

        // Idempotent for the same input
        assert_eq!(dry_run(&graph).unwrap(), layers);
    }

    #[test]
    fn test_dry_run_rejects_cycles() {
        let graph = build(&[("a", &["b"]), ("b", &["a"])]);
        assert!(matches!(
            dry_run(&graph),
            Err(EngineError::CircularDependency { .. })
        ));
    }
}
