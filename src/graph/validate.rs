// ABOUTME: Full-graph validation: typed structural errors plus advisory warnings
// ABOUTME: Cycle detection runs an explicit-stack DFS and captures the cycle segment

use std::collections::{HashMap, HashSet, VecDeque};

use super::error::ValidationIssue;
use super::model::TaskGraph;

/// Dependency chains deeper than this draw a warning; plans this deep
/// usually mean the planner serialized work that could fan out.
const MAX_CHAIN_DEPTH: usize = 10;

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

impl ValidationReport {
    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

impl TaskGraph {
    /// Validate the whole graph. Structural problems (missing dependency,
    /// cycle, duplicate ID, empty graph) land in `errors`; advisory findings
    /// (no roots, unreachable tasks, long chains) land in `warnings`.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.tasks.is_empty() {
            report.errors.push(ValidationIssue::EmptyGraph);
            return report.finish();
        }

        check_duplicate_ids(self, &mut report);
        check_missing_dependencies(self, &mut report);

        if let Some(cycle) = find_cycle(self) {
            report
                .errors
                .push(ValidationIssue::CircularDependency { cycle });
        }

        if self.root_tasks.is_empty() {
            report
                .warnings
                .push("no root tasks - every task has at least one internal dependency".to_string());
        }

        check_unreachable(self, &mut report);

        // Depth only makes sense on an acyclic graph.
        if !report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationIssue::CircularDependency { .. }))
        {
            let depth = dependency_depth(self);
            if depth > MAX_CHAIN_DEPTH {
                report.warnings.push(format!(
                    "dependency chain depth {} exceeds {}",
                    depth, MAX_CHAIN_DEPTH
                ));
            }
        }

        report.finish()
    }
}

/// Map keys are unique by construction, so duplicates can only appear when a
/// task's `id` field disagrees with its key or repeats another entry's.
fn check_duplicate_ids(graph: &TaskGraph, report: &mut ValidationReport) {
    let mut seen: HashSet<&str> = HashSet::new();
    for task in graph.tasks.values() {
        if !seen.insert(task.id.as_str()) {
            report.errors.push(ValidationIssue::DuplicateTaskId {
                task_id: task.id.clone(),
            });
        }
    }
}

fn check_missing_dependencies(graph: &TaskGraph, report: &mut ValidationReport) {
    for task in graph.tasks.values() {
        for dep in &task.dependencies {
            if !graph.tasks.contains_key(dep) {
                report.errors.push(ValidationIssue::MissingDependency {
                    task_id: task.id.clone(),
                    dependency: dep.clone(),
                });
            }
        }
    }
}

/// Iterative DFS with an explicit frame stack and on-stack set. When a
/// dependency already on the stack is re-encountered, the slice of the stack
/// from that node to the top is the cycle segment.
fn find_cycle(graph: &TaskGraph) -> Option<Vec<String>> {
    let mut finished: HashSet<String> = HashSet::new();
    let mut on_stack: HashSet<String> = HashSet::new();

    for start in graph.tasks.keys() {
        if finished.contains(start) {
            continue;
        }
        // (task id, index of next dependency to visit)
        let mut stack: Vec<(String, usize)> = vec![(start.clone(), 0)];
        on_stack.insert(start.clone());

        while let Some((id, next)) = stack.last().cloned() {
            let deps = graph
                .tasks
                .get(&id)
                .map(|t| t.dependencies.clone())
                .unwrap_or_default();

            if next < deps.len() {
                if let Some(frame) = stack.last_mut() {
                    frame.1 += 1;
                }
                let dep = &deps[next];
                if !graph.tasks.contains_key(dep) {
                    // Missing deps are reported separately.
                    continue;
                }
                if on_stack.contains(dep) {
                    let pos = stack.iter().position(|(n, _)| n == dep).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[pos..].iter().map(|(n, _)| n.clone()).collect();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                if !finished.contains(dep) {
                    on_stack.insert(dep.clone());
                    stack.push((dep.clone(), 0));
                }
            } else {
                finished.insert(id.clone());
                on_stack.remove(&id);
                stack.pop();
            }
        }
    }
    None
}

/// BFS forward from roots across the reverse dependency relation; any task
/// never reached hangs off no root and will never become executable.
fn check_unreachable(graph: &TaskGraph, report: &mut ValidationReport) {
    if graph.root_tasks.is_empty() {
        return;
    }

    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for task in graph.tasks.values() {
        for dep in &task.dependencies {
            dependents.entry(dep.as_str()).or_default().push(&task.id);
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for root in &graph.root_tasks {
        visited.insert(root.as_str());
        queue.push_back(root.as_str());
    }
    while let Some(current) = queue.pop_front() {
        if let Some(children) = dependents.get(current) {
            for child in children {
                if visited.insert(child) {
                    queue.push_back(child);
                }
            }
        }
    }

    for id in graph.tasks.keys() {
        if !visited.contains(id.as_str()) {
            report
                .warnings
                .push(format!("task '{}' is unreachable from any root", id));
        }
    }
}

/// Longest dependency chain, measured by peeling layers of tasks whose
/// dependencies are already peeled. Assumes an acyclic graph.
fn dependency_depth(graph: &TaskGraph) -> usize {
    let mut peeled: HashSet<&str> = HashSet::new();
    let mut depth = 0;

    while peeled.len() < graph.tasks.len() {
        let layer: Vec<&str> = graph
            .tasks
            .values()
            .filter(|t| !peeled.contains(t.id.as_str()))
            .filter(|t| {
                t.dependencies
                    .iter()
                    .all(|d| peeled.contains(d.as_str()) || !graph.tasks.contains_key(d))
            })
            .map(|t| t.id.as_str())
            .collect();
        if layer.is_empty() {
            break;
        }
        peeled.extend(layer);
        depth += 1;
    }
    depth
}
