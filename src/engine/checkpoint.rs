// ABOUTME: Periodic run checkpoints, restore, and checkpoint-based backtracking
// ABOUTME: Snapshots completed/failed IDs plus completed-task outputs; restore replays a snapshot

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{EngineError, Result};
use super::result::TaskExecutionResult;
use crate::graph::{IdGenerator, TaskGraph, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    pub completed_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub task_outputs: IndexMap<String, serde_json::Value>,
}

/// Point-in-time snapshot taken at the scheduler's checkpoint cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCheckpoint {
    pub id: String,
    /// The task whose settle triggered this checkpoint.
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
    pub state: CheckpointState,
}

/// Reference into checkpoint history; position 0 is the most recent.
#[derive(Debug, Clone, Copy)]
pub struct BacktrackPoint<'a> {
    pub position: usize,
    pub checkpoint: &'a TaskCheckpoint,
}

pub fn capture_checkpoint(
    graph: &TaskGraph,
    results: &HashMap<String, TaskExecutionResult>,
    trigger_task: &str,
    ids: &mut dyn IdGenerator,
) -> TaskCheckpoint {
    let mut completed_tasks = Vec::new();
    let mut failed_tasks = Vec::new();
    let mut task_outputs = IndexMap::new();

    for task in graph.tasks.values() {
        match task.status {
            TaskStatus::Completed => {
                completed_tasks.push(task.id.clone());
                if let Some(output) = results.get(&task.id).and_then(|r| r.output.clone()) {
                    task_outputs.insert(task.id.clone(), output);
                }
            }
            TaskStatus::Failed => failed_tasks.push(task.id.clone()),
            _ => {}
        }
    }

    let checkpoint = TaskCheckpoint {
        id: ids.next_id(),
        task_id: trigger_task.to_string(),
        timestamp: Utc::now(),
        state: CheckpointState {
            completed_tasks,
            failed_tasks,
            task_outputs,
        },
    };
    debug!(
        checkpoint_id = %checkpoint.id,
        completed = checkpoint.state.completed_tasks.len(),
        failed = checkpoint.state.failed_tasks.len(),
        "checkpoint captured"
    );
    checkpoint
}

/// Rebuild a graph from a checkpoint: every task is reset to pending with
/// error and timestamps cleared, then the snapshot's completed tasks are
/// re-marked completed. Recorded failed tasks deliberately come back as
/// pending so the next run re-attempts them.
pub fn restore_from_checkpoint(graph: &TaskGraph, checkpoint: &TaskCheckpoint) -> TaskGraph {
    let mut restored = graph.clone();

    for task in restored.tasks.values_mut() {
        task.status = TaskStatus::Pending;
        task.error = None;
        task.started_at = None;
        task.completed_at = None;
    }

    for id in &checkpoint.state.completed_tasks {
        // Unknown IDs (task removed since the snapshot) are ignored.
        let _ = restored.update_status(id, TaskStatus::Completed, None);
    }
    restored
}

/// The checkpoint `steps_back` rewind steps away: 1 is the most recent.
pub fn backtrack_point(history: &[TaskCheckpoint], steps_back: usize) -> Option<&TaskCheckpoint> {
    if steps_back == 0 {
        return None;
    }
    history.len().checked_sub(steps_back).map(|i| &history[i])
}

/// Enumerate the history newest-first as addressable backtrack points.
pub fn backtrack_points(history: &[TaskCheckpoint]) -> Vec<BacktrackPoint<'_>> {
    history
        .iter()
        .rev()
        .enumerate()
        .map(|(position, checkpoint)| BacktrackPoint {
            position,
            checkpoint,
        })
        .collect()
}

/// Rewind N completed steps: restore from the Nth-most-recent checkpoint.
pub fn rewind(
    graph: &TaskGraph,
    history: &[TaskCheckpoint],
    steps_back: usize,
) -> Result<TaskGraph> {
    let checkpoint =
        backtrack_point(history, steps_back).ok_or(EngineError::NoSuchCheckpoint {
            steps_back,
            available: history.len(),
        })?;
    Ok(restore_from_checkpoint(graph, checkpoint))
}
