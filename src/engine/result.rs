// ABOUTME: Per-attempt execution results and whole-run outcome aggregation
// ABOUTME: Defines the result structures handed back to the caller after a run

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::TaskCheckpoint;
use super::recovery::{TaskError, TaskErrorKind};
use crate::graph::{GraphStats, TaskGraph};

/// Progress phases reported through the progress callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Starting,
    InProgress,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskPhase::Starting => write!(f, "starting"),
            TaskPhase::InProgress => write!(f, "in_progress"),
            TaskPhase::Completed => write!(f, "completed"),
            TaskPhase::Failed => write!(f, "failed"),
        }
    }
}

/// Produced once per task attempt; retained per task ID for the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub error: Option<TaskError>,
    pub output: Option<serde_json::Value>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl TaskExecutionResult {
    pub fn success(task_id: impl Into<String>, output: Option<serde_json::Value>) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            error: None,
            output,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(task_id: impl Into<String>, error: TaskError) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            error: Some(error),
            output: None,
            duration_ms: 0,
            timestamp: Utc::now(),
        }
    }

    /// Conversion for an executor that panicked; the structured error
    /// classification is lost, per the executor contract.
    pub fn panicked(task_id: impl Into<String>) -> Self {
        Self::failure(
            task_id,
            TaskError::new(TaskErrorKind::Unknown, "task executor panicked"),
        )
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }
}

/// Counters describing a finished (or stalled) run.
#[derive(Debug, Clone, Serialize)]
pub struct RunStats {
    pub tasks: GraphStats,
    pub iterations: u64,
    pub recovery_attempts: u32,
    pub duration_ms: u64,
}

/// Final product of `run_task_graph`. `graph` is the scheduler's private
/// clone; the caller's input graph is never mutated.
#[derive(Debug)]
pub struct RunOutcome {
    pub success: bool,
    pub graph: TaskGraph,
    pub results: HashMap<String, TaskExecutionResult>,
    pub checkpoints: Vec<TaskCheckpoint>,
    pub stats: RunStats,
    pub aborted: bool,
    pub error: Option<String>,
}

impl RunStats {
    pub fn collect(
        graph: &TaskGraph,
        iterations: u64,
        recovery_attempts: u32,
        duration: Duration,
    ) -> Self {
        Self {
            tasks: graph.stats(),
            iterations,
            recovery_attempts,
            duration_ms: duration.as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_constructors() {
        let ok = TaskExecutionResult::success("t1", Some(serde_json::json!({"rows": 3})))
            .with_duration(Duration::from_millis(120));
        assert!(ok.success);
        assert!(ok.error.is_none());
        assert_eq!(ok.duration_ms, 120);

        let failed =
            TaskExecutionResult::failure("t2", TaskError::from_message("connection refused"));
        assert!(!failed.success);
        assert_eq!(failed.error.unwrap().kind, TaskErrorKind::Network);
    }

    #[test]
    fn test_panicked_result_is_unstructured() {
        let result = TaskExecutionResult::panicked("t3");
        assert!(!result.success);
        assert_eq!(result.error.unwrap().kind, TaskErrorKind::Unknown);
    }
}
