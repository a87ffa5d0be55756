// ABOUTME: Per-task execution context handed to the caller-supplied executor
// ABOUTME: Carries a graph snapshot, prior results, the latest checkpoint, and the cancel token

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::checkpoint::TaskCheckpoint;
use super::result::TaskExecutionResult;
use crate::graph::TaskGraph;

/// Read-only view handed to the executor callback for one task attempt.
/// The graph snapshot reflects the state at launch time, with the launched
/// batch (this task included) already marked in-progress; results for tasks
/// settling concurrently are not visible until the executor's own task
/// relaunches.
#[derive(Clone)]
pub struct TaskContext {
    pub run_id: String,
    pub goal: String,
    pub graph: Arc<TaskGraph>,
    pub checkpoint: Option<TaskCheckpoint>,
    pub previous_results: Arc<HashMap<String, TaskExecutionResult>>,
    /// Executors must observe this token for prompt termination; the run
    /// loop only stops scheduling new work when it fires.
    pub cancel: CancellationToken,
}

impl TaskContext {
    pub fn result_for(&self, task_id: &str) -> Option<&TaskExecutionResult> {
        self.previous_results.get(task_id)
    }

    pub fn output_for(&self, task_id: &str) -> Option<&serde_json::Value> {
        self.result_for(task_id).and_then(|r| r.output.as_ref())
    }
}

impl std::fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskContext")
            .field("run_id", &self.run_id)
            .field("goal", &self.goal)
            .field("previous_results", &self.previous_results.len())
            .finish()
    }
}
