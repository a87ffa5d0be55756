// ABOUTME: The run loop: bounded-parallelism scheduling, race-based settling, recovery, checkpoints
// ABOUTME: Clones the input graph and drives it to completion via the injected executor callback

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::analyzer::analyze_execution;
use super::checkpoint::{capture_checkpoint, TaskCheckpoint};
use super::context::TaskContext;
use super::error::{EngineError, Result};
use super::recovery::{execute_recovery, select_recovery, TaskError, TaskErrorKind};
use super::result::{RunOutcome, RunStats, TaskExecutionResult, TaskPhase};
use crate::graph::{TaskGraph, TaskStatus, UuidGenerator};

pub type ProgressCallback = Arc<dyn Fn(&str, TaskPhase, Option<&str>) + Send + Sync>;
/// Best-effort sink for periodic checkpoints; failures inside the sink are
/// the sink's problem, not the run's.
pub type CheckpointSink = Arc<dyn Fn(&TaskCheckpoint) + Send + Sync>;

pub struct RunOptions {
    pub max_parallel: usize,
    pub enable_checkpoints: bool,
    /// Checkpoint cadence in run-loop iterations.
    pub checkpoint_interval: u64,
    pub on_progress: Option<ProgressCallback>,
    pub on_checkpoint: Option<CheckpointSink>,
    pub cancel: Option<CancellationToken>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            max_parallel: 3,
            enable_checkpoints: true,
            checkpoint_interval: 5,
            on_progress: None,
            on_checkpoint: None,
            cancel: None,
        }
    }
}

impl RunOptions {
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: u64) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn without_checkpoints(mut self) -> Self {
        self.enable_checkpoints = false;
        self
    }

    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, TaskPhase, Option<&str>) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(callback));
        self
    }

    pub fn with_checkpoint_sink<F>(mut self, sink: F) -> Self
    where
        F: Fn(&TaskCheckpoint) + Send + Sync + 'static,
    {
        self.on_checkpoint = Some(Arc::new(sink));
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

struct RecoveryRound {
    changed: bool,
    can_continue: bool,
    attempts: u32,
}

/// Run the graph to completion (or stall) with bounded logical parallelism.
///
/// The input graph is cloned up front; the run owns its copy exclusively and
/// hands it back in the outcome. Up to `max_parallel` executor futures are
/// in flight at once; the loop re-evaluates after each individual settle
/// (race, not join-all). Executor panics are caught and become failed
/// results. Cancellation stops new scheduling; in-flight work is awaited,
/// relying on the executor to observe the shared token.
#[instrument(skip_all, fields(graph_id = %graph.id, tasks = graph.tasks.len()))]
pub async fn run_task_graph<F, Fut>(
    graph: &TaskGraph,
    options: RunOptions,
    executor: F,
) -> Result<RunOutcome>
where
    F: Fn(crate::graph::Task, TaskContext) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = TaskExecutionResult> + Send + 'static,
{
    if options.max_parallel == 0 {
        return Err(EngineError::Configuration(
            "max_parallel must be at least 1".to_string(),
        ));
    }

    let started = Instant::now();
    let mut graph = graph.clone();
    let mut ids = UuidGenerator;
    let run_id = uuid::Uuid::new_v4().to_string();
    let cancel = options.cancel.clone().unwrap_or_default();

    let mut results: HashMap<String, TaskExecutionResult> = HashMap::new();
    let mut checkpoints: Vec<TaskCheckpoint> = Vec::new();
    let mut inflight: FuturesUnordered<BoxFuture<'static, (String, TaskExecutionResult)>> =
        FuturesUnordered::new();
    let mut iterations: u64 = 0;
    let mut recovery_attempts: u32 = 0;
    let mut aborted = false;
    let mut stall: Option<String> = None;
    let mut last_settled: Option<String> = None;

    info!(run_id = %run_id, goal = %graph.goal, "starting task graph run");

    loop {
        if cancel.is_cancelled() {
            aborted = true;
            break;
        }
        iterations += 1;

        let analysis = analyze_execution(&graph);
        if analysis.is_complete {
            break;
        }

        if !analysis.can_continue && inflight.is_empty() {
            let round = attempt_recovery(&mut graph, &results).await?;
            recovery_attempts += round.attempts;
            if round.changed && round.can_continue {
                continue;
            }
            stall = Some(if round.attempts > 0 && !round.can_continue {
                "recovery requires external intervention".to_string()
            } else {
                "no executable tasks and recovery made no progress".to_string()
            });
            break;
        }

        let capacity = options.max_parallel.saturating_sub(inflight.len());
        let to_launch: Vec<String> = analysis.executable.iter().take(capacity).cloned().collect();
        if !to_launch.is_empty() {
            // The whole batch transitions first so the snapshot handed to
            // each executor shows itself and its peers as in-progress.
            for task_id in &to_launch {
                notify(&options, task_id, TaskPhase::Starting, None);
                graph.update_status(task_id, TaskStatus::InProgress, None)?;
            }
            let snapshot = Arc::new(graph.clone());
            let prev = Arc::new(results.clone());
            for task_id in &to_launch {
                let task =
                    graph
                        .get(task_id)
                        .cloned()
                        .ok_or_else(|| EngineError::TaskNotFound {
                            task_id: task_id.clone(),
                        })?;
                let ctx = TaskContext {
                    run_id: run_id.clone(),
                    goal: graph.goal.clone(),
                    graph: Arc::clone(&snapshot),
                    checkpoint: checkpoints.last().cloned(),
                    previous_results: Arc::clone(&prev),
                    cancel: cancel.clone(),
                };
                let id = task_id.clone();
                let fut = executor(task, ctx);
                inflight.push(Box::pin(async move {
                    let attempt_started = Instant::now();
                    match AssertUnwindSafe(fut).catch_unwind().await {
                        Ok(mut result) => {
                            // Executors that timed themselves keep their number.
                            if result.duration_ms == 0 {
                                result = result.with_duration(attempt_started.elapsed());
                            }
                            (id, result)
                        }
                        Err(_) => {
                            let result = TaskExecutionResult::panicked(id.clone())
                                .with_duration(attempt_started.elapsed());
                            (id, result)
                        }
                    }
                }));
                notify(&options, task_id, TaskPhase::InProgress, None);
            }
            debug!(
                launched = to_launch.len(),
                in_flight = inflight.len(),
                "scheduled executable tasks"
            );
        }

        if inflight.is_empty() {
            // The analysis promised runnable work but nothing launched;
            // avoid spinning.
            stall = Some("in-progress tasks exist with no in-flight futures".to_string());
            warn!("run loop stalled with inconsistent in-progress state");
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                aborted = true;
                break;
            }
            settled = inflight.next() => {
                if let Some((task_id, result)) = settled {
                    apply_settle(&mut graph, &options, &mut results, &task_id, result)?;
                    last_settled = Some(task_id);
                }
            }
        }

        if options.enable_checkpoints
            && options.checkpoint_interval > 0
            && iterations % options.checkpoint_interval == 0
        {
            if let Some(trigger) = &last_settled {
                let cp = capture_checkpoint(&graph, &results, trigger, &mut ids);
                if let Some(sink) = &options.on_checkpoint {
                    sink(&cp);
                }
                checkpoints.push(cp);
            }
        }
    }

    if aborted {
        info!("cancellation requested; waiting for in-flight tasks to settle");
        while let Some((task_id, result)) = inflight.next().await {
            apply_settle(&mut graph, &options, &mut results, &task_id, result)?;
        }
    }

    let analysis = analyze_execution(&graph);
    let success = !aborted && analysis.is_complete && analysis.failed.is_empty();
    let stats = RunStats::collect(&graph, iterations, recovery_attempts, started.elapsed());
    info!(
        success,
        aborted,
        iterations,
        completed = stats.tasks.completed,
        failed = stats.tasks.failed,
        "task graph run finished"
    );

    Ok(RunOutcome {
        success,
        graph,
        results,
        checkpoints,
        stats,
        aborted,
        error: stall,
    })
}

fn apply_settle(
    graph: &mut TaskGraph,
    options: &RunOptions,
    results: &mut HashMap<String, TaskExecutionResult>,
    task_id: &str,
    result: TaskExecutionResult,
) -> Result<()> {
    let (status, phase) = if result.success {
        (TaskStatus::Completed, TaskPhase::Completed)
    } else {
        (TaskStatus::Failed, TaskPhase::Failed)
    };
    let message = result.error.as_ref().map(|e| e.message.clone());
    graph.update_status(task_id, status, message.clone())?;
    notify(options, task_id, phase, message.as_deref());
    results.insert(task_id.to_string(), result);
    Ok(())
}

fn notify(options: &RunOptions, task_id: &str, phase: TaskPhase, message: Option<&str>) {
    if let Some(callback) = &options.on_progress {
        callback(task_id, phase, message);
    }
}

/// One recovery pass over the currently failed tasks. Strategy sleeps
/// (retry backoff) happen inline; the loop is not scheduling anything else
/// while stuck, so there is nothing to starve.
async fn attempt_recovery(
    graph: &mut TaskGraph,
    results: &HashMap<String, TaskExecutionResult>,
) -> Result<RecoveryRound> {
    let failed: Vec<String> = graph
        .tasks
        .values()
        .filter(|t| t.status == TaskStatus::Failed)
        .map(|t| t.id.clone())
        .collect();

    let mut round = RecoveryRound {
        changed: false,
        can_continue: true,
        attempts: 0,
    };

    for id in failed {
        let Some(task) = graph.get(&id).cloned() else {
            continue;
        };
        let error = results
            .get(&id)
            .and_then(|r| r.error.clone())
            .or_else(|| task.error.clone().map(TaskError::from_message))
            .unwrap_or_else(|| {
                TaskError::new(TaskErrorKind::Unknown, "task failed without error detail")
            });

        match select_recovery(&task, &error, graph) {
            Some(decision) => {
                round.attempts += 1;
                let outcome = execute_recovery(graph, &decision).await?;
                round.changed |= outcome.applied;
                if !outcome.can_continue {
                    round.can_continue = false;
                    break;
                }
            }
            None => {
                warn!(task_id = %id, "task is unrecoverable");
            }
        }
    }
    Ok(round)
}
