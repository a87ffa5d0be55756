// ABOUTME: Execution engine module: analysis, scheduling, recovery, checkpointing
// ABOUTME: Drives a task graph to completion through an injected executor callback

pub mod analyzer;
pub mod checkpoint;
pub mod context;
pub mod error;
pub mod recovery;
pub mod result;
pub mod scheduler;

pub use analyzer::{analyze_execution, dry_run, ExecutionAnalysis};
pub use checkpoint::{
    backtrack_point, backtrack_points, capture_checkpoint, restore_from_checkpoint, rewind,
    BacktrackPoint, CheckpointState, TaskCheckpoint,
};
pub use context::TaskContext;
pub use error::{EngineError, Result};
pub use recovery::{
    execute_recovery, select_recovery, RecoveryAction, RecoveryDecision, RecoveryOutcome,
    TaskError, TaskErrorKind,
};
pub use result::{RunOutcome, RunStats, TaskExecutionResult, TaskPhase};
pub use scheduler::{run_task_graph, CheckpointSink, ProgressCallback, RunOptions};
