// ABOUTME: Main library module for the cairn task graph engine
// ABOUTME: Exports the graph model and execution engine public API

pub mod engine;
pub mod graph;

// Re-export commonly used types
pub use engine::{
    analyze_execution, dry_run, restore_from_checkpoint, rewind, run_task_graph,
    ExecutionAnalysis, RunOptions, RunOutcome, TaskCheckpoint, TaskContext, TaskError,
    TaskErrorKind, TaskExecutionResult, TaskPhase,
};
pub use graph::{
    IdGenerator, PlanSpec, SequentialIdGenerator, Task, TaskGraph, TaskSpec, TaskStatus,
    UuidGenerator, ValidationReport,
};

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
