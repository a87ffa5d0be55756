// ABOUTME: Error types for the execution engine
// ABOUTME: Covers run misconfiguration, planning failures, and graph error passthrough

use thiserror::Error;

use crate::graph::GraphError;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid run configuration: {0}")]
    Configuration(String),

    #[error("circular dependency prevents execution planning: {tasks:?}")]
    CircularDependency { tasks: Vec<String> },

    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("no checkpoint available {steps_back} steps back (history has {available})")]
    NoSuchCheckpoint { steps_back: usize, available: usize },

    #[error(transparent)]
    Graph(#[from] GraphError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
