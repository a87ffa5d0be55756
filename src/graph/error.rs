// ABOUTME: Error types for task graph construction and mutation
// ABOUTME: Defines structural errors surfaced by graph edits and validation

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("task '{task_id}' references unknown dependency '{dependency}'")]
    DependencyNotFound {
        task_id: String,
        dependency: String,
    },

    #[error("task '{task_id}' cannot depend on itself")]
    SelfDependency { task_id: String },

    #[error("dependency already exists: '{task_id}' -> '{dependency}'")]
    DuplicateDependency {
        task_id: String,
        dependency: String,
    },

    #[error("adding '{task_id}' -> '{dependency}' would create a cycle")]
    WouldCreateCycle {
        task_id: String,
        dependency: String,
    },

    #[error("duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: String },
}

/// Structural problems reported by full-graph validation. These are never
/// raised mid-run; callers are expected to validate before scheduling.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    #[error("graph contains no tasks")]
    EmptyGraph,

    #[error("duplicate task id: {task_id}")]
    DuplicateTaskId { task_id: String },

    #[error("task '{task_id}' depends on unknown task '{dependency}'")]
    MissingDependency {
        task_id: String,
        dependency: String,
    },

    #[error("circular dependency detected: {cycle:?}")]
    CircularDependency { cycle: Vec<String> },
}

pub type Result<T> = std::result::Result<T, GraphError>;
