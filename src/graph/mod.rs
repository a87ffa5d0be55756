// ABOUTME: Task graph model module: tasks, dependency edges, validation, stats
// ABOUTME: Pure in-memory data structure; no I/O and no scheduling logic

pub mod error;
pub mod model;
pub mod task;
pub mod validate;

pub use error::{GraphError, ValidationIssue};
pub use model::{GraphStats, PlanSpec, TaskGraph, TaskSpec};
pub use task::{
    IdGenerator, SequentialIdGenerator, Task, TaskStatus, UuidGenerator, DEFAULT_MAX_RETRIES,
};
pub use validate::ValidationReport;
