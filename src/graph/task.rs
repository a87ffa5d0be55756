// ABOUTME: Task node type, status lifecycle, and ID generation
// ABOUTME: Defines the per-task state tracked by the graph and the injected ID source

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Blocked,
    Skipped,
}

impl TaskStatus {
    /// Terminal states count toward progress and are never re-entered by the
    /// scheduler without an explicit reset (retry, rollback, restore).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::Blocked => write!(f, "blocked"),
            TaskStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A single node in the task graph. `dependencies` holds IDs of tasks that
/// must reach `Completed` before this task becomes executable. `subtasks`
/// are carried verbatim for the caller's benefit; the scheduler never
/// interprets them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Task>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: IndexMap<String, serde_json::Value>,
}

pub const DEFAULT_MAX_RETRIES: u32 = 3;

impl Task {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            subtasks: Vec::new(),
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            error: None,
            started_at: None,
            completed_at: None,
            metadata: IndexMap::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Critical tasks are never skipped by recovery, no matter the retry
    /// budget. Marked via `metadata["critical"] = true`.
    pub fn is_critical(&self) -> bool {
        self.metadata
            .get("critical")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Tasks opt out of skip-based recovery with `metadata["can_skip"] = false`.
    pub fn can_skip(&self) -> bool {
        self.metadata
            .get("can_skip")
            .and_then(|v| v.as_bool())
            .unwrap_or(true)
    }

    pub fn has_retries_left(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Wall-clock duration, available only once both timestamps are stamped.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Injected ID source so the graph model carries no process-wide state.
pub trait IdGenerator: Send {
    fn next_id(&mut self) -> String;
}

/// Default generator; random v4 UUIDs.
#[derive(Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn next_id(&mut self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic generator for tests and callers that want stable,
/// human-readable IDs ("task-1", "task-2", ...).
#[derive(Debug)]
pub struct SequentialIdGenerator {
    prefix: String,
    counter: u64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            counter: 0,
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("task")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&mut self) -> String {
        self.counter += 1;
        format!("{}-{}", self.prefix, self.counter)
    }
}
