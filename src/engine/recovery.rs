// ABOUTME: Failure recovery policy: error classification and strategy selection/application
// ABOUTME: Maps a failed task plus its error onto retry, skip, rollback, escalate, or abort

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::Result;
use crate::graph::{Task, TaskGraph, TaskStatus};

/// Closed set of failure classes. Executors should classify their own
/// failures; `classify` is the fallback for opaque third-party messages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskErrorKind {
    Network,
    RateLimit,
    NotFound,
    Permission,
    ResourceExhaustion,
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskError {
    pub kind: TaskErrorKind,
    pub message: String,
}

impl TaskError {
    pub fn new(kind: TaskErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Classify an opaque message by pattern matching.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: TaskErrorKind::classify(&message),
            message,
        }
    }
}

impl std::fmt::Display for TaskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl TaskErrorKind {
    /// Ordered pattern table; the first matching pattern wins.
    pub fn classify(message: &str) -> TaskErrorKind {
        static PATTERNS: OnceLock<Vec<(Regex, TaskErrorKind)>> = OnceLock::new();
        let patterns = PATTERNS.get_or_init(|| {
            [
                (
                    r"(?i)timed?[ _-]?out|ETIMEDOUT|ECONNREFUSED|ECONNRESET|network|connection",
                    TaskErrorKind::Network,
                ),
                (
                    r"(?i)rate.?limit|too many requests|\b429\b",
                    TaskErrorKind::RateLimit,
                ),
                (
                    r"(?i)not.?found|\b404\b|ENOENT|no such",
                    TaskErrorKind::NotFound,
                ),
                (
                    r"(?i)permission|unauthorized|forbidden|access denied|EACCES|\b401\b|\b403\b",
                    TaskErrorKind::Permission,
                ),
                (
                    r"(?i)out of memory|\bOOM\b|ENOMEM|resource exhaust|heap limit",
                    TaskErrorKind::ResourceExhaustion,
                ),
                (
                    r"(?i)syntax|parse error|validation|invalid",
                    TaskErrorKind::Validation,
                ),
            ]
            .into_iter()
            .map(|(pattern, kind)| {
                // Patterns are static literals; compilation cannot fail.
                (Regex::new(pattern).unwrap(), kind)
            })
            .collect()
        });

        patterns
            .iter()
            .find(|(re, _)| re.is_match(message))
            .map(|(_, kind)| *kind)
            .unwrap_or(TaskErrorKind::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    Retry {
        backoff: Duration,
        max_attempts: u32,
    },
    Skip {
        block_dependents: bool,
    },
    Rollback {
        checkpoint_task: String,
    },
    Escalate {
        message: String,
    },
    Abort {
        reason: String,
    },
}

impl RecoveryAction {
    pub fn kind(&self) -> &'static str {
        match self {
            RecoveryAction::Retry { .. } => "retry",
            RecoveryAction::Skip { .. } => "skip",
            RecoveryAction::Rollback { .. } => "rollback",
            RecoveryAction::Escalate { .. } => "escalate",
            RecoveryAction::Abort { .. } => "abort",
        }
    }
}

/// Computed fresh on every recovery attempt; never persisted.
#[derive(Debug, Clone)]
pub struct RecoveryDecision {
    pub task_id: String,
    pub action: RecoveryAction,
    pub reason: String,
    pub previously_attempted: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// Whether graph state changed.
    pub applied: bool,
    /// Whether the run loop may keep scheduling after this recovery.
    pub can_continue: bool,
}

const METADATA_RECOVERY_ATTEMPTS: &str = "recovery_attempts";

fn exponential_ms(base_ms: u64, retry_count: u32, cap_ms: u64) -> Duration {
    let factor = 1u64 << retry_count.min(16);
    Duration::from_millis(base_ms.saturating_mul(factor).min(cap_ms))
}

/// Select a recovery strategy for a failed task. Returns `None` when the
/// task is unrecoverable: retry budget spent and skipping is forbidden.
pub fn select_recovery(
    task: &Task,
    error: &TaskError,
    _graph: &TaskGraph,
) -> Option<RecoveryDecision> {
    let previously_attempted = task
        .metadata
        .get(METADATA_RECOVERY_ATTEMPTS)
        .and_then(|v| v.as_array())
        .map(|attempts| {
            attempts
                .iter()
                .filter_map(|a| a.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    if !task.has_retries_left() {
        if task.is_critical() || !task.can_skip() {
            warn!(task_id = %task.id, "retry budget exhausted and task cannot be skipped");
            return None;
        }
        return Some(RecoveryDecision {
            task_id: task.id.clone(),
            action: RecoveryAction::Skip {
                block_dependents: true,
            },
            reason: format!(
                "retry budget exhausted ({}/{})",
                task.retry_count, task.max_retries
            ),
            previously_attempted,
        });
    }

    let kind = match error.kind {
        TaskErrorKind::Unknown => TaskErrorKind::classify(&error.message),
        kind => kind,
    };

    let (action, reason) = match kind {
        TaskErrorKind::Network => (
            RecoveryAction::Retry {
                backoff: exponential_ms(2_000, task.retry_count, 10_000),
                max_attempts: task.max_retries,
            },
            "transient network failure, retrying with backoff".to_string(),
        ),
        TaskErrorKind::RateLimit => (
            RecoveryAction::Retry {
                backoff: exponential_ms(5_000, task.retry_count, 30_000),
                max_attempts: task.max_retries,
            },
            "rate limited, retrying with longer backoff".to_string(),
        ),
        TaskErrorKind::NotFound => (
            RecoveryAction::Skip {
                block_dependents: true,
            },
            "referenced resource is missing, skipping and blocking dependents".to_string(),
        ),
        TaskErrorKind::Permission => (
            RecoveryAction::Escalate {
                message: format!("permission denied: {}", error.message),
            },
            "permission failure requires external intervention".to_string(),
        ),
        TaskErrorKind::ResourceExhaustion => (
            RecoveryAction::Abort {
                reason: format!("resource exhaustion: {}", error.message),
            },
            "resource exhaustion, aborting the plan".to_string(),
        ),
        TaskErrorKind::Validation => (
            RecoveryAction::Skip {
                block_dependents: true,
            },
            "validation failure will not resolve by retrying".to_string(),
        ),
        TaskErrorKind::Unknown => (
            RecoveryAction::Retry {
                backoff: exponential_ms(1_000, task.retry_count, 30_000),
                max_attempts: task.max_retries,
            },
            "unclassified failure, retrying with default backoff".to_string(),
        ),
    };

    Some(RecoveryDecision {
        task_id: task.id.clone(),
        action,
        reason,
        previously_attempted,
    })
}

/// Apply a recovery decision to the graph.
pub async fn execute_recovery(
    graph: &mut TaskGraph,
    decision: &RecoveryDecision,
) -> Result<RecoveryOutcome> {
    info!(
        task_id = %decision.task_id,
        strategy = decision.action.kind(),
        reason = %decision.reason,
        "applying recovery"
    );
    record_attempt(graph, &decision.task_id, decision.action.kind());

    match &decision.action {
        RecoveryAction::Retry {
            backoff,
            max_attempts,
        } => {
            let retry_count = graph
                .get(&decision.task_id)
                .map(|t| t.retry_count)
                .unwrap_or(u32::MAX);
            if retry_count >= *max_attempts {
                return Ok(RecoveryOutcome {
                    applied: false,
                    can_continue: false,
                });
            }
            sleep(*backoff).await;
            if let Some(task) = graph.tasks.get_mut(&decision.task_id) {
                task.retry_count += 1;
            }
            graph.update_status(&decision.task_id, TaskStatus::Pending, None)?;
            // Dependents blocked by this failure become runnable again,
            // unless another dependency still holds them back.
            for id in graph.transitive_dependents(&decision.task_id) {
                let unblock = graph.get(&id).map_or(false, |t| {
                    t.status == TaskStatus::Blocked
                        && t.dependencies.iter().all(|d| {
                            graph.get(d).map_or(true, |dep| {
                                !matches!(
                                    dep.status,
                                    TaskStatus::Failed | TaskStatus::Skipped | TaskStatus::Blocked
                                )
                            })
                        })
                });
                if unblock {
                    graph.update_status(&id, TaskStatus::Pending, None)?;
                }
            }
            Ok(RecoveryOutcome {
                applied: true,
                can_continue: true,
            })
        }
        RecoveryAction::Skip { block_dependents } => {
            graph.update_status(&decision.task_id, TaskStatus::Skipped, None)?;
            if *block_dependents {
                for dependent in graph.direct_dependents(&decision.task_id) {
                    graph.update_status(&dependent, TaskStatus::Blocked, None)?;
                }
            }
            Ok(RecoveryOutcome {
                applied: true,
                can_continue: true,
            })
        }
        RecoveryAction::Rollback { checkpoint_task } => {
            // Resets dependent task states only; previously captured outputs
            // are not restored.
            let dependents = graph.transitive_dependents(checkpoint_task);
            let applied = !dependents.is_empty();
            for id in dependents {
                graph.update_status(&id, TaskStatus::Pending, None)?;
            }
            Ok(RecoveryOutcome {
                applied,
                can_continue: true,
            })
        }
        RecoveryAction::Escalate { message } => {
            graph.update_status(&decision.task_id, TaskStatus::Blocked, None)?;
            if let Some(task) = graph.tasks.get_mut(&decision.task_id) {
                task.metadata.insert(
                    "escalation".to_string(),
                    serde_json::json!({
                        "message": message,
                        "at": chrono::Utc::now().to_rfc3339(),
                    }),
                );
            }
            Ok(RecoveryOutcome {
                applied: true,
                can_continue: false,
            })
        }
        RecoveryAction::Abort { reason } => {
            let to_block: Vec<String> = graph
                .tasks
                .values()
                .filter(|t| {
                    matches!(t.status, TaskStatus::Pending | TaskStatus::InProgress)
                })
                .map(|t| t.id.clone())
                .collect();
            for id in to_block {
                graph.update_status(&id, TaskStatus::Blocked, None)?;
            }
            if let Some(task) = graph.tasks.get_mut(&decision.task_id) {
                task.metadata.insert(
                    "abort_reason".to_string(),
                    serde_json::Value::String(reason.clone()),
                );
            }
            Ok(RecoveryOutcome {
                applied: true,
                can_continue: false,
            })
        }
    }
}

fn record_attempt(graph: &mut TaskGraph, task_id: &str, strategy: &str) {
    if let Some(task) = graph.tasks.get_mut(task_id) {
        let attempts = task
            .metadata
            .entry(METADATA_RECOVERY_ATTEMPTS.to_string())
            .or_insert_with(|| serde_json::Value::Array(Vec::new()));
        if let Some(list) = attempts.as_array_mut() {
            list.push(serde_json::Value::String(strategy.to_string()));
        }
    }
}
