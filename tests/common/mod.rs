// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides plan builders and canned executor callbacks

#![allow(dead_code)]

use std::sync::Once;

use futures::future::BoxFuture;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use cairn::engine::{TaskContext, TaskError, TaskExecutionResult};
use cairn::graph::{PlanSpec, SequentialIdGenerator, Task, TaskGraph, TaskSpec};

static TRACING: Once = Once::new();

/// Opt-in log output for test debugging: `RUST_LOG=cairn=debug cargo test`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct TestPlanBuilder {
    goal: String,
    tasks: Vec<TaskSpec>,
}

impl TestPlanBuilder {
    pub fn new(goal: &str) -> Self {
        init_tracing();
        Self {
            goal: goal.to_string(),
            tasks: Vec::new(),
        }
    }

    pub fn task(mut self, id: &str, deps: &[&str]) -> Self {
        self.tasks.push(TaskSpec {
            description: format!("test task {}", id),
            id: Some(id.to_string()),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..TaskSpec::default()
        });
        self
    }

    pub fn task_with_retries(mut self, id: &str, deps: &[&str], max_retries: u32) -> Self {
        self.tasks.push(TaskSpec {
            description: format!("test task {}", id),
            id: Some(id.to_string()),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            max_retries: Some(max_retries),
            ..TaskSpec::default()
        });
        self
    }

    pub fn task_with_metadata(
        mut self,
        id: &str,
        deps: &[&str],
        metadata: &[(&str, serde_json::Value)],
    ) -> Self {
        self.tasks.push(TaskSpec {
            description: format!("test task {}", id),
            id: Some(id.to_string()),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            metadata: metadata
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            ..TaskSpec::default()
        });
        self
    }

    pub fn build(self) -> TaskGraph {
        let mut ids = SequentialIdGenerator::default();
        TaskGraph::from_plan(
            PlanSpec {
                goal: self.goal,
                tasks: self.tasks,
            },
            &mut ids,
        )
        .expect("test plan builds")
    }
}

pub type TestFuture = BoxFuture<'static, TaskExecutionResult>;

/// Executor that succeeds every task, echoing its description as output.
pub fn succeed_all() -> impl Fn(Task, TaskContext) -> TestFuture + Clone + Send + Sync {
    |task: Task, _ctx: TaskContext| {
        Box::pin(async move {
            let output = json!({ "echo": task.description });
            TaskExecutionResult::success(task.id, Some(output))
        }) as TestFuture
    }
}

/// Executor that always fails `target` with the given error message and
/// succeeds everything else.
pub fn fail_task(
    target: &str,
    message: &str,
) -> impl Fn(Task, TaskContext) -> TestFuture + Clone + Send + Sync {
    let target = target.to_string();
    let message = message.to_string();
    move |task: Task, _ctx: TaskContext| {
        let target = target.clone();
        let message = message.clone();
        Box::pin(async move {
            if task.id == target {
                TaskExecutionResult::failure(task.id, TaskError::from_message(message))
            } else {
                TaskExecutionResult::success(task.id, None)
            }
        }) as TestFuture
    }
}

/// Executor that fails `target` while its retry count is below `failures`,
/// then succeeds. Relies on the scheduler handing each attempt the task's
/// current retry count.
pub fn flaky_task(
    target: &str,
    failures: u32,
    message: &str,
) -> impl Fn(Task, TaskContext) -> TestFuture + Clone + Send + Sync {
    let target = target.to_string();
    let message = message.to_string();
    move |task: Task, _ctx: TaskContext| {
        let target = target.clone();
        let message = message.clone();
        Box::pin(async move {
            if task.id == target && task.retry_count < failures {
                TaskExecutionResult::failure(task.id, TaskError::from_message(message))
            } else {
                TaskExecutionResult::success(task.id, None)
            }
        }) as TestFuture
    }
}
