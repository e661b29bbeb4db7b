//! Task plugin contract and registry.
//!
//! A [`TaskChannel`] is the factory for one task type (shell, SQL, ...).
//! It produces an [`AbstractTask`] bound to a single execution context.
//! The runner drives the task through `init` -> `handle` and reads the
//! outcome through the remaining accessors.
//!
//! Tasks must tolerate `cancel_application` being invoked from another
//! executor while `handle` is still pending, so every implementation keeps
//! its mutable state behind interior mutability.

pub mod shell;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{ExecutionStatus, Property, TaskExecutionContext};
use crate::error::Result;

pub use shell::ShellTaskChannel;

/// Alert payload attached to a finished task when the plugin requests one.
#[derive(Debug, Clone)]
pub struct TaskAlertInfo {
    pub alert_group_id: i32,
    pub title: String,
    pub content: String,
}

/// A single executable task instance produced by a [`TaskChannel`].
#[async_trait]
pub trait AbstractTask: Send + Sync {
    /// Prepare the task for execution (write scripts, validate params, ...).
    async fn init(&self) -> Result<()>;

    /// Execute the task. Resolves when the underlying process or remote job
    /// completes or has been cancelled.
    async fn handle(&self) -> Result<()>;

    /// Cancel a pending `handle`. Idempotent; must cause `handle` to return.
    async fn cancel_application(&self, force: bool) -> Result<()>;

    /// Terminal status after `handle` has returned.
    fn exit_status(&self) -> ExecutionStatus;

    /// Native pid of the spawned subprocess, 0 when none was spawned.
    fn process_id(&self) -> i32;

    /// Comma-separated external application ids, empty when none.
    fn app_ids(&self) -> String;

    /// Install the inbound variable pool before `handle` runs.
    fn seed_var_pool(&self, vars: Vec<Property>);

    /// Outbound variable pool after `handle` has returned.
    fn var_pool(&self) -> Vec<Property>;

    fn need_alert(&self) -> bool {
        false
    }

    fn alert_info(&self) -> Option<TaskAlertInfo> {
        None
    }
}

/// Factory producing a concrete task for a given execution context.
pub trait TaskChannel: Send + Sync {
    fn create_task(&self, ctx: TaskExecutionContext) -> Arc<dyn AbstractTask>;
}

/// Registry mapping task types to their channels. Built once at startup.
#[derive(Default)]
pub struct TaskPluginRegistry {
    channels: HashMap<String, Arc<dyn TaskChannel>>,
}

impl TaskPluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, task_type: impl Into<String>, channel: Arc<dyn TaskChannel>) {
        let task_type = task_type.into();
        tracing::info!(task_type, "Task plugin registered");
        self.channels.insert(task_type, channel);
    }

    pub fn channel(&self, task_type: &str) -> Option<Arc<dyn TaskChannel>> {
        self.channels.get(task_type).cloned()
    }

    pub fn task_types(&self) -> Vec<&str> {
        self.channels.keys().map(String::as_str).collect()
    }
}
