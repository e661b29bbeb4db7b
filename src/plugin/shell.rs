//! Built-in shell task channel.
//!
//! Runs the task's raw script through `sh -c`, with the work directory as
//! the current directory and the worker's environment file sourced first
//! when one is configured.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::context::{ExecutionStatus, Property, TaskExecutionContext};
use crate::error::{Result, WorkerError};
use crate::plugin::{AbstractTask, TaskChannel};

/// Plugin payload carried in `TaskExecutionContext::task_params`.
#[derive(Debug, Deserialize)]
struct ShellParameters {
    raw_script: String,
}

pub struct ShellTaskChannel;

impl TaskChannel for ShellTaskChannel {
    fn create_task(&self, ctx: TaskExecutionContext) -> Arc<dyn AbstractTask> {
        Arc::new(ShellTask::new(ctx))
    }
}

#[derive(Debug, Default)]
struct ShellState {
    script: String,
    process_id: i32,
    exit_code: Option<i32>,
    cancelled: bool,
    var_pool: Vec<Property>,
}

pub struct ShellTask {
    ctx: TaskExecutionContext,
    cancel: CancellationToken,
    state: Mutex<ShellState>,
}

impl ShellTask {
    fn new(ctx: TaskExecutionContext) -> Self {
        Self {
            ctx,
            cancel: CancellationToken::new(),
            state: Mutex::new(ShellState::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ShellState> {
        self.state.lock().expect("shell task state lock poisoned")
    }
}

#[async_trait]
impl AbstractTask for ShellTask {
    async fn init(&self) -> Result<()> {
        let params: ShellParameters = serde_json::from_str(&self.ctx.task_params)
            .map_err(|e| WorkerError::PluginRuntime(format!("invalid shell parameters: {e}")))?;

        let mut script = String::new();
        if !self.ctx.env_file.is_empty() {
            script.push_str(&format!(". {}\n", self.ctx.env_file));
        }
        script.push_str(&params.raw_script);
        self.lock().script = script;

        tracing::info!(
            task_instance_id = self.ctx.task_instance_id,
            "Shell task initialized"
        );
        Ok(())
    }

    async fn handle(&self) -> Result<()> {
        let script = self.lock().script.clone();

        let mut command = Command::new("sh");
        command
            .arg("-c")
            .arg(&script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if !self.ctx.execute_path.is_empty() {
            command.current_dir(&self.ctx.execute_path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| WorkerError::PluginRuntime(format!("failed to spawn shell: {e}")))?;

        let pid = child.id().map(|id| id as i32).unwrap_or(0);
        self.lock().process_id = pid;
        tracing::info!(
            task_instance_id = self.ctx.task_instance_id,
            process_id = pid,
            "Shell task started"
        );

        tokio::select! {
            status = child.wait() => {
                let status = status
                    .map_err(|e| WorkerError::PluginRuntime(format!("failed to wait for shell: {e}")))?;
                let mut state = self.lock();
                state.exit_code = status.code();
                tracing::info!(
                    task_instance_id = self.ctx.task_instance_id,
                    exit_code = ?status.code(),
                    "Shell task finished"
                );
            }
            _ = self.cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(
                        task_instance_id = self.ctx.task_instance_id,
                        error = %e,
                        "Failed to kill shell child process"
                    );
                }
                let _ = child.wait().await;
                self.lock().cancelled = true;
                tracing::info!(
                    task_instance_id = self.ctx.task_instance_id,
                    "Shell task cancelled"
                );
            }
        }
        Ok(())
    }

    async fn cancel_application(&self, _force: bool) -> Result<()> {
        self.cancel.cancel();
        Ok(())
    }

    fn exit_status(&self) -> ExecutionStatus {
        let state = self.lock();
        if state.cancelled {
            ExecutionStatus::Kill
        } else if state.exit_code == Some(0) {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failure
        }
    }

    fn process_id(&self) -> i32 {
        self.lock().process_id
    }

    fn app_ids(&self) -> String {
        String::new()
    }

    fn seed_var_pool(&self, vars: Vec<Property>) {
        self.lock().var_pool = vars;
    }

    fn var_pool(&self) -> Vec<Property> {
        self.lock().var_pool.clone()
    }
}
