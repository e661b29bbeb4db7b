//! Per-task state machine.
//!
//! A [`TaskRunner`] drives one [`TaskExecutionContext`] through its whole
//! lifecycle: dry-run short circuit, RUNNING callback, resource staging,
//! parameter binding, plugin execution, RESULT callback and work-directory
//! cleanup. The terminal RESULT message is always dispatched, whatever
//! happened before it.
//!
//! A runner is executed by exactly one worker-pool slot. [`TaskRunner::kill`]
//! is the only entry point that may be invoked concurrently with a running
//! task; it is idempotent and never panics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::context::{ExecutionStatus, Property, TaskContextCache, TaskExecutionContext};
use crate::error::{Result, WorkerError};
use crate::plugin::{AbstractTask, TaskPluginRegistry};
use crate::reporter::{MessageKind, StatusReporter};
use crate::storage::ApplicationManager;
use crate::worker::params;
use crate::worker::resources::ResourceStager;
use crate::worker::workdir;

/// Collaborators shared by every runner on this worker.
pub struct WorkerServices {
    pub config: WorkerConfig,
    pub reporter: StatusReporter,
    pub registry: TaskPluginRegistry,
    pub stager: ResourceStager,
    pub app_manager: Arc<dyn ApplicationManager>,
    pub cache: Arc<TaskContextCache>,
}

pub struct TaskRunner {
    ctx: Mutex<TaskExecutionContext>,
    task: Mutex<Option<Arc<dyn AbstractTask>>>,
    killed: AtomicBool,
    services: Arc<WorkerServices>,
}

impl TaskRunner {
    pub fn new(ctx: TaskExecutionContext, services: Arc<WorkerServices>) -> Self {
        Self {
            ctx: Mutex::new(ctx),
            task: Mutex::new(None),
            killed: AtomicBool::new(false),
            services,
        }
    }

    fn ctx(&self) -> MutexGuard<'_, TaskExecutionContext> {
        self.ctx.lock().expect("task context lock poisoned")
    }

    fn current_task(&self) -> Option<Arc<dyn AbstractTask>> {
        self.task.lock().expect("task slot lock poisoned").clone()
    }

    pub fn task_instance_id(&self) -> i32 {
        self.ctx().task_instance_id
    }

    /// Snapshot of the current execution context.
    pub fn context(&self) -> TaskExecutionContext {
        self.ctx().clone()
    }

    /// Execute the task to completion. Driven by a single worker-pool slot.
    pub async fn run(&self) {
        let (process_instance_id, task_instance_id) = {
            let ctx = self.ctx();
            (ctx.process_instance_id, ctx.task_instance_id)
        };
        let span = tracing::info_span!(
            "task",
            process_instance_id,
            task_instance_id,
            task_log_name = tracing::field::Empty
        );
        self.run_inner().instrument(span).await;
    }

    async fn run_inner(&self) {
        if self.ctx().dry_run {
            self.dry_run().await;
            return;
        }

        if let Err(e) = self.execute().await {
            tracing::error!(error = %e, "Task execution failure");
            self.kill().await;
            let partial_task = self.current_task();
            let mut ctx = self.ctx();
            ctx.current_execution_status = ExecutionStatus::Failure;
            ctx.end_time = Some(Utc::now());
            if let Some(task) = partial_task {
                ctx.process_id = task.process_id();
                ctx.app_ids = task.app_ids();
            }
        }

        self.finalize().await;
    }

    /// Dry-run short circuit: report success without staging resources or
    /// invoking any plugin.
    async fn dry_run(&self) {
        let snapshot = {
            let mut ctx = self.ctx();
            let now = Utc::now();
            ctx.current_execution_status = ExecutionStatus::Success;
            ctx.start_time = Some(now);
            ctx.end_time = Some(now);
            ctx.clone()
        };
        self.services.cache.remove(snapshot.task_instance_id);
        self.services
            .reporter
            .send_with_retry(&snapshot, MessageKind::TaskExecuteResult)
            .await;
        tracing::info!("Task dry run success");
    }

    async fn execute(&self) -> Result<()> {
        let running_snapshot = {
            let mut ctx = self.ctx();
            if ctx.start_time.is_none() {
                ctx.start_time = Some(Utc::now());
            }
            ctx.current_execution_status = ExecutionStatus::RunningExecution;
            ctx.clone()
        };
        tracing::info!(execute_path = %running_snapshot.execute_path, "Task begins to execute");
        self.services
            .reporter
            .send_with_retry(&running_snapshot, MessageKind::TaskExecuteRunning)
            .await;

        // stage remote resources into the work directory
        let downloads = self
            .services
            .stager
            .plan_downloads(&running_snapshot.execute_path, &running_snapshot.resources)?;
        self.services
            .stager
            .download(&running_snapshot.execute_path, &downloads)
            .await?;

        // a kill that arrived while no task instance existed yet only set
        // the flag; honor it before creating one
        if self.killed.load(Ordering::SeqCst) {
            return Err(WorkerError::Killed);
        }

        let task_type = {
            let mut ctx = self.ctx();
            ctx.env_file = self.services.config.system_env_path.clone();
            ctx.defined_params = params::build_global_params_map(ctx.global_params.as_deref());
            ctx.task_app_id = ctx.derive_task_app_id();
            ctx.params_map = params::pre_build_business_params(ctx.schedule_time);
            ctx.task_type.clone()
        };

        let channel = self
            .services
            .registry
            .channel(&task_type)
            .ok_or(WorkerError::PluginNotFound(task_type))?;

        let ctx_for_task = {
            let mut ctx = self.ctx();
            ctx.task_log_name = ctx.derive_task_log_name();
            ctx.clone()
        };
        tracing::Span::current().record("task_log_name", ctx_for_task.task_log_name.as_str());

        let task = channel.create_task(ctx_for_task);
        *self.task.lock().expect("task slot lock poisoned") = Some(task.clone());

        // re-check after storing the task: a kill that ran before the store
        // found no task to cancel
        if self.killed.load(Ordering::SeqCst) {
            return Err(WorkerError::Killed);
        }

        task.init().await?;

        if let Some(var_pool_json) = self.ctx().var_pool.clone() {
            let vars: Vec<Property> = serde_json::from_str(&var_pool_json).unwrap_or_default();
            task.seed_var_pool(vars);
        }

        // blocks until the underlying process or remote job completes
        task.handle().await?;

        if task.need_alert() {
            if let Some(info) = task.alert_info() {
                self.services.reporter.alert(&info, task.exit_status()).await;
            }
        }

        let var_pool_json = serde_json::to_string(&task.var_pool())?;
        let (task_instance_id, status) = {
            let mut ctx = self.ctx();
            let exit_status = task.exit_status();
            ctx.current_execution_status = if exit_status.is_success() {
                ExecutionStatus::Success
            } else {
                ExecutionStatus::Failure
            };
            ctx.end_time = Some(Utc::now());
            ctx.process_id = task.process_id();
            ctx.app_ids = task.app_ids();
            ctx.var_pool = Some(var_pool_json);
            (ctx.task_instance_id, ctx.current_execution_status)
        };
        tracing::info!(task_instance_id, status = %status, "Task execution finished");
        Ok(())
    }

    /// Terminal transition, runs whatever the outcome was: evict the context
    /// cache entry, dispatch the RESULT callback and clear the work
    /// directory.
    async fn finalize(&self) {
        let snapshot = self.ctx().clone();
        self.services.cache.remove(snapshot.task_instance_id);
        self.services
            .reporter
            .send_with_retry(&snapshot, MessageKind::TaskExecuteResult)
            .await;
        workdir::clear_exec_path(&snapshot.execute_path, self.services.config.develop_mode).await;
    }

    /// Cancel the running task. Safe to call from outside the executing
    /// slot; idempotent, best-effort, never panics.
    pub async fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(task) = self.current_task() else {
            return;
        };

        if let Err(e) = task.cancel_application(true).await {
            tracing::error!(error = %e, "Failed to cancel task application");
        }

        let app_ids = self.ctx().app_ids.clone();
        for app_id in app_ids.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if let Err(e) = self.services.app_manager.kill_application(app_id).await {
                tracing::error!(app_id, error = %e, "Failed to kill external application");
            }
        }
    }
}
