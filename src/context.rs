use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A single task parameter. Identity is the `prop` name: merging two
/// properties with the same name keeps the later value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Property {
    pub prop: String,
    pub value: String,
}

impl Property {
    pub fn new(prop: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            prop: prop.into(),
            value: value.into(),
        }
    }
}

impl PartialEq for Property {
    fn eq(&self, other: &Self) -> bool {
        self.prop == other.prop
    }
}

impl Eq for Property {}

impl std::hash::Hash for Property {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.prop.hash(state);
    }
}

/// Execution status of a task instance. The numeric codes are wire-visible
/// and shared with the master, so they are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Submitted,
    RunningExecution,
    Failure,
    Success,
    Kill,
}

impl ExecutionStatus {
    pub fn code(&self) -> i32 {
        match self {
            ExecutionStatus::Submitted => 0,
            ExecutionStatus::RunningExecution => 1,
            ExecutionStatus::Failure => 6,
            ExecutionStatus::Success => 7,
            ExecutionStatus::Kill => 9,
        }
    }

    /// Map a status code back to a status. Unknown codes are treated as
    /// failures rather than rejected, the master already handles FAILURE.
    pub fn of(code: i32) -> Self {
        match code {
            0 => ExecutionStatus::Submitted,
            1 => ExecutionStatus::RunningExecution,
            7 => ExecutionStatus::Success,
            9 => ExecutionStatus::Kill,
            _ => ExecutionStatus::Failure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }
}

impl Serialize for ExecutionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.code())
    }
}

impl<'de> Deserialize<'de> for ExecutionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(ExecutionStatus::of(i32::deserialize(deserializer)?))
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Submitted => write!(f, "submitted"),
            ExecutionStatus::RunningExecution => write!(f, "running"),
            ExecutionStatus::Failure => write!(f, "failure"),
            ExecutionStatus::Success => write!(f, "success"),
            ExecutionStatus::Kill => write!(f, "kill"),
        }
    }
}

/// The unit of work handed to this worker by a master. Created externally,
/// mutated by the runner as the task moves through its lifecycle, and sent
/// back to the master in RUNNING and RESULT callbacks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskExecutionContext {
    pub task_instance_id: i32,
    pub process_instance_id: i32,
    pub process_define_code: i64,
    pub process_define_version: i32,
    pub first_submit_time: DateTime<Utc>,
    /// Derived `"{process_instance_id}_{task_instance_id}"`, stable once set.
    pub task_app_id: String,

    pub schedule_time: Option<DateTime<Utc>>,
    pub delay_minutes: u32,

    pub task_type: String,
    pub task_name: String,
    pub execute_path: String,
    pub env_file: String,
    pub dry_run: bool,

    /// Serialized list of [`Property`], as received from the master.
    pub global_params: Option<String>,
    /// Plugin-specific payload, interpreted by the task channel.
    pub task_params: String,
    pub params_map: HashMap<String, Property>,
    pub defined_params: HashMap<String, String>,
    /// Opaque serialized list of [`Property`], carried in and out of the plugin.
    pub var_pool: Option<String>,

    /// Resource file name -> owning tenant code.
    pub resources: HashMap<String, String>,

    pub current_execution_status: ExecutionStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Native pid of the spawned subprocess, 0 when none was spawned.
    pub process_id: i32,
    /// Comma-separated external application ids (e.g. YARN).
    pub app_ids: String,
    pub task_log_name: String,
}

impl Default for TaskExecutionContext {
    fn default() -> Self {
        Self {
            task_instance_id: 0,
            process_instance_id: 0,
            process_define_code: 0,
            process_define_version: 0,
            first_submit_time: Utc::now(),
            task_app_id: String::new(),
            schedule_time: None,
            delay_minutes: 0,
            task_type: String::new(),
            task_name: String::new(),
            execute_path: String::new(),
            env_file: String::new(),
            dry_run: false,
            global_params: None,
            task_params: String::new(),
            params_map: HashMap::new(),
            defined_params: HashMap::new(),
            var_pool: None,
            resources: HashMap::new(),
            current_execution_status: ExecutionStatus::Submitted,
            start_time: None,
            end_time: None,
            process_id: 0,
            app_ids: String::new(),
            task_log_name: String::new(),
        }
    }
}

impl TaskExecutionContext {
    /// Correlation id used by external log systems.
    pub fn derive_task_app_id(&self) -> String {
        format!("{}_{}", self.process_instance_id, self.task_instance_id)
    }

    /// Canonical per-task log tag.
    pub fn derive_task_log_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.first_submit_time.timestamp(),
            self.process_define_code,
            self.process_define_version,
            self.process_instance_id,
            self.task_instance_id
        )
    }

    /// Deadline after which a delayed task becomes ready to run.
    pub fn run_deadline(&self) -> DateTime<Utc> {
        self.first_submit_time + chrono::Duration::seconds(self.delay_minutes as i64 * 60)
    }
}

/// Process-wide cache of in-flight task contexts, keyed by task instance id.
///
/// Contexts are registered before a runner is enqueued and evicted by the
/// runner when it reaches a terminal state. Eviction is idempotent.
#[derive(Debug, Default)]
pub struct TaskContextCache {
    contexts: Mutex<HashMap<i32, TaskExecutionContext>>,
}

impl TaskContextCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self, ctx: TaskExecutionContext) {
        self.contexts
            .lock()
            .expect("context cache lock poisoned")
            .insert(ctx.task_instance_id, ctx);
    }

    pub fn get(&self, task_instance_id: i32) -> Option<TaskExecutionContext> {
        self.contexts
            .lock()
            .expect("context cache lock poisoned")
            .get(&task_instance_id)
            .cloned()
    }

    pub fn remove(&self, task_instance_id: i32) {
        self.contexts
            .lock()
            .expect("context cache lock poisoned")
            .remove(&task_instance_id);
    }

    pub fn len(&self) -> usize {
        self.contexts
            .lock()
            .expect("context cache lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
