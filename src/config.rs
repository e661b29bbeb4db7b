use std::time::Duration;

/// Worker-wide configuration, passed explicitly to the components that need
/// it at construction time. There are no ambient globals.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of executor slots draining the delay queue in parallel.
    pub exec_slots: usize,
    /// Address of the master this worker reports to.
    pub master_address: String,
    /// Leave task work directories in place after completion.
    pub develop_mode: bool,
    /// Whether the object store is configured for resource staging.
    pub resource_upload_enabled: bool,
    /// Environment file injected into every task context.
    pub system_env_path: String,
    /// Retry bounds for status messages sent to the master.
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            exec_slots: 4,
            master_address: "127.0.0.1:5678".to_string(),
            develop_mode: false,
            resource_upload_enabled: false,
            system_env_path: String::new(),
            retry: RetryConfig::default(),
        }
    }
}
