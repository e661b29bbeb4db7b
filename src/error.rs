use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("task plugin not found for task type '{0}', please check the plugin registry")]
    PluginNotFound(String),

    #[error("resource download failed: {0}")]
    ResourceDownload(String),

    #[error("storage service is not configured, resource uploads must be enabled")]
    StorageNotConfigured,

    #[error("task plugin error: {0}")]
    PluginRuntime(String),

    #[error("task was killed before it could run")]
    Killed,

    #[error("report delivery failed after {attempts} attempts: {message}")]
    ReportDelivery { attempts: u32, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("alert delivery error: {0}")]
    Alert(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WorkerError>;
