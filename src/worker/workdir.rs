use std::io::ErrorKind;

/// Remove a finished task's work directory.
///
/// Cleanup is best-effort and never affects the task's reported status:
/// a missing directory is success, any other I/O error is logged and
/// swallowed. In develop mode the directory is left for inspection, and the
/// filesystem root is never deleted.
pub async fn clear_exec_path(exec_local_path: &str, develop_mode: bool) {
    if develop_mode {
        tracing::debug!(path = %exec_local_path, "Develop mode, keeping work directory");
        return;
    }

    if exec_local_path.is_empty() {
        tracing::warn!("Task work directory path is empty, nothing to clear");
        return;
    }

    if exec_local_path == "/" {
        tracing::warn!("Task work directory is '/', direct deletion is not allowed");
        return;
    }

    match tokio::fs::remove_dir_all(exec_local_path).await {
        Ok(()) => {
            tracing::info!(path = %exec_local_path, "Work directory cleared");
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            // the task never created its directory
        }
        Err(e) => {
            tracing::error!(path = %exec_local_path, error = %e, "Failed to clear work directory");
        }
    }
}
