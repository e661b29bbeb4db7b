use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, WorkerError};
use crate::storage::StorageOperate;

/// Stages remote resource files into a task's work directory.
pub struct ResourceStager {
    storage: Option<Arc<dyn StorageOperate>>,
    upload_enabled: bool,
}

impl ResourceStager {
    pub fn new(storage: Option<Arc<dyn StorageOperate>>, upload_enabled: bool) -> Self {
        Self {
            storage,
            upload_enabled,
        }
    }

    /// Determine which resources are missing under the work directory.
    ///
    /// Returns `(file_name, tenant_code)` pairs for every resource whose
    /// local copy does not exist yet. A non-empty plan with the object store
    /// disabled fails fast so operators know to enable resource uploads.
    pub fn plan_downloads(
        &self,
        exec_local_path: &str,
        resources: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let mut downloads = Vec::new();
        for (file_name, tenant_code) in resources {
            let local = Path::new(exec_local_path).join(file_name);
            if local.exists() {
                tracing::info!(file = %file_name, "Resource file already staged");
            } else {
                downloads.push((file_name.clone(), tenant_code.clone()));
            }
        }

        if !downloads.is_empty() && (!self.upload_enabled || self.storage.is_none()) {
            return Err(WorkerError::StorageNotConfigured);
        }
        Ok(downloads)
    }

    /// Download every planned resource into the work directory.
    ///
    /// The first failure aborts the batch; files already written are left in
    /// place for the work-directory cleanup.
    pub async fn download(
        &self,
        exec_local_path: &str,
        downloads: &[(String, String)],
    ) -> Result<()> {
        if downloads.is_empty() {
            return Ok(());
        }
        let storage = self.storage.as_ref().ok_or(WorkerError::StorageNotConfigured)?;

        for (file_name, tenant_code) in downloads {
            let remote_path = storage.resource_path(tenant_code, file_name);
            let local_path = Path::new(exec_local_path).join(file_name);
            tracing::info!(
                remote = %remote_path,
                local = %local_path.display(),
                "Downloading resource file"
            );
            storage
                .download(tenant_code, &remote_path, &local_path.to_string_lossy(), true)
                .await
                .map_err(|e| {
                    tracing::error!(file = %file_name, error = %e, "Resource download failed");
                    WorkerError::ResourceDownload(format!("{file_name}: {e}"))
                })?;
        }
        Ok(())
    }
}
