use async_trait::async_trait;

use crate::error::Result;

/// Contract of the remote object store used for resource staging
/// (HDFS, S3, MinIO, ...). The concrete client lives outside this crate.
#[async_trait]
pub trait StorageOperate: Send + Sync {
    /// Resolve the remote path of a resource owned by a tenant. Pure, no I/O.
    fn resource_path(&self, tenant_code: &str, full_name: &str) -> String;

    /// Copy a remote resource to a local path.
    async fn download(
        &self,
        tenant_code: &str,
        remote_path: &str,
        local_path: &str,
        overwrite: bool,
    ) -> Result<()>;
}

/// Contract of the collaborator that can terminate externally tracked
/// applications (e.g. a YARN resource manager client).
#[async_trait]
pub trait ApplicationManager: Send + Sync {
    async fn kill_application(&self, app_id: &str) -> Result<()>;
}
