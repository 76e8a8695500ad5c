use async_trait::async_trait;
use std::error::Error;
use std::path::Path;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StoragePort: Send + Sync {
    /// Upload a file from a local path to storage under `key`
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Public URL an uploaded object is served from
    fn public_url(&self, key: &str) -> String;
}
