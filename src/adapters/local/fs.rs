use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use std::error::Error;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Storage backed by a local directory, for development and tests.
/// Objects land at `root/key`.
#[derive(Clone, Debug)]
pub struct FsAdapter {
    root: PathBuf,
    base_url: Option<String>,
}

impl FsAdapter {
    pub fn new(root: impl Into<PathBuf>, base_url: Option<String>) -> Self {
        Self {
            root: root.into(),
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    /// Location of `key` under the root. Keys with `.` or `..` components
    /// are refused so nothing is written outside the root.
    pub fn path_of(&self, key: &str) -> io::Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        let plain = relative
            .components()
            .all(|component| matches!(component, Component::Normal(_)));
        if !plain || relative.as_os_str().is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("object key {:?} escapes the storage root", key),
            ));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl StoragePort for FsAdapter {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        _content_type: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let key_path = self.path_of(key)?;
        if key_path != local_path {
            if let Some(parent) = key_path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(local_path, key_path).await?;
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        match &self.base_url {
            Some(base) => format!("{}/{}", base, key.trim_start_matches('/')),
            None => format!(
                "file://{}",
                self.root.join(key.trim_start_matches('/')).display()
            ),
        }
    }
}
