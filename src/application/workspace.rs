//! Workspace Manager: one temporary directory tree per job.
//!
//! The tree is removed when the [`Workspace`] is dropped, so every exit
//! path of the pipeline (including `?` and panics) tears it down.

use std::io;
use std::path::{Path, PathBuf};
use tempfile::{Builder, TempDir};
use tracing::{debug, warn};

const INPUT_FILE: &str = "input.mp4";

pub struct Workspace {
    dir: TempDir,
    output: PathBuf,
    segments: PathBuf,
}

impl Workspace {
    /// Creates `<parent>/job-<id>-XXXX/{output/segments}`.
    pub fn allocate(parent: &Path, job_id: &str) -> io::Result<Self> {
        std::fs::create_dir_all(parent)?;
        let dir = Builder::new()
            .prefix(&format!("job-{}-", job_id))
            .tempdir_in(parent)?;
        let output = dir.path().join("output");
        let segments = output.join("segments");
        std::fs::create_dir_all(&segments)?;
        debug!(job_id, root = %dir.path().display(), "workspace allocated");
        Ok(Self {
            dir,
            output,
            segments,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_path(&self) -> PathBuf {
        self.dir.path().join(INPUT_FILE)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }

    pub fn segments_dir(&self) -> &Path {
        &self.segments
    }

    /// Removes the tree now, reporting failures instead of ignoring them
    /// as `Drop` would.
    pub fn close(self) {
        let root = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(root = %root.display(), "failed to remove workspace: {}", e);
        } else {
            debug!(root = %root.display(), "workspace removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let parent = tempdir().unwrap();
        let workspace = Workspace::allocate(parent.path(), "abc").unwrap();
        assert!(workspace.segments_dir().is_dir());
        assert!(workspace.segments_dir().starts_with(workspace.output_dir()));
        assert!(workspace.output_dir().starts_with(workspace.root()));
        assert_eq!(workspace.input_path().parent(), Some(workspace.root()));
        let name = workspace.root().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("job-abc-"));
    }

    #[test]
    fn test_close_removes_tree() {
        let parent = tempdir().unwrap();
        let workspace = Workspace::allocate(parent.path(), "abc").unwrap();
        std::fs::write(workspace.segments_dir().join("segment_00000.ts"), b"x").unwrap();
        let root = workspace.root().to_path_buf();
        workspace.close();
        assert!(!root.exists());
    }

    #[test]
    fn test_drop_removes_tree_on_early_exit() {
        let parent = tempdir().unwrap();
        let root = {
            let workspace = Workspace::allocate(parent.path(), "early").unwrap();
            std::fs::write(workspace.input_path(), b"partial download").unwrap();
            workspace.root().to_path_buf()
        };
        assert!(!root.exists());
    }
}
