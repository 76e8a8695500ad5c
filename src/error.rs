//! Error taxonomy. One enum per pipeline stage, all folded into [`JobError`].

use crate::ports::process::ProcessError;
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("authorization failed: source rejected credentials with HTTP {code}")]
    Unauthorized { code: u16 },
    #[error("source responded with HTTP {code}")]
    Status { code: u16 },
    #[error("download timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("invalid drive file id {0:?}")]
    InvalidFileId(String),
    #[error("failed to write input file: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to run prober: {0}")]
    Launch(#[source] ProcessError),
    #[error("prober exited with code {code:?}")]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },
    #[error("unreadable prober output: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no video stream found")]
    NoVideoStream,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to launch encoder {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("encoder exited with code {code:?}")]
    Failed {
        code: Option<i32>,
        diagnostics: String,
    },
    #[error("encoder killed after {secs}s timeout")]
    TimedOut { secs: u64 },
    #[error("encoder exited successfully but produced no segments in {}", dir.display())]
    NoOutput { dir: PathBuf },
    #[error("encoder output unreadable: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to rename {}: {source}", path.display())]
    Rename {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("upload of {key} failed: {source}")]
    Upload {
        key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("publication requested but no storage is configured")]
    NoStorage,
    #[error("publish i/o: {0}")]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("a source is required: video_url or drive_file_id")]
    MissingSource,
    #[error("access_token is required for drive sources")]
    MissingAccessToken,
    #[error("a destination with job_id is required when upload is enabled")]
    MissingDestination,
    #[error("destination {0} must be plain path names without `.` or `..`")]
    InvalidDestination(&'static str),
    #[error("segment_duration must be a positive number, got {0}")]
    InvalidSegmentDuration(f64),
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Publish(#[from] PublishError),
    #[error("failed to allocate workspace: {0}")]
    Workspace(#[source] io::Error),
}

impl JobError {
    pub fn kind(&self) -> &'static str {
        match self {
            JobError::Config(_) => "ConfigError",
            JobError::Download(_) => "DownloadError",
            JobError::Probe(_) => "ProbeError",
            JobError::Encode(_) => "EncodeError",
            JobError::Publish(_) => "PublishError",
            JobError::Workspace(_) => "WorkspaceError",
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            JobError::Encode(EncodeError::Failed { code, .. })
            | JobError::Probe(ProbeError::Failed { code, .. }) => *code,
            _ => None,
        }
    }

    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            JobError::Encode(EncodeError::Failed { diagnostics, .. })
            | JobError::Probe(ProbeError::Failed { diagnostics, .. }) => Some(diagnostics),
            _ => None,
        }
    }
}

/// Structured failure attached to a failed job result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobFailure {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<String>,
}

impl From<&JobError> for JobFailure {
    fn from(err: &JobError) -> Self {
        JobFailure {
            kind: err.kind().to_string(),
            message: err.to_string(),
            exit_code: err.exit_code(),
            diagnostics: err.diagnostics().map(String::from),
        }
    }
}
