//! Encode Orchestrator: runs one planned ffmpeg encode to a SegmentSet.

use crate::config::WorkerConfig;
use crate::domain::plan::{EncodePlan, EncoderPath};
use crate::domain::progress::ProgressEvent;
use crate::domain::segments::SegmentSet;
use crate::error::EncodeError;
use crate::ports::process::{CommandSpec, ProcessError, ProcessRunner};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    pub segments: SegmentSet,
    pub elapsed: Duration,
    pub last_progress: Option<ProgressEvent>,
}

#[derive(Debug, Clone)]
pub struct EncodeOrchestrator {
    ffmpeg_path: String,
    timeout: Duration,
    gpu_env: BTreeMap<String, String>,
}

impl EncodeOrchestrator {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        timeout: Duration,
        gpu_env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
            gpu_env,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            config.encode_timeout,
            config.gpu_env.clone(),
        )
    }

    pub fn command(&self, plan: &EncodePlan, input: &Path, segments_dir: &Path) -> CommandSpec {
        let command =
            CommandSpec::new(&self.ffmpeg_path).args(plan.ffmpeg_args(input, segments_dir));
        match plan.path {
            EncoderPath::Hardware => command.envs(&self.gpu_env),
            EncoderPath::Software => command,
        }
    }

    /// Runs the encode and collects its segments. Exit 0 without any
    /// segment on disk is a failure.
    pub async fn encode<R>(
        &self,
        runner: &R,
        plan: &EncodePlan,
        input: &Path,
        segments_dir: &Path,
    ) -> Result<EncodeOutcome, EncodeError>
    where
        R: ProcessRunner + ?Sized,
    {
        let command = self.command(plan, input, segments_dir);
        info!(
            path = ?plan.path,
            tier = plan.tier.as_str(),
            gop = plan.gop,
            width = plan.scale.width,
            height = plan.scale.height,
            segment_duration = plan.segment_duration,
            "starting encode"
        );

        let started = Instant::now();
        let output = runner
            .run(&command, self.timeout)
            .await
            .map_err(|e| match e {
                ProcessError::Spawn { program, source } => EncodeError::Spawn { program, source },
                ProcessError::TimedOut { timeout, .. } => EncodeError::TimedOut {
                    secs: timeout.as_secs(),
                },
                ProcessError::Io(e) => EncodeError::Io(e),
            })?;
        let elapsed = started.elapsed();

        if !output.success() {
            warn!(code = ?output.code, "encoder failed");
            return Err(EncodeError::Failed {
                code: output.code,
                diagnostics: output.diagnostics,
            });
        }

        let segments = SegmentSet::load(segments_dir).await?;
        if segments.is_empty() {
            return Err(EncodeError::NoOutput {
                dir: segments_dir.to_path_buf(),
            });
        }
        if !segments.is_contiguous() {
            warn!(count = segments.len(), "segment sequence has gaps");
        }
        if segments.playlist_path.is_none() {
            warn!("encoder wrote no playlist, segment durations will be defaulted");
        }

        info!(
            segments = segments.len(),
            bytes = segments.total_bytes(),
            elapsed_secs = elapsed.as_secs_f64(),
            "encode complete"
        );
        Ok(EncodeOutcome {
            segments,
            elapsed,
            last_progress: output.last_progress(),
        })
    }
}
