//! Capability Detector.
//!
//! Settles on [`EncoderPath::Hardware`] only after three checks pass in
//! order: a GPU device is visible, ffmpeg has the hardware encoder
//! compiled in, and a short synthetic encode through it succeeds. Any
//! failure, error, or timeout settles on [`EncoderPath::Software`].

use crate::config::WorkerConfig;
use crate::domain::plan::{EncoderPath, HARDWARE_ENCODER};
use crate::ports::process::{CommandSpec, ProcessOutput, ProcessRunner};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info};

/// Encoder output that means the hardware path cannot initialize even
/// though the process may exit cleanly.
const INIT_FAILURE_MARKERS: [&str; 7] = [
    "Cannot load",
    "No capable devices found",
    "Driver does not support",
    "Codec not currently supported",
    "OpenEncodeSessionEx failed",
    "Error initializing output stream",
    "Failed to initialise CUDA",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStep {
    DevicePresence,
    EncoderCompiled,
    SmokeTest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityReport {
    pub path: EncoderPath,
    /// GPU name as reported by the device query.
    pub device: Option<String>,
    /// Step that settled the software path, if any.
    pub failed_step: Option<DetectionStep>,
    pub reason: String,
}

impl CapabilityReport {
    fn software(step: DetectionStep, device: Option<String>, reason: impl Into<String>) -> Self {
        CapabilityReport {
            path: EncoderPath::Software,
            device,
            failed_step: Some(step),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CapabilityDetector {
    ffmpeg_path: String,
    nvidia_smi_path: String,
    step_timeout: Duration,
    gpu_env: BTreeMap<String, String>,
}

impl CapabilityDetector {
    pub fn new(
        ffmpeg_path: impl Into<String>,
        nvidia_smi_path: impl Into<String>,
        step_timeout: Duration,
        gpu_env: BTreeMap<String, String>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            nvidia_smi_path: nvidia_smi_path.into(),
            step_timeout,
            gpu_env,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            config.nvidia_smi_path.clone(),
            config.probe_step_timeout,
            config.gpu_env.clone(),
        )
    }

    pub async fn detect<R>(&self, runner: &R) -> CapabilityReport
    where
        R: ProcessRunner + ?Sized,
    {
        let report = self.settle(runner).await;
        info!(
            path = ?report.path,
            device = ?report.device,
            reason = %report.reason,
            "encoder capability settled"
        );
        report
    }

    async fn settle<R>(&self, runner: &R) -> CapabilityReport
    where
        R: ProcessRunner + ?Sized,
    {
        let device = match self.device_name(runner).await {
            Ok(name) => name,
            Err(reason) => {
                return CapabilityReport::software(DetectionStep::DevicePresence, None, reason)
            }
        };

        if let Err(reason) = self.hardware_encoder_compiled(runner).await {
            return CapabilityReport::software(
                DetectionStep::EncoderCompiled,
                Some(device),
                reason,
            );
        }

        if let Err(reason) = self.smoke_test(runner).await {
            return CapabilityReport::software(DetectionStep::SmokeTest, Some(device), reason);
        }

        CapabilityReport {
            path: EncoderPath::Hardware,
            device: Some(device),
            failed_step: None,
            reason: format!("{} initialized on the device", HARDWARE_ENCODER),
        }
    }

    /// Name of the first visible GPU.
    pub async fn device_name<R>(&self, runner: &R) -> Result<String, String>
    where
        R: ProcessRunner + ?Sized,
    {
        let command = CommandSpec::new(&self.nvidia_smi_path)
            .args(["--query-gpu=name", "--format=csv,noheader"])
            .envs(&self.gpu_env);
        let output = self.step(runner, &command).await?;
        if !output.success() {
            return Err(format!(
                "device query exited with code {:?}: {}",
                output.code,
                output.diagnostics.trim()
            ));
        }
        output
            .stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(String::from)
            .ok_or_else(|| "no GPU device listed".to_string())
    }

    pub async fn hardware_encoder_compiled<R>(&self, runner: &R) -> Result<(), String>
    where
        R: ProcessRunner + ?Sized,
    {
        let command = CommandSpec::new(&self.ffmpeg_path).args(["-hide_banner", "-encoders"]);
        let output = self.step(runner, &command).await?;
        if output.success() && output.stdout.contains(HARDWARE_ENCODER) {
            Ok(())
        } else {
            Err(format!("ffmpeg does not list {}", HARDWARE_ENCODER))
        }
    }

    /// Encodes a few frames of generated test pattern through the hardware encoder.
    pub async fn smoke_test<R>(&self, runner: &R) -> Result<(), String>
    where
        R: ProcessRunner + ?Sized,
    {
        let command = CommandSpec::new(&self.ffmpeg_path)
            .args([
                "-hide_banner",
                "-nostats",
                "-f",
                "lavfi",
                "-i",
                "testsrc2=size=320x240:rate=30",
                "-frames:v",
                "5",
                "-c:v",
                HARDWARE_ENCODER,
                "-f",
                "null",
                "-",
            ])
            .envs(&self.gpu_env);
        let output = self.step(runner, &command).await?;

        if let Some(marker) = init_failure(&output) {
            return Err(format!("hardware encoder failed to initialize: {}", marker));
        }
        if !output.success() {
            return Err(format!(
                "test encode exited with code {:?}",
                output.code
            ));
        }
        Ok(())
    }

    /// One check, bounded by the step timeout even if the runner is not.
    async fn step<R>(&self, runner: &R, command: &CommandSpec) -> Result<ProcessOutput, String>
    where
        R: ProcessRunner + ?Sized,
    {
        debug!(program = %command.program, args = ?command.args, "capability check");
        match tokio::time::timeout(self.step_timeout, runner.run(command, self.step_timeout)).await
        {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "{} timed out after {}ms",
                command.program,
                self.step_timeout.as_millis()
            )),
        }
    }
}

fn init_failure(output: &ProcessOutput) -> Option<&'static str> {
    INIT_FAILURE_MARKERS
        .iter()
        .copied()
        .find(|marker| output.diagnostics.contains(marker) || output.stdout.contains(marker))
}
