use crate::application::capability::{CapabilityDetector, CapabilityReport};
use crate::domain::plan::EncoderPath;
use crate::ports::process::{CommandSpec, ProcessRunner};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub ffmpeg_available: bool,
    pub ffmpeg_version: Option<String>,
    pub gpu_available: bool,
    pub gpu_info: Option<String>,
    pub encoder: EncoderPath,
    pub diagnostics: Vec<String>,
}

/// Encoder tool and hardware availability, through the same checks the
/// pipeline uses.
pub async fn health_report<R>(
    runner: &R,
    detector: &CapabilityDetector,
    ffmpeg_path: &str,
    timeout: Duration,
) -> HealthReport
where
    R: ProcessRunner + ?Sized,
{
    let mut diagnostics = Vec::new();

    let version = CommandSpec::new(ffmpeg_path).arg("-version");
    let ffmpeg_version = match runner.run(&version, timeout).await {
        Ok(output) if output.success() => output.stdout.lines().next().map(String::from),
        Ok(output) => {
            diagnostics.push(format!("ffmpeg -version exited with code {:?}", output.code));
            None
        }
        Err(e) => {
            diagnostics.push(e.to_string());
            None
        }
    };

    let CapabilityReport {
        path,
        device,
        reason,
        ..
    } = detector.detect(runner).await;
    diagnostics.push(reason);

    HealthReport {
        status: if ffmpeg_version.is_some() { "ok" } else { "degraded" },
        ffmpeg_available: ffmpeg_version.is_some(),
        ffmpeg_version,
        gpu_available: device.is_some(),
        gpu_info: device,
        encoder: path,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::process::{MockProcessRunner, ProcessError, ProcessOutput};
    use std::collections::BTreeMap;

    fn detector() -> CapabilityDetector {
        CapabilityDetector::new("ffmpeg", "nvidia-smi", Duration::from_secs(1), BTreeMap::new())
    }

    #[tokio::test]
    async fn test_cpu_only_host() {
        let mut runner = MockProcessRunner::new();
        runner
            .expect_run()
            .withf(|c, _| c.args == ["-version"])
            .returning(|_, _| {
                Ok(ProcessOutput {
                    code: Some(0),
                    stdout: "ffmpeg version 6.1.1 Copyright (c) 2000-2023\nbuilt with gcc".to_string(),
                    ..Default::default()
                })
            });
        runner
            .expect_run()
            .withf(|c, _| c.program == "nvidia-smi")
            .returning(|c, _| {
                Err(ProcessError::Spawn {
                    program: c.program.clone(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                })
            });

        let report = health_report(&runner, &detector(), "ffmpeg", Duration::from_secs(1)).await;
        assert_eq!(report.status, "ok");
        assert!(report.ffmpeg_available);
        assert_eq!(
            report.ffmpeg_version.as_deref(),
            Some("ffmpeg version 6.1.1 Copyright (c) 2000-2023")
        );
        assert!(!report.gpu_available);
        assert_eq!(report.encoder, EncoderPath::Software);
        assert_eq!(report.diagnostics.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_is_degraded() {
        let mut runner = MockProcessRunner::new();
        runner.expect_run().returning(|c, _| {
            Err(ProcessError::Spawn {
                program: c.program.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            })
        });

        let report = health_report(&runner, &detector(), "ffmpeg", Duration::from_secs(1)).await;
        assert_eq!(report.status, "degraded");
        assert!(!report.ffmpeg_available);
        assert_eq!(report.diagnostics.len(), 2);
    }
}
