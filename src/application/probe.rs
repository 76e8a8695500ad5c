use crate::domain::media::MediaInfo;
use crate::error::ProbeError;
use crate::ports::process::{CommandSpec, ProcessRunner};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub fn ffprobe_command(ffprobe: &str, input: &Path) -> CommandSpec {
    CommandSpec::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_format",
            "-show_streams",
            "-print_format",
            "json",
        ])
        .arg(input.to_string_lossy())
}

/// Reads stream and container metadata from a local media file.
pub async fn probe_media<R>(
    runner: &R,
    ffprobe: &str,
    input: &Path,
    timeout: Duration,
) -> Result<MediaInfo, ProbeError>
where
    R: ProcessRunner + ?Sized,
{
    let output = runner
        .run(&ffprobe_command(ffprobe, input), timeout)
        .await
        .map_err(ProbeError::Launch)?;

    if !output.success() {
        return Err(ProbeError::Failed {
            code: output.code,
            diagnostics: output.diagnostics,
        });
    }

    let probe: Value = serde_json::from_str(&output.stdout)?;
    let media = MediaInfo::from_ffprobe(&probe)?;
    info!(
        width = media.width,
        height = media.height,
        fps = media.fps,
        duration = media.duration,
        codec = %media.video_codec,
        "probed source"
    );
    Ok(media)
}
