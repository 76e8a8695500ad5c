//! Probed media metadata.

use crate::error::ProbeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frame rate assumed when the prober reports none, or an unusable one.
pub const DEFAULT_FPS: f64 = 30.0;

pub trait FromStream {
    fn from_stream(stream_data: &Value) -> Option<Self>
    where
        Self: Sized;
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoStream {
    pub codec: String,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub bit_rate: Option<u64>,
    pub duration: Option<f64>,
}

impl FromStream for VideoStream {
    fn from_stream(stream_data: &Value) -> Option<Self> {
        if stream_data.get("codec_type").and_then(|v| v.as_str()) != Some("video") {
            return None;
        }
        // Cover art is exposed as a one-frame video stream.
        let attached_pic = stream_data
            .get("disposition")
            .and_then(|d| d.get("attached_pic"))
            .and_then(|v| v.as_u64())
            == Some(1);
        if attached_pic {
            return None;
        }

        let fps = stream_data
            .get("avg_frame_rate")
            .and_then(|v| v.as_str())
            .and_then(frame_rate_ratio)
            .or_else(|| {
                stream_data
                    .get("r_frame_rate")
                    .and_then(|v| v.as_str())
                    .and_then(frame_rate_ratio)
            })
            .unwrap_or(DEFAULT_FPS);

        Some(VideoStream {
            codec: string_field(stream_data, "codec_name").unwrap_or_default(),
            width: stream_data.get("width").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            height: stream_data.get("height").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            fps,
            bit_rate: numeric_field(stream_data, "bit_rate").map(|b| b as u64),
            duration: numeric_field(stream_data, "duration"),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioStream {
    pub codec: String,
    pub channels: Option<u32>,
    pub sample_rate: Option<u32>,
}

impl FromStream for AudioStream {
    fn from_stream(stream_data: &Value) -> Option<Self> {
        if stream_data.get("codec_type").and_then(|v| v.as_str()) != Some("audio") {
            return None;
        }
        Some(AudioStream {
            codec: string_field(stream_data, "codec_name").unwrap_or_default(),
            channels: stream_data
                .get("channels")
                .and_then(|v| v.as_u64())
                .map(|c| c as u32),
            sample_rate: numeric_field(stream_data, "sample_rate").map(|r| r as u32),
        })
    }
}

/// Read-only snapshot of the probed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Seconds.
    pub duration: f64,
    /// Bits per second, container-wide when available.
    pub bitrate: u64,
    /// Container size in bytes.
    pub size: u64,
    pub video_codec: String,
    pub audio_codec: Option<String>,
    pub container: Option<String>,
}

impl MediaInfo {
    /// Builds the snapshot from `ffprobe -show_format -show_streams -print_format json`.
    pub fn from_ffprobe(probe: &Value) -> Result<Self, ProbeError> {
        let streams = probe
            .get("streams")
            .and_then(|s| s.as_array())
            .cloned()
            .unwrap_or_default();

        let video = streams
            .iter()
            .find_map(VideoStream::from_stream)
            .ok_or(ProbeError::NoVideoStream)?;
        let audio = streams.iter().find_map(AudioStream::from_stream);

        let format = probe.get("format").cloned().unwrap_or(Value::Null);
        let duration = numeric_field(&format, "duration")
            .or(video.duration)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .unwrap_or(0.0);
        let bitrate = numeric_field(&format, "bit_rate")
            .map(|b| b as u64)
            .or(video.bit_rate)
            .unwrap_or(0);

        Ok(MediaInfo {
            width: video.width,
            height: video.height,
            fps: video.fps,
            duration,
            bitrate,
            size: numeric_field(&format, "size").map(|s| s as u64).unwrap_or(0),
            video_codec: video.codec,
            audio_codec: audio.map(|a| a.codec),
            container: string_field(&format, "format_name"),
        })
    }
}

/// Resolves a prober frame-rate string (`"30000/1001"`, `"25/1"`, `"24"`)
/// to frames per second. Unusable input yields [`DEFAULT_FPS`].
pub fn parse_frame_rate(raw: &str) -> f64 {
    frame_rate_ratio(raw).unwrap_or(DEFAULT_FPS)
}

fn frame_rate_ratio(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: u64 = num.trim().parse().ok()?;
            let den: u64 = den.trim().parse().ok()?;
            if den == 0 {
                return None;
            }
            num as f64 / den as f64
        }
        None => raw.parse::<f64>().ok()?,
    };
    (value.is_finite() && value > 0.0).then_some(value)
}

// ffprobe reports most numbers as strings.
fn numeric_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key)? {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(String::from)
}
