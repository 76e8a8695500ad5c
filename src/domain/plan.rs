//! Encoder invocation plan.
//!
//! Both codec paths share one output contract: even dimensions, AAC
//! stereo audio, and identical HLS segmentation flags. Keyframes are
//! pinned to segment boundaries by setting the GOP to
//! `round(fps * segment_duration)` and forcing a keyframe every
//! `segment_duration` seconds.

use super::jobs::QualityTier;
use super::media::MediaInfo;
use super::segments::{segment_template, PLAYLIST_NAME};
use serde::Serialize;
use std::path::Path;

pub const HARDWARE_ENCODER: &str = "h264_nvenc";
pub const SOFTWARE_ENCODER: &str = "libx264";

pub const AUDIO_CODEC: &str = "aac";
pub const AUDIO_BITRATE: &str = "128k";
pub const AUDIO_CHANNELS: u32 = 2;
pub const AUDIO_SAMPLE_RATE: u32 = 44100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderPath {
    Hardware,
    Software,
}

impl EncoderPath {
    pub fn encoder(&self) -> &'static str {
        match self {
            EncoderPath::Hardware => HARDWARE_ENCODER,
            EncoderPath::Software => SOFTWARE_ENCODER,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateControl {
    /// libx264 constant rate factor.
    Crf { crf: u8, preset: &'static str },
    /// NVENC constant-quality VBR with a bitrate ceiling.
    ConstantQuality {
        cq: u8,
        preset: &'static str,
        max_bitrate_kbps: u32,
    },
}

impl RateControl {
    pub fn for_tier(tier: QualityTier, path: EncoderPath) -> Self {
        match (path, tier) {
            (EncoderPath::Software, QualityTier::Low) => RateControl::Crf {
                crf: 28,
                preset: "veryfast",
            },
            (EncoderPath::Software, QualityTier::Medium) => RateControl::Crf {
                crf: 23,
                preset: "medium",
            },
            (EncoderPath::Software, QualityTier::High) => RateControl::Crf {
                crf: 20,
                preset: "slow",
            },
            (EncoderPath::Hardware, QualityTier::Low) => RateControl::ConstantQuality {
                cq: 28,
                preset: "p3",
                max_bitrate_kbps: 1_500,
            },
            (EncoderPath::Hardware, QualityTier::Medium) => RateControl::ConstantQuality {
                cq: 23,
                preset: "p4",
                max_bitrate_kbps: 4_000,
            },
            (EncoderPath::Hardware, QualityTier::High) => RateControl::ConstantQuality {
                cq: 19,
                preset: "p6",
                max_bitrate_kbps: 8_000,
            },
        }
    }
}

/// Maximum output height per tier. Sources are never upscaled.
pub fn target_height(tier: QualityTier) -> u32 {
    match tier {
        QualityTier::Low => 480,
        QualityTier::Medium => 720,
        QualityTier::High => 1080,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScaleTarget {
    pub width: u32,
    pub height: u32,
}

impl ScaleTarget {
    pub fn resolve(source_width: u32, source_height: u32, tier: QualityTier) -> Self {
        let max_height = target_height(tier);
        if source_width == 0 || source_height == 0 {
            let height = max_height;
            return ScaleTarget {
                width: even(((height as f64) * 16.0 / 9.0).round() as u32),
                height,
            };
        }
        let height = even(source_height.min(max_height));
        let width = even(
            ((source_width as f64) * (height as f64) / (source_height as f64)).round() as u32,
        );
        ScaleTarget { width, height }
    }
}

fn even(value: u32) -> u32 {
    (value - value % 2).max(2)
}

pub fn gop_size(fps: f64, segment_duration: f64) -> u32 {
    ((fps * segment_duration).round() as u32).max(1)
}

/// Resolved, tier-specific parameter set for one encode.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodePlan {
    pub tier: QualityTier,
    pub path: EncoderPath,
    pub segment_duration: f64,
    pub gop: u32,
    pub scale: ScaleTarget,
    pub rate: RateControl,
}

impl EncodePlan {
    pub fn resolve(
        media: &MediaInfo,
        tier: QualityTier,
        segment_duration: f64,
        path: EncoderPath,
    ) -> Self {
        EncodePlan {
            tier,
            path,
            segment_duration,
            gop: gop_size(media.fps, segment_duration),
            scale: ScaleTarget::resolve(media.width, media.height, tier),
            rate: RateControl::for_tier(tier, path),
        }
    }

    /// Forced-keyframe expression with a period of exactly `segment_duration`.
    pub fn keyframe_expr(&self) -> String {
        format!("expr:gte(t,n_forced*{})", self.segment_duration)
    }

    pub fn filter_chain(&self) -> String {
        let ScaleTarget { width, height } = self.scale;
        match self.path {
            EncoderPath::Hardware => {
                format!("format=nv12,hwupload_cuda,scale_cuda={}:{}", width, height)
            }
            EncoderPath::Software => {
                format!("scale={}:{}:flags=lanczos,format=yuv420p", width, height)
            }
        }
    }

    /// Full ffmpeg argument list, in order. Nothing is shell-interpolated.
    pub fn ffmpeg_args(&self, input: &Path, segments_dir: &Path) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        push(&["-hide_banner", "-y", "-nostats", "-loglevel", "warning"]);
        push(&["-progress", "pipe:1"]);

        if self.path == EncoderPath::Hardware {
            push(&["-init_hw_device", "cuda=gpu:0", "-filter_hw_device", "gpu"]);
        }

        let input = input.to_string_lossy();
        push(&["-i", &input]);
        push(&["-map", "0:v:0", "-map", "0:a:0?"]);

        let filters = self.filter_chain();
        push(&["-vf", &filters]);

        let gop = self.gop.to_string();
        match self.rate {
            RateControl::Crf { crf, preset } => {
                let crf = crf.to_string();
                push(&["-c:v", SOFTWARE_ENCODER, "-preset", preset, "-crf", &crf]);
                push(&["-profile:v", "high"]);
                push(&["-sc_threshold", "0"]);
            }
            RateControl::ConstantQuality {
                cq,
                preset,
                max_bitrate_kbps,
            } => {
                let cq = cq.to_string();
                let maxrate = format!("{}k", max_bitrate_kbps);
                let bufsize = format!("{}k", max_bitrate_kbps * 2);
                push(&["-c:v", HARDWARE_ENCODER, "-preset", preset]);
                push(&["-rc", "vbr", "-cq", &cq, "-b:v", "0"]);
                push(&["-maxrate", &maxrate, "-bufsize", &bufsize]);
                push(&["-profile:v", "high"]);
                push(&["-no-scenecut", "1", "-forced-idr", "1"]);
            }
        }

        let keyframes = self.keyframe_expr();
        push(&["-g", &gop, "-keyint_min", &gop]);
        push(&["-force_key_frames", &keyframes]);

        let channels = AUDIO_CHANNELS.to_string();
        let sample_rate = AUDIO_SAMPLE_RATE.to_string();
        push(&["-c:a", AUDIO_CODEC, "-b:a", AUDIO_BITRATE]);
        push(&["-ac", &channels, "-ar", &sample_rate]);

        let hls_time = self.segment_duration.to_string();
        let segment_pattern = segments_dir.join(segment_template());
        let segment_pattern = segment_pattern.to_string_lossy();
        let playlist = segments_dir.join(PLAYLIST_NAME);
        let playlist = playlist.to_string_lossy();
        push(&["-f", "hls", "-hls_time", &hls_time]);
        push(&["-hls_playlist_type", "vod"]);
        push(&["-hls_flags", "independent_segments"]);
        push(&["-hls_list_size", "0", "-start_number", "0"]);
        push(&["-hls_segment_filename", &segment_pattern]);
        push(&[&playlist]);

        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn media(width: u32, height: u32, fps: f64) -> MediaInfo {
        MediaInfo {
            width,
            height,
            fps,
            duration: 60.0,
            bitrate: 5_000_000,
            size: 1,
            video_codec: "h264".to_string(),
            audio_codec: Some("aac".to_string()),
            container: None,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2)
            .find(|pair| pair[0] == flag)
            .map(|pair| pair[1].as_str())
    }

    const TIERS: [QualityTier; 3] = [QualityTier::Low, QualityTier::Medium, QualityTier::High];
    const PATHS: [EncoderPath; 2] = [EncoderPath::Software, EncoderPath::Hardware];

    #[test]
    fn test_gop_matches_fps_times_segment_duration() {
        let cases = [
            (30.0, 2.0, 60),
            (30000.0 / 1001.0, 2.0, 60),
            (24000.0 / 1001.0, 4.0, 96),
            (25.0, 6.0, 150),
            (59.94, 2.0, 120),
            (12.5, 0.5, 6),
        ];
        for (fps, duration, expected) in cases {
            for tier in TIERS {
                for path in PATHS {
                    let plan = EncodePlan::resolve(&media(1920, 1080, fps), tier, duration, path);
                    assert_eq!(plan.gop, expected, "fps={fps} d={duration}");
                    assert_eq!(plan.gop, (fps * duration).round() as u32);
                }
            }
        }
    }

    #[test]
    fn test_gop_and_keyframe_expression_agree_in_args() {
        for tier in TIERS {
            for path in PATHS {
                for duration in [1.0, 2.0, 2.5, 6.0] {
                    let plan = EncodePlan::resolve(&media(1280, 720, 25.0), tier, duration, path);
                    let args = plan.ffmpeg_args(Path::new("/in.mp4"), Path::new("/out"));
                    let gop = plan.gop.to_string();
                    assert_eq!(value_after(&args, "-g"), Some(gop.as_str()));
                    assert_eq!(value_after(&args, "-keyint_min"), Some(gop.as_str()));

                    let expr = value_after(&args, "-force_key_frames").unwrap();
                    let period: f64 = expr
                        .strip_prefix("expr:gte(t,n_forced*")
                        .and_then(|rest| rest.strip_suffix(')'))
                        .unwrap()
                        .parse()
                        .unwrap();
                    assert_eq!(period, duration);

                    let hls_time: f64 = value_after(&args, "-hls_time").unwrap().parse().unwrap();
                    assert_eq!(hls_time, duration);
                }
            }
        }
    }

    #[test]
    fn test_shared_output_contract() {
        for path in PATHS {
            let plan = EncodePlan::resolve(&media(1920, 1080, 30.0), QualityTier::Medium, 2.0, path);
            let args = plan.ffmpeg_args(Path::new("/in.mp4"), Path::new("/work/segments"));

            assert_eq!(value_after(&args, "-c:a"), Some("aac"));
            assert_eq!(value_after(&args, "-b:a"), Some("128k"));
            assert_eq!(value_after(&args, "-ac"), Some("2"));
            assert_eq!(value_after(&args, "-ar"), Some("44100"));
            assert_eq!(value_after(&args, "-f"), Some("hls"));
            assert_eq!(value_after(&args, "-hls_playlist_type"), Some("vod"));
            assert_eq!(value_after(&args, "-hls_flags"), Some("independent_segments"));
            assert_eq!(value_after(&args, "-hls_list_size"), Some("0"));
            assert_eq!(value_after(&args, "-start_number"), Some("0"));
            assert_eq!(
                value_after(&args, "-hls_segment_filename"),
                Some("/work/segments/segment_%05d.ts")
            );
            assert_eq!(
                args.last().map(String::as_str),
                Some("/work/segments/playlist.m3u8")
            );
        }
    }

    #[test]
    fn test_path_specific_codec_and_filters() {
        let source = media(1920, 1080, 30.0);
        let hw = EncodePlan::resolve(&source, QualityTier::High, 2.0, EncoderPath::Hardware);
        let hw_args = hw.ffmpeg_args(Path::new("/in.mp4"), Path::new("/out"));
        assert_eq!(value_after(&hw_args, "-c:v"), Some("h264_nvenc"));
        assert_eq!(value_after(&hw_args, "-init_hw_device"), Some("cuda=gpu:0"));
        assert_eq!(
            value_after(&hw_args, "-vf"),
            Some("format=nv12,hwupload_cuda,scale_cuda=1920:1080")
        );
        assert_eq!(value_after(&hw_args, "-cq"), Some("19"));

        let sw = EncodePlan::resolve(&source, QualityTier::Low, 2.0, EncoderPath::Software);
        let sw_args = sw.ffmpeg_args(Path::new("/in.mp4"), Path::new("/out"));
        assert_eq!(value_after(&sw_args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&sw_args, "-init_hw_device"), None);
        assert_eq!(
            value_after(&sw_args, "-vf"),
            Some("scale=852:480:flags=lanczos,format=yuv420p")
        );
        assert_eq!(value_after(&sw_args, "-crf"), Some("28"));
    }

    #[test]
    fn test_scale_is_even_and_never_upscales() {
        assert_eq!(
            ScaleTarget::resolve(640, 360, QualityTier::High),
            ScaleTarget { width: 640, height: 360 }
        );
        assert_eq!(
            ScaleTarget::resolve(1080, 1920, QualityTier::Medium),
            ScaleTarget { width: 404, height: 720 }
        );
        assert_eq!(
            ScaleTarget::resolve(0, 0, QualityTier::Medium),
            ScaleTarget { width: 1280, height: 720 }
        );
        for (w, h) in [(1921, 1081), (719, 479), (3, 3), (1000, 563)] {
            for tier in TIERS {
                let scale = ScaleTarget::resolve(w, h, tier);
                assert_eq!(scale.width % 2, 0, "{w}x{h}");
                assert_eq!(scale.height % 2, 0, "{w}x{h}");
                assert!(scale.height <= h.max(2));
            }
        }
    }

    #[test]
    fn test_input_path_is_a_single_argument() {
        let plan = EncodePlan::resolve(
            &media(1280, 720, 30.0),
            QualityTier::Medium,
            2.0,
            EncoderPath::Software,
        );
        let input = PathBuf::from("/tmp/my video; rm -rf $HOME.mp4");
        let args = plan.ffmpeg_args(&input, Path::new("/out"));
        assert_eq!(
            value_after(&args, "-i"),
            Some("/tmp/my video; rm -rf $HOME.mp4")
        );
    }
}
