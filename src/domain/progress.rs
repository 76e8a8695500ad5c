//! Encoder progress parsing.
//!
//! ffmpeg reports progress either as classic stats lines
//! (`frame= 120 ... time=00:00:04.00 bitrate=... speed=2.01x`) or, with
//! `-progress pipe:1`, as `key=value` blocks terminated by `progress=...`.
//! Both shapes feed the same parser.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProgressEvent {
    /// Output position in seconds. Never decreases within one run.
    pub position: f64,
    /// Realtime multiplier reported by the encoder, when known.
    pub speed: Option<f64>,
}

/// Classification of one line of process output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineKind {
    /// The line carried progress data; an event is emitted once a block
    /// or stats line is complete.
    Progress(Option<ProgressEvent>),
    Other,
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=\s*(\d+):(\d{2}):(\d{2}(?:\.\d+)?)").unwrap())
}

fn speed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"speed=\s*(\d+(?:\.\d+)?)x").unwrap())
}

const PROGRESS_KEYS: [&str; 14] = [
    "frame",
    "fps",
    "bitrate",
    "total_size",
    "out_time_us",
    "out_time_ms",
    "out_time",
    "dup_frames",
    "drop_frames",
    "speed",
    "progress",
    "stream_0_0_q",
    "stream_0_1_q",
    "stream_1_0_q",
];

#[derive(Debug, Default)]
pub struct ProgressParser {
    position: f64,
    speed: Option<f64>,
    seen_position: bool,
}

impl ProgressParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> LineKind {
        let line = line.trim();
        let key = line.split_once('=').map(|(k, _)| k.trim());
        let is_block_line = key.is_some_and(|k| PROGRESS_KEYS.contains(&k));
        let is_stats_line = line.contains("time=") && line.contains("speed=");

        if !is_block_line && !is_stats_line {
            return LineKind::Other;
        }

        if let Some(caps) = time_regex().captures(line) {
            let hours: f64 = caps[1].parse().unwrap_or(0.0);
            let minutes: f64 = caps[2].parse().unwrap_or(0.0);
            let seconds: f64 = caps[3].parse().unwrap_or(0.0);
            let position = hours * 3600.0 + minutes * 60.0 + seconds;
            if position > self.position {
                self.position = position;
            }
            self.seen_position = true;
        }

        if let Some(caps) = speed_regex().captures(line) {
            self.speed = caps[1].parse().ok();
        }

        let complete = is_stats_line || key == Some("progress");
        if complete && self.seen_position {
            LineKind::Progress(Some(self.current()))
        } else {
            LineKind::Progress(None)
        }
    }

    pub fn current(&self) -> ProgressEvent {
        ProgressEvent {
            position: self.position,
            speed: self.speed,
        }
    }
}

/// Lets one progress log line through per interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
