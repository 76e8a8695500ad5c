use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tokio::fs;

pub struct MediaSegment {
    pub duration: f64,
    pub uri: String,
}

pub struct MediaPlaylist {
    pub version: u8,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub segments: Vec<MediaSegment>,
    pub end_list: bool,
    pub playlist_type: Option<String>,
    pub independent_segments: bool,
}

impl MediaPlaylist {
    pub fn new(target_duration: u64) -> Self {
        Self {
            version: 3, // MPEG-TS segments with float EXTINF
            target_duration,
            media_sequence: 0,
            segments: Vec::new(),
            end_list: true,
            playlist_type: None,
            independent_segments: false,
        }
    }

    /// Single-rendition VOD playlist over `uris` in the given order.
    ///
    /// Durations are taken index-for-index from `durations`; entries past
    /// its end fall back to `default_duration`.
    pub fn vod(uris: &[String], durations: &[f64], default_duration: f64) -> Self {
        let mut playlist = MediaPlaylist::new(0);
        playlist.playlist_type = Some("VOD".to_string());
        playlist.independent_segments = true;

        for (i, uri) in uris.iter().enumerate() {
            let duration = durations.get(i).copied().unwrap_or(default_duration);
            playlist.add_segment(duration, uri.clone());
        }
        playlist.target_duration = playlist.max_target_duration();
        playlist
    }

    pub fn add_segment(&mut self, duration: f64, uri: String) {
        self.segments.push(MediaSegment { duration, uri });
    }

    /// Smallest integer no segment exceeds, ignoring sub-millisecond noise.
    pub fn max_target_duration(&self) -> u64 {
        let max = self
            .segments
            .iter()
            .map(|s| s.duration)
            .fold(0.0_f64, f64::max);
        ((max * 1000.0).round() / 1000.0).ceil() as u64
    }

    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("#EXTM3U\n");
        out.push_str(&format!("#EXT-X-VERSION:{}\n", self.version));
        out.push_str(&format!("#EXT-X-TARGETDURATION:{}\n", self.target_duration));
        out.push_str(&format!("#EXT-X-MEDIA-SEQUENCE:{}\n", self.media_sequence));

        if let Some(pt) = &self.playlist_type {
            out.push_str(&format!("#EXT-X-PLAYLIST-TYPE:{}\n", pt));
        }

        if self.independent_segments {
            out.push_str("#EXT-X-INDEPENDENT-SEGMENTS\n");
        }

        for segment in &self.segments {
            // Using {:.6} for reasonable precision on float duration
            out.push_str(&format!("#EXTINF:{:.6},\n", segment.duration));
            out.push_str(&segment.uri);
            out.push('\n');
        }

        if self.end_list {
            out.push_str("#EXT-X-ENDLIST\n");
        }

        out
    }

    pub async fn write_to(&self, path: &Path) -> Result<(), std::io::Error> {
        fs::write(path, self.render()).await
    }
}

fn extinf_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^#EXTINF:\s*(\d+(?:\.\d+)?)").unwrap())
}

/// Per-segment durations of a media playlist, in playlist order.
pub fn parse_durations(playlist: &str) -> Vec<f64> {
    playlist
        .lines()
        .filter_map(|line| extinf_regex().captures(line.trim()))
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .collect()
}
