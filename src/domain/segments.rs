//! Encoder output: numbered media segments plus a playlist.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const SEGMENT_PREFIX: &str = "segment_";
pub const SEGMENT_EXTENSION: &str = "ts";
pub const PLAYLIST_NAME: &str = "playlist.m3u8";

/// ffmpeg filename template for segments, zero-padded so on-disk order
/// matches sequence order.
pub fn segment_template() -> String {
    format!("{}%05d.{}", SEGMENT_PREFIX, SEGMENT_EXTENSION)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub sequence: u64,
    pub path: PathBuf,
    pub size: u64,
}

impl Segment {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentEntry {
    pub name: String,
    pub size: u64,
}

impl From<&Segment> for SegmentEntry {
    fn from(segment: &Segment) -> Self {
        SegmentEntry {
            name: segment.file_name(),
            size: segment.size,
        }
    }
}

/// Ordered segments and the encoder-written playlist, if any.
#[derive(Debug, Clone)]
pub struct SegmentSet {
    pub segments: Vec<Segment>,
    pub playlist_path: Option<PathBuf>,
}

impl SegmentSet {
    /// Enumerates `dir`, keeping `.ts` files whose stem ends in a sequence number.
    pub async fn load(dir: &Path) -> io::Result<Self> {
        let mut segments = Vec::new();
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_segment = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(SEGMENT_EXTENSION));
            if !is_segment {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }
            let Some(sequence) = path.file_name().and_then(|n| sequence_of(&n.to_string_lossy()))
            else {
                continue;
            };
            segments.push(Segment {
                sequence,
                path,
                size: metadata.len(),
            });
        }
        segments.sort_by_key(|s| s.sequence);

        let playlist = dir.join(PLAYLIST_NAME);
        let playlist_path = fs::try_exists(&playlist)
            .await
            .unwrap_or(false)
            .then_some(playlist);

        Ok(SegmentSet {
            segments,
            playlist_path,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// True when sequence numbers run 0, 1, 2, ... without gaps.
    pub fn is_contiguous(&self) -> bool {
        self.segments
            .iter()
            .enumerate()
            .all(|(i, s)| s.sequence == i as u64)
    }

    pub fn total_bytes(&self) -> u64 {
        self.segments.iter().map(|s| s.size).sum()
    }

    pub fn entries(&self) -> Vec<SegmentEntry> {
        self.segments.iter().map(SegmentEntry::from).collect()
    }
}

/// Sequence number embedded in a segment filename: the trailing digits of
/// its stem (`segment_00012.ts` and `segment_00012.png` both give 12).
pub fn sequence_of(file_name: &str) -> Option<u64> {
    let stem = match file_name.rsplit_once('.') {
        Some((stem, _)) => stem,
        None => file_name,
    };
    let digits_start = stem
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    stem[digits_start..].parse().ok()
}

/// One uploaded segment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedAsset {
    pub sequence: u64,
    pub name: String,
    pub key: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}
