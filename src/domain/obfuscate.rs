//! Decoy filename extensions for published segments.
//!
//! Renaming only touches the extension; the numbered stem and the file
//! bytes are left as they are.

use super::segments::Segment;
use rand::Rng;
use std::path::PathBuf;

pub const DECOY_EXTENSIONS: [&str; 12] = [
    "png", "jpg", "jpeg", "gif", "webp", "css", "js", "ico", "svg", "woff2", "txt", "html",
];

/// Content type served for an object with extension `ext`.
pub fn content_type_for(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "css" => "text/css",
        "js" => "application/javascript",
        "ico" => "image/x-icon",
        "svg" => "image/svg+xml",
        "woff2" => "font/woff2",
        "txt" => "text/plain",
        "html" => "text/html",
        "ts" => "video/mp2t",
        "m3u8" => "application/vnd.apple.mpegurl",
        _ => "application/octet-stream",
    }
}

/// Draws one decoy extension uniformly from [`DECOY_EXTENSIONS`].
pub fn pick_decoy<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    DECOY_EXTENSIONS[rng.gen_range(0..DECOY_EXTENSIONS.len())]
}

/// Target path for each segment, same directory and stem, decoy extension.
pub fn decoy_paths<R: Rng + ?Sized>(segments: &[Segment], rng: &mut R) -> Vec<PathBuf> {
    segments
        .iter()
        .map(|segment| segment.path.with_extension(pick_decoy(rng)))
        .collect()
}
