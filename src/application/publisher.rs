//! Output Publisher: optional decoy renaming, segment upload, and
//! playlist reconstruction.

use crate::domain::hls::{parse_durations, MediaPlaylist};
use crate::domain::obfuscate::{content_type_for, decoy_paths};
use crate::domain::segments::{PublishedAsset, Segment, SegmentSet, PLAYLIST_NAME};
use crate::error::PublishError;
use crate::ports::storage::StoragePort;
use chrono::Utc;
use futures::{stream, StreamExt, TryStreamExt};
use rand::Rng;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct Publication {
    /// Uploaded segments in sequence order.
    pub assets: Vec<PublishedAsset>,
    pub playlist_key: String,
    pub playlist_url: String,
    pub playlist: String,
}

/// Where and how one job's output is published.
#[derive(Debug, Clone, Copy)]
pub struct PublishTarget<'a> {
    /// Job-scoped prefix shared by every object key.
    pub key_prefix: &'a str,
    pub cdn_hosts: &'a [String],
    pub default_duration: f64,
}

/// Renames every segment to a decoy extension. File bytes are untouched.
pub async fn obfuscate<R>(set: SegmentSet, rng: &mut R) -> Result<SegmentSet, PublishError>
where
    R: Rng + ?Sized,
{
    let targets = decoy_paths(&set.segments, rng);
    let mut renamed = Vec::with_capacity(set.segments.len());
    for (segment, target) in set.segments.into_iter().zip(targets) {
        tokio::fs::rename(&segment.path, &target)
            .await
            .map_err(|source| PublishError::Rename {
                path: segment.path.clone(),
                source,
            })?;
        renamed.push(Segment {
            path: target,
            ..segment
        });
    }
    debug!(count = renamed.len(), "segments renamed");
    Ok(SegmentSet {
        segments: renamed,
        playlist_path: set.playlist_path,
    })
}

/// Public URL of a segment: rotated across CDN hosts by sequence number,
/// or the storage's own URL without CDN hosts.
pub fn segment_url<S>(storage: &S, cdn_hosts: &[String], sequence: u64, key: &str) -> String
where
    S: StoragePort + ?Sized,
{
    if cdn_hosts.is_empty() {
        return storage.public_url(key);
    }
    let host = cdn_hosts[(sequence % cdn_hosts.len() as u64) as usize]
        .trim()
        .trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        format!("{}/{}", host, key)
    } else {
        format!("https://{}/{}", host, key)
    }
}

#[derive(Debug, Clone)]
pub struct OutputPublisher {
    concurrency: usize,
}

impl OutputPublisher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Uploads all segments, then a rebuilt playlist pointing at them.
    ///
    /// The first failed upload aborts the rest. Durations come
    /// index-for-index from `encoder_playlist` when given.
    pub async fn publish<S>(
        &self,
        storage: &S,
        segments: &SegmentSet,
        encoder_playlist: Option<&str>,
        target: PublishTarget<'_>,
        output_dir: &Path,
    ) -> Result<Publication, PublishError>
    where
        S: StoragePort + ?Sized,
    {
        info!(
            segments = segments.len(),
            prefix = target.key_prefix,
            concurrency = self.concurrency,
            "publishing segments"
        );

        // Collected eagerly: a lazy map here leaves the publish future
        // not `Send` for every lifetime.
        let uploads: Vec<_> = segments
            .segments
            .iter()
            .map(|segment| upload_segment(storage, segment, target))
            .collect();
        let mut assets: Vec<PublishedAsset> = stream::iter(uploads)
            .buffer_unordered(self.concurrency)
            .try_collect()
            .await?;
        assets.sort_by_key(|asset| asset.sequence);

        let durations = encoder_playlist.map(parse_durations).unwrap_or_default();
        if !durations.is_empty() && durations.len() != assets.len() {
            warn!(
                durations = durations.len(),
                segments = assets.len(),
                "encoder playlist and segment count differ"
            );
        }
        let uris: Vec<String> = assets.iter().map(|asset| asset.url.clone()).collect();
        let playlist = MediaPlaylist::vod(&uris, &durations, target.default_duration);

        let playlist_path = output_dir.join(PLAYLIST_NAME);
        playlist.write_to(&playlist_path).await?;

        let playlist_key = format!("{}/{}", target.key_prefix, PLAYLIST_NAME);
        storage
            .upload(&playlist_path, &playlist_key, content_type_for("m3u8"))
            .await
            .map_err(|source| PublishError::Upload {
                key: playlist_key.clone(),
                source,
            })?;
        let playlist_url = storage.public_url(&playlist_key);

        info!(segments = assets.len(), playlist_url = %playlist_url, "publication complete");
        Ok(Publication {
            assets,
            playlist_key,
            playlist_url,
            playlist: playlist.render(),
        })
    }
}

async fn upload_segment<S>(
    storage: &S,
    segment: &Segment,
    target: PublishTarget<'_>,
) -> Result<PublishedAsset, PublishError>
where
    S: StoragePort + ?Sized,
{
    let name = segment.file_name();
    let key = format!("{}/{}", target.key_prefix, name);
    let content_type = content_type_for(&segment.extension());

    storage
        .upload(&segment.path, &key, content_type)
        .await
        .map_err(|source| PublishError::Upload {
            key: key.clone(),
            source,
        })?;
    debug!(key = %key, content_type, "segment uploaded");

    Ok(PublishedAsset {
        sequence: segment.sequence,
        url: segment_url(storage, target.cdn_hosts, segment.sequence, &key),
        name,
        key,
        size: segment.size,
        content_type: content_type.to_string(),
        uploaded_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::storage::MockStoragePort;
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::error::Error;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    const ENCODER_PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:3
#EXT-X-MEDIA-SEQUENCE:0
#EXTINF:2.002000,
segment_00000.ts
#EXTINF:2.002000,
segment_00001.ts
#EXTINF:1.968622,
segment_00002.ts
#EXTINF:2.002000,
segment_00003.ts
#EXTINF:0.467133,
segment_00004.ts
#EXT-X-ENDLIST
";

    async fn encoded_segments(count: u64) -> (TempDir, SegmentSet) {
        let dir = tempdir().unwrap();
        for i in 0..count {
            let body = vec![i as u8; 100 + i as usize * 10];
            std::fs::write(dir.path().join(format!("segment_{:05}.ts", i)), body).unwrap();
        }
        std::fs::write(dir.path().join(PLAYLIST_NAME), ENCODER_PLAYLIST).unwrap();
        let set = SegmentSet::load(dir.path()).await.unwrap();
        (dir, set)
    }

    fn target<'a>(cdn_hosts: &'a [String]) -> PublishTarget<'a> {
        PublishTarget {
            key_prefix: "hls/job-1",
            cdn_hosts,
            default_duration: 2.0,
        }
    }

    /// Completes uploads in reverse sequence order.
    #[derive(Default)]
    struct ReversingStorage {
        uploads: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl StoragePort for ReversingStorage {
        async fn upload(
            &self,
            _local_path: &Path,
            key: &str,
            content_type: &str,
        ) -> Result<(), Box<dyn Error + Send + Sync>> {
            let sequence = crate::domain::segments::sequence_of(key.rsplit('/').next().unwrap_or(key));
            if let Some(sequence) = sequence {
                tokio::time::sleep(Duration::from_millis(60 - sequence * 10)).await;
            }
            self.uploads
                .lock()
                .unwrap()
                .push((key.to_string(), content_type.to_string()));
            Ok(())
        }

        fn public_url(&self, key: &str) -> String {
            format!("https://bucket.example.com/{}", key)
        }
    }

    #[tokio::test]
    async fn test_obfuscate_preserves_bytes() {
        let (dir, set) = encoded_segments(5).await;
        let before: Vec<Vec<u8>> = set
            .segments
            .iter()
            .map(|s| std::fs::read(&s.path).unwrap())
            .collect();

        let mut rng = StdRng::seed_from_u64(3);
        let renamed = obfuscate(set.clone(), &mut rng).await.unwrap();

        for ((original, renamed), bytes) in set.segments.iter().zip(&renamed.segments).zip(&before) {
            assert!(!original.path.exists());
            assert_ne!(renamed.extension(), "ts");
            assert_eq!(renamed.sequence, original.sequence);
            assert_eq!(std::fs::metadata(&renamed.path).unwrap().len(), original.size);
            assert_eq!(&std::fs::read(&renamed.path).unwrap(), bytes);
        }
        drop(dir);
    }

    #[tokio::test]
    async fn test_playlist_keeps_order_and_timing_across_reordered_uploads() {
        let (dir, set) = encoded_segments(5).await;
        let output = tempdir().unwrap();
        let storage = ReversingStorage::default();

        let publication = OutputPublisher::new(5)
            .publish(&storage, &set, Some(ENCODER_PLAYLIST), target(&[]), output.path())
            .await
            .unwrap();

        let uploads = storage.uploads.lock().unwrap().clone();
        assert_eq!(uploads.first().unwrap().0, "hls/job-1/segment_00004.ts");
        assert_eq!(uploads.last().unwrap().0, "hls/job-1/playlist.m3u8");

        let sequences: Vec<u64> = publication.assets.iter().map(|a| a.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
        assert_eq!(
            parse_durations(&publication.playlist),
            parse_durations(ENCODER_PLAYLIST)
        );
        let uris: Vec<&str> = publication
            .playlist
            .lines()
            .filter(|l| !l.starts_with('#'))
            .collect();
        assert_eq!(uris[0], "https://bucket.example.com/hls/job-1/segment_00000.ts");
        assert_eq!(uris[4], "https://bucket.example.com/hls/job-1/segment_00004.ts");
        assert_eq!(
            publication.playlist_url,
            "https://bucket.example.com/hls/job-1/playlist.m3u8"
        );
        assert_eq!(
            std::fs::read_to_string(output.path().join(PLAYLIST_NAME)).unwrap(),
            publication.playlist
        );
        drop(dir);
    }

    #[tokio::test]
    async fn test_missing_encoder_playlist_defaults_durations() {
        let (dir, set) = encoded_segments(3).await;
        let output = tempdir().unwrap();
        let storage = ReversingStorage::default();

        let publication = OutputPublisher::new(2)
            .publish(&storage, &set, None, target(&[]), output.path())
            .await
            .unwrap();
        assert_eq!(parse_durations(&publication.playlist), vec![2.0, 2.0, 2.0]);
        drop(dir);
    }

    #[tokio::test]
    async fn test_decoy_content_types_are_sent() {
        let (dir, set) = encoded_segments(5).await;
        let output = tempdir().unwrap();
        let set = obfuscate(set, &mut StdRng::seed_from_u64(11)).await.unwrap();

        let mut storage = MockStoragePort::new();
        storage
            .expect_upload()
            .withf(|path, key, content_type| {
                let ext = path.extension().unwrap().to_string_lossy().to_string();
                key.ends_with(&format!(".{}", ext)) && content_type == content_type_for(&ext)
            })
            .times(6)
            .returning(|_, _, _| Ok(()));
        storage
            .expect_public_url()
            .returning(|key| format!("https://bucket.example.com/{}", key));

        let publication = OutputPublisher::new(3)
            .publish(&storage, &set, Some(ENCODER_PLAYLIST), target(&[]), output.path())
            .await
            .unwrap();
        for asset in &publication.assets {
            let ext = asset.name.rsplit('.').next().unwrap();
            assert_eq!(asset.content_type, content_type_for(ext));
            assert!(asset.key.starts_with("hls/job-1/"));
        }
        drop(dir);
    }

    #[tokio::test]
    async fn test_first_upload_failure_aborts() {
        let (dir, set) = encoded_segments(4).await;
        let output = tempdir().unwrap();

        let mut storage = MockStoragePort::new();
        storage
            .expect_upload()
            .withf(|_, key, _| key.ends_with("segment_00000.ts"))
            .times(1)
            .returning(|_, _, _| Ok(()));
        storage
            .expect_upload()
            .withf(|_, key, _| key.ends_with("segment_00001.ts"))
            .times(1)
            .returning(|_, _, _| Err("connection reset".into()));
        storage
            .expect_upload()
            .withf(|_, key, _| key.ends_with("segment_00002.ts") || key.ends_with(PLAYLIST_NAME))
            .times(0);
        storage
            .expect_public_url()
            .returning(|key| format!("https://bucket.example.com/{}", key));

        let err = OutputPublisher::new(1)
            .publish(&storage, &set, Some(ENCODER_PLAYLIST), target(&[]), output.path())
            .await
            .unwrap_err();
        match err {
            PublishError::Upload { key, .. } => assert_eq!(key, "hls/job-1/segment_00001.ts"),
            other => panic!("unexpected error: {other:?}"),
        }
        drop(dir);
    }

    #[test]
    fn test_cdn_rotation() {
        let mut storage = MockStoragePort::new();
        storage.expect_public_url().times(0);
        let hosts = vec!["cdn1.example.com".to_string(), "https://cdn2.example.com/".to_string()];

        assert_eq!(
            segment_url(&storage, &hosts, 0, "hls/j/segment_00000.css"),
            "https://cdn1.example.com/hls/j/segment_00000.css"
        );
        assert_eq!(
            segment_url(&storage, &hosts, 1, "hls/j/segment_00001.css"),
            "https://cdn2.example.com/hls/j/segment_00001.css"
        );
        assert_eq!(
            segment_url(&storage, &hosts, 2, "hls/j/segment_00002.css"),
            "https://cdn1.example.com/hls/j/segment_00002.css"
        );
    }
}
