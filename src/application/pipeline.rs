//! Per-job linear pipeline:
//! workspace -> fetch -> probe -> detect -> encode -> publish -> teardown.

use crate::adapters::http::fetch::SourceFetcher;
use crate::application::capability::CapabilityDetector;
use crate::application::encoder::{EncodeOrchestrator, EncodeOutcome};
use crate::application::probe::probe_media;
use crate::application::publisher::{obfuscate, OutputPublisher, Publication, PublishTarget};
use crate::application::workspace::Workspace;
use crate::config::WorkerConfig;
use crate::domain::hls::{parse_durations, MediaPlaylist};
use crate::domain::jobs::{Job, JobResult, JobStatus, OutputDescriptor, Throughput};
use crate::domain::media::MediaInfo;
use crate::domain::plan::{EncodePlan, EncoderPath};
use crate::domain::segments::SegmentSet;
use crate::error::{ConfigError, DownloadError, EncodeError, JobError, JobFailure, PublishError};
use crate::ports::process::ProcessRunner;
use crate::ports::storage::StoragePort;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;
use tracing::{error, info};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

/// What is known about a job so far, kept for the result even on failure.
#[derive(Default)]
struct Progress {
    media: Option<MediaInfo>,
    encoder: Option<EncoderPath>,
}

struct Completed {
    output: OutputDescriptor,
    throughput: Throughput,
}

pub struct Pipeline<R> {
    config: WorkerConfig,
    runner: R,
    fetcher: SourceFetcher,
    detector: CapabilityDetector,
    encoder: EncodeOrchestrator,
    publisher: OutputPublisher,
}

impl<R> Pipeline<R>
where
    R: ProcessRunner,
{
    pub fn new(config: WorkerConfig, runner: R) -> Result<Self, DownloadError> {
        let fetcher = SourceFetcher::new(
            config.drive_api_base.clone(),
            config.url_download_timeout,
            config.drive_download_timeout,
        )?;
        Ok(Self::with_fetcher(config, runner, fetcher))
    }

    pub fn with_fetcher(config: WorkerConfig, runner: R, fetcher: SourceFetcher) -> Self {
        Self {
            detector: CapabilityDetector::from_config(&config),
            encoder: EncodeOrchestrator::from_config(&config),
            publisher: OutputPublisher::new(config.upload_concurrency),
            config,
            runner,
            fetcher,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    pub fn detector(&self) -> &CapabilityDetector {
        &self.detector
    }

    /// Runs `job` to a terminal result. The job's workspace is gone by the
    /// time this returns, whatever the outcome.
    pub async fn run<S>(&self, job: &Job, storage: Option<&S>) -> JobResult
    where
        S: StoragePort + ?Sized,
    {
        let started = Instant::now();
        info!(
            job_id = %job.id,
            source = job.source.kind(),
            quality = job.quality.as_str(),
            segment_duration = job.segment_duration,
            upload = job.publish.upload,
            obfuscate = job.publish.obfuscate,
            "job started"
        );

        let mut progress = Progress::default();
        let result = match Workspace::allocate(&self.config.work_dir, &job.id) {
            Ok(workspace) => {
                let result = self.execute(job, storage, &workspace, &mut progress).await;
                workspace.close();
                result
            }
            Err(e) => Err(JobError::Workspace(e)),
        };

        let processing_time_secs = started.elapsed().as_secs_f64();
        match result {
            Ok(completed) => {
                info!(
                    job_id = %job.id,
                    segments = completed.output.segment_count,
                    processing_time_secs,
                    "job completed"
                );
                JobResult {
                    job_id: job.id.clone(),
                    status: JobStatus::Completed,
                    processing_time_secs,
                    media_info: progress.media,
                    encoder: progress.encoder,
                    output: Some(completed.output),
                    throughput: Some(completed.throughput),
                    error: None,
                }
            }
            Err(err) => {
                error!(job_id = %job.id, kind = err.kind(), "job failed: {}", err);
                JobResult {
                    job_id: job.id.clone(),
                    status: JobStatus::Failed,
                    processing_time_secs,
                    media_info: progress.media,
                    encoder: progress.encoder,
                    output: None,
                    throughput: None,
                    error: Some(JobFailure::from(&err)),
                }
            }
        }
    }

    async fn execute<S>(
        &self,
        job: &Job,
        storage: Option<&S>,
        workspace: &Workspace,
        progress: &mut Progress,
    ) -> Result<Completed, JobError>
    where
        S: StoragePort + ?Sized,
    {
        let input = workspace.input_path();
        self.fetcher.fetch(&job.source, &input).await?;

        let media = probe_media(
            &self.runner,
            &self.config.ffprobe_path,
            &input,
            self.config.probe_step_timeout,
        )
        .await?;
        progress.media = Some(media.clone());

        let capability = self.detector.detect(&self.runner).await;
        progress.encoder = Some(capability.path);

        let plan = EncodePlan::resolve(&media, job.quality, job.segment_duration, capability.path);
        let encoded = self
            .encoder
            .encode(&self.runner, &plan, &input, workspace.segments_dir())
            .await?;

        let encoder_playlist = match &encoded.segments.playlist_path {
            Some(path) => Some(
                tokio::fs::read_to_string(path)
                    .await
                    .map_err(EncodeError::Io)?,
            ),
            None => None,
        };

        let mut segments = encoded.segments.clone();
        if job.publish.obfuscate {
            let mut rng = StdRng::from_entropy();
            segments = obfuscate(segments, &mut rng).await?;
        }

        let publication = if job.publish.upload {
            let storage = storage.ok_or(PublishError::NoStorage)?;
            let destination = job
                .destination
                .as_ref()
                .ok_or(ConfigError::MissingDestination)?;
            let key_prefix = job.key_prefix().ok_or(ConfigError::MissingDestination)?;
            let target = PublishTarget {
                key_prefix: &key_prefix,
                cdn_hosts: &destination.cdn_hosts,
                default_duration: job.segment_duration,
            };
            Some(
                self.publisher
                    .publish(
                        storage,
                        &segments,
                        encoder_playlist.as_deref(),
                        target,
                        workspace.output_dir(),
                    )
                    .await?,
            )
        } else {
            None
        };

        let playlist = match &publication {
            Some(publication) => publication.playlist.clone(),
            None => local_playlist(&segments, encoder_playlist.as_deref(), job),
        };

        Ok(Completed {
            throughput: throughput(&media, &encoded),
            output: describe(&segments, playlist, job, publication),
        })
    }
}

/// Playlist for unpublished output. Renamed segments get a rebuilt
/// playlist with the encoder's timing.
fn local_playlist(segments: &SegmentSet, encoder_playlist: Option<&str>, job: &Job) -> String {
    match encoder_playlist {
        Some(text) if !job.publish.obfuscate => text.to_string(),
        _ => {
            let names: Vec<String> = segments.segments.iter().map(|s| s.file_name()).collect();
            let durations = encoder_playlist.map(parse_durations).unwrap_or_default();
            MediaPlaylist::vod(&names, &durations, job.segment_duration).render()
        }
    }
}

fn describe(
    segments: &SegmentSet,
    playlist: String,
    job: &Job,
    publication: Option<Publication>,
) -> OutputDescriptor {
    let (public_url, uploaded_segments) = match publication {
        Some(publication) => (Some(publication.playlist_url), publication.assets),
        None => (None, Vec::new()),
    };
    OutputDescriptor {
        format: "hls",
        segment_count: segments.len(),
        segment_duration: job.segment_duration,
        playlist,
        segments: segments.entries(),
        public_url,
        uploaded_segments,
    }
}

fn throughput(media: &MediaInfo, encoded: &EncodeOutcome) -> Throughput {
    let encode_secs = encoded.elapsed.as_secs_f64();
    let realtime_speed = if encode_secs > 0.0 {
        media.duration / encode_secs
    } else {
        0.0
    };
    Throughput {
        encode_secs,
        realtime_speed,
        encoder_speed: encoded.last_progress.and_then(|p| p.speed),
        output_megabytes: encoded.segments.total_bytes() as f64 / BYTES_PER_MEGABYTE,
    }
}
