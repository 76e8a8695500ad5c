use crate::domain::media::MediaInfo;
use crate::domain::plan::EncoderPath;
use crate::domain::segments::{PublishedAsset, SegmentEntry};
use crate::error::{ConfigError, JobFailure};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_SEGMENT_DURATION: f64 = 2.0;
pub const DEFAULT_KEY_PREFIX: &str = "hls";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
}

impl QualityTier {
    /// Unknown tiers resolve to `Medium`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => QualityTier::Low,
            "high" => QualityTier::High,
            _ => QualityTier::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
        }
    }
}

impl From<String> for QualityTier {
    fn from(raw: String) -> Self {
        QualityTier::parse(&raw)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOptions {
    #[serde(default)]
    pub upload: bool,
    #[serde(default)]
    pub obfuscate: bool,
}

/// Where published objects go.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Destination {
    /// Job-scoped identifier; every object key lives under it.
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3-compatible endpoint, e.g. for R2 or MinIO.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub cdn_hosts: Vec<String>,
}

impl Destination {
    /// Common key prefix for all of one job's objects: `{prefix}/{job_id}`.
    pub fn key_prefix(&self) -> Option<String> {
        let job_id = self.job_id.as_deref()?.trim().trim_matches('/');
        if job_id.is_empty() {
            return None;
        }
        let prefix = self
            .prefix
            .as_deref()
            .unwrap_or(DEFAULT_KEY_PREFIX)
            .trim()
            .trim_matches('/');
        if prefix.is_empty() {
            Some(job_id.to_string())
        } else {
            Some(format!("{}/{}", prefix, job_id))
        }
    }
}

impl fmt::Debug for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Destination")
            .field("job_id", &self.job_id)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("prefix", &self.prefix)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("cdn_hosts", &self.cdn_hosts)
            .finish()
    }
}

/// Transcode request as received from the request shell.
#[derive(Clone, Deserialize, Serialize)]
pub struct JobRequest {
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub drive_file_id: Option<String>,
    #[serde(default, skip_serializing)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub quality: QualityTier,
    #[serde(default = "default_segment_duration")]
    pub segment_duration: f64,
    #[serde(default)]
    pub publish: PublishOptions,
    #[serde(default)]
    pub destination: Option<Destination>,
}

fn default_segment_duration() -> f64 {
    DEFAULT_SEGMENT_DURATION
}

impl JobRequest {
    pub fn validate(self) -> Result<Job, ConfigError> {
        let url = non_empty(self.video_url);
        let drive_id = non_empty(self.drive_file_id);

        let source = match (url, drive_id) {
            (Some(url), _) => Source::Url(url),
            (None, Some(file_id)) => {
                let access_token =
                    non_empty(self.access_token).ok_or(ConfigError::MissingAccessToken)?;
                Source::Drive {
                    file_id,
                    access_token,
                }
            }
            (None, None) => return Err(ConfigError::MissingSource),
        };

        if !self.segment_duration.is_finite() || self.segment_duration <= 0.0 {
            return Err(ConfigError::InvalidSegmentDuration(self.segment_duration));
        }

        if let Some(destination) = &self.destination {
            if !is_plain_key_path(destination.job_id.as_deref()) {
                return Err(ConfigError::InvalidDestination("job_id"));
            }
            if !is_plain_key_path(destination.prefix.as_deref()) {
                return Err(ConfigError::InvalidDestination("prefix"));
            }
        }

        if self.publish.upload {
            let scoped = self
                .destination
                .as_ref()
                .and_then(|d| d.key_prefix())
                .is_some();
            if !scoped {
                return Err(ConfigError::MissingDestination);
            }
        }

        Ok(Job {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            quality: self.quality,
            segment_duration: self.segment_duration,
            publish: self.publish,
            destination: self.destination,
        })
    }
}

/// Whether a client-supplied key component only names plain segments, so
/// it cannot climb out of the job's key space.
fn is_plain_key_path(value: Option<&str>) -> bool {
    let Some(value) = value else {
        return true;
    };
    let value = value.trim().trim_matches('/');
    value.is_empty()
        || value
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != ".." && !part.contains('\\'))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[derive(Clone, PartialEq)]
pub enum Source {
    Url(String),
    Drive { file_id: String, access_token: String },
}

impl Source {
    pub fn kind(&self) -> &'static str {
        match self {
            Source::Url(_) => "url",
            Source::Drive { .. } => "drive",
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Url(url) => f.debug_tuple("Url").field(url).finish(),
            Source::Drive { file_id, .. } => f
                .debug_struct("Drive")
                .field("file_id", file_id)
                .field("access_token", &"<redacted>")
                .finish(),
        }
    }
}

/// A validated transcode job, exclusively owned by one pipeline run.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub source: Source,
    pub quality: QualityTier,
    pub segment_duration: f64,
    pub publish: PublishOptions,
    pub destination: Option<Destination>,
}

impl Job {
    /// Key prefix for this run's objects: `{prefix}/{job_id}/{id}`. Runs
    /// that share a destination job_id still get disjoint keys.
    pub fn key_prefix(&self) -> Option<String> {
        let scope = self.destination.as_ref()?.key_prefix()?;
        Some(format!("{}/{}", scope, self.id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputDescriptor {
    pub format: &'static str,
    pub segment_count: usize,
    pub segment_duration: f64,
    pub playlist: String,
    pub segments: Vec<SegmentEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub uploaded_segments: Vec<PublishedAsset>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Throughput {
    pub encode_secs: f64,
    /// Media seconds encoded per wall-clock second.
    pub realtime_speed: f64,
    /// Last speed multiplier the encoder reported.
    pub encoder_speed: Option<f64>,
    pub output_megabytes: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub status: JobStatus,
    pub processing_time_secs: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_info: Option<MediaInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoder: Option<EncoderPath>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub throughput: Option<Throughput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobFailure>,
}
