//! Source Fetcher: streams a job's input video to a local file.

use crate::domain::jobs::Source;
use crate::error::DownloadError;
use futures::TryStreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::StreamReader;
use tracing::{info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const UNKNOWN_LENGTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: Client,
    drive_api_base: String,
    url_timeout: Duration,
    drive_timeout: Duration,
}

impl SourceFetcher {
    pub fn new(
        drive_api_base: impl Into<String>,
        url_timeout: Duration,
        drive_timeout: Duration,
    ) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            drive_api_base: drive_api_base.into().trim_end_matches('/').to_string(),
            url_timeout,
            drive_timeout,
        })
    }

    /// Media download endpoint for a drive file.
    pub fn drive_media_url(&self, file_id: &str) -> Result<String, DownloadError> {
        let valid = !file_id.is_empty()
            && file_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(DownloadError::InvalidFileId(file_id.to_string()));
        }
        Ok(format!(
            "{}/files/{}?alt=media&supportsAllDrives=true",
            self.drive_api_base, file_id
        ))
    }

    /// Downloads `source` into `dest`, replacing any existing file.
    /// Returns the number of bytes written.
    pub async fn fetch(&self, source: &Source, dest: &Path) -> Result<u64, DownloadError> {
        let (request, timeout) = match source {
            Source::Url(url) => (self.client.get(url), self.url_timeout),
            Source::Drive {
                file_id,
                access_token,
            } => {
                let url = self.drive_media_url(file_id)?;
                (
                    self.client.get(url).bearer_auth(access_token),
                    self.drive_timeout,
                )
            }
        };

        info!(source = source.kind(), dest = %dest.display(), "downloading source");
        let started = Instant::now();

        let bytes = match tokio::time::timeout(timeout, download(request, dest)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(source = source.kind(), timeout_secs = timeout.as_secs(), "download timed out");
                return Err(DownloadError::Timeout {
                    secs: timeout.as_secs(),
                });
            }
        };

        info!(
            source = source.kind(),
            bytes,
            elapsed_secs = started.elapsed().as_secs_f64(),
            "download complete"
        );
        Ok(bytes)
    }
}

async fn download(request: RequestBuilder, dest: &Path) -> Result<u64, DownloadError> {
    let response = request.send().await?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(DownloadError::Unauthorized {
            code: status.as_u16(),
        });
    }
    if !status.is_success() {
        return Err(DownloadError::Status {
            code: status.as_u16(),
        });
    }

    let mut progress = DownloadProgress::new(response.content_length());
    let body = response
        .bytes_stream()
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err))
        .inspect_ok(move |chunk| progress.advance(chunk.len() as u64));
    let body_reader = StreamReader::new(body);
    futures::pin_mut!(body_reader);

    let mut file = BufWriter::new(File::create(dest).await?);
    let written = tokio::io::copy(&mut body_reader, &mut file).await?;
    file.flush().await?;
    Ok(written)
}

/// Logs received bytes every 10% of a known length, or on a fixed
/// interval when the length is unknown.
struct DownloadProgress {
    total: Option<u64>,
    received: u64,
    next_percent: u64,
    last_log: Instant,
}

impl DownloadProgress {
    fn new(total: Option<u64>) -> Self {
        Self {
            total: total.filter(|t| *t > 0),
            received: 0,
            next_percent: 10,
            last_log: Instant::now(),
        }
    }

    fn advance(&mut self, chunk: u64) {
        self.received += chunk;
        match self.total {
            Some(total) => {
                let percent = self.received.saturating_mul(100) / total;
                if percent >= self.next_percent {
                    info!(received = self.received, total, percent, "download progress");
                    self.next_percent = (percent / 10 + 1) * 10;
                }
            }
            None => {
                if self.last_log.elapsed() >= UNKNOWN_LENGTH_LOG_INTERVAL {
                    info!(received = self.received, "download progress");
                    self.last_log = Instant::now();
                }
            }
        }
    }
}
