use crate::domain::jobs::Destination;
use crate::ports::storage::StoragePort;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::error::Error;
use std::path::Path;
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";

/// S3Adapter implements StoragePort for AWS S3 and S3-compatible stores.
#[derive(Clone)]
pub struct S3Adapter {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
}

impl S3Adapter {
    pub fn new(client: Client, bucket: String, region: String, endpoint: Option<String>) -> Self {
        Self {
            client,
            bucket,
            region,
            endpoint: endpoint.map(|e| e.trim_end_matches('/').to_string()),
        }
    }

    /// Client for one job's destination. Explicit credentials win; without
    /// them the default AWS credential chain applies.
    pub async fn from_destination(destination: &Destination) -> Self {
        let region = destination
            .region
            .clone()
            .unwrap_or_else(|| DEFAULT_REGION.to_string());

        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(region.clone()));

        if let (Some(access_key), Some(secret_key)) = (
            destination.access_key_id.as_ref(),
            destination.secret_access_key.as_ref(),
        ) {
            let credentials =
                Credentials::new(access_key, secret_key, None, None, "job-destination");
            loader = loader.credentials_provider(credentials);
        }
        if let Some(endpoint) = &destination.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        // S3-compatible endpoints (R2, MinIO) generally want path-style addressing.
        let s3_config = aws_sdk_s3::config::Builder::from(&config)
            .force_path_style(destination.endpoint.is_some())
            .build();

        Self::new(
            Client::from_conf(s3_config),
            destination.bucket.clone(),
            region,
            destination.endpoint.clone(),
        )
    }
}

#[async_trait]
impl StoragePort for S3Adapter {
    async fn upload(
        &self,
        local_path: &Path,
        key: &str,
        content_type: &str,
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let body = ByteStream::from_path(local_path).await?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(body)
            .send()
            .await?;
        debug!(bucket = %self.bucket, key, content_type, "uploaded object");
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        public_url(&self.bucket, &self.region, self.endpoint.as_deref(), key)
    }
}

fn public_url(bucket: &str, region: &str, endpoint: Option<&str>, key: &str) -> String {
    match endpoint {
        Some(endpoint) => format!("{}/{}/{}", endpoint, bucket, key),
        None => format!("https://{}.s3.{}.amazonaws.com/{}", bucket, region, key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_url() {
        assert_eq!(
            public_url("media", "eu-west-1", None, "hls/job/playlist.m3u8"),
            "https://media.s3.eu-west-1.amazonaws.com/hls/job/playlist.m3u8"
        );
        assert_eq!(
            public_url("media", "auto", Some("https://r2.example.com"), "hls/job/segment_00000.png"),
            "https://r2.example.com/media/hls/job/segment_00000.png"
        );
    }

    #[tokio::test]
    async fn test_from_destination_keeps_bucket_and_endpoint() {
        let destination = Destination {
            job_id: Some("job".to_string()),
            bucket: "media".to_string(),
            region: Some("auto".to_string()),
            endpoint: Some("http://127.0.0.1:9000/".to_string()),
            access_key_id: Some("minioadmin".to_string()),
            secret_access_key: Some("minioadmin".to_string()),
            ..Default::default()
        };
        let adapter = S3Adapter::from_destination(&destination).await;
        assert_eq!(
            adapter.public_url("hls/job/a.ts"),
            "http://127.0.0.1:9000/media/hls/job/a.ts"
        );
    }
}
