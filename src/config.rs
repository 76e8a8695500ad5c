//! Configuration loaded from the environment.

use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// GPU environment forwarded to hardware probes and encodes, when set.
pub const GPU_ENV_VARS: [&str; 3] = [
    "NVIDIA_VISIBLE_DEVICES",
    "CUDA_VISIBLE_DEVICES",
    "NVIDIA_DRIVER_CAPABILITIES",
];

pub const DEFAULT_DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// HTTP server bind address
    pub addr: String,
    /// HTTP server port
    pub port: String,
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub nvidia_smi_path: String,
    /// Parent directory for per-job workspaces
    pub work_dir: PathBuf,
    pub drive_api_base: String,
    pub url_download_timeout: Duration,
    pub drive_download_timeout: Duration,
    /// Bound on each capability check and on probing
    pub probe_step_timeout: Duration,
    pub encode_timeout: Duration,
    pub upload_concurrency: usize,
    pub progress_log_interval: Duration,
    /// Serve published objects from a local directory instead of S3
    pub storage_local_dir: Option<PathBuf>,
    pub storage_base_url: Option<String>,
    pub gpu_env: BTreeMap<String, String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            addr: String::from("127.0.0.1"),
            port: String::from("3000"),
            ffmpeg_path: String::from("ffmpeg"),
            ffprobe_path: String::from("ffprobe"),
            nvidia_smi_path: String::from("nvidia-smi"),
            work_dir: env::temp_dir(),
            drive_api_base: String::from(DEFAULT_DRIVE_API_BASE),
            url_download_timeout: Duration::from_secs(600),
            drive_download_timeout: Duration::from_secs(1800),
            probe_step_timeout: Duration::from_secs(10),
            encode_timeout: Duration::from_secs(3600),
            upload_concurrency: 4,
            progress_log_interval: Duration::from_secs(5),
            storage_local_dir: None,
            storage_base_url: None,
            gpu_env: BTreeMap::new(),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key lookup. Unset or unparsable values
    /// fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let string = |key: &str, default: String| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(default)
        };
        let secs = |key: &str, default: Duration| {
            parsed::<u64>(lookup(key))
                .map(Duration::from_secs)
                .unwrap_or(default)
        };

        let gpu_env = GPU_ENV_VARS
            .iter()
            .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
            .collect();

        Self {
            addr: string("ADDR", defaults.addr),
            port: string("PORT", defaults.port),
            ffmpeg_path: string("FFMPEG_PATH", defaults.ffmpeg_path),
            ffprobe_path: string("FFPROBE_PATH", defaults.ffprobe_path),
            nvidia_smi_path: string("NVIDIA_SMI_PATH", defaults.nvidia_smi_path),
            work_dir: lookup("WORK_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            drive_api_base: string("DRIVE_API_BASE", defaults.drive_api_base),
            url_download_timeout: secs("URL_DOWNLOAD_TIMEOUT_SECS", defaults.url_download_timeout),
            drive_download_timeout: secs(
                "DRIVE_DOWNLOAD_TIMEOUT_SECS",
                defaults.drive_download_timeout,
            ),
            probe_step_timeout: secs("PROBE_STEP_TIMEOUT_SECS", defaults.probe_step_timeout),
            encode_timeout: secs("ENCODE_TIMEOUT_SECS", defaults.encode_timeout),
            upload_concurrency: parsed::<usize>(lookup("UPLOAD_CONCURRENCY"))
                .filter(|n| *n > 0)
                .unwrap_or(defaults.upload_concurrency),
            progress_log_interval: secs(
                "PROGRESS_LOG_INTERVAL_SECS",
                defaults.progress_log_interval,
            ),
            storage_local_dir: lookup("STORAGE_LOCAL_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            storage_base_url: lookup("STORAGE_BASE_URL").filter(|v| !v.trim().is_empty()),
            gpu_env,
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.addr, self.port)
    }
}

fn parsed<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> WorkerConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]);
        assert_eq!(config.bind_address(), "127.0.0.1:3000");
        assert_eq!(config.ffmpeg_path, "ffmpeg");
        assert_eq!(config.url_download_timeout, Duration::from_secs(600));
        assert_eq!(config.drive_download_timeout, Duration::from_secs(1800));
        assert_eq!(config.upload_concurrency, 4);
        assert!(config.gpu_env.is_empty());
        assert!(config.storage_local_dir.is_none());
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = config(&[
            ("PORT", "8080"),
            ("FFMPEG_PATH", "/opt/ffmpeg/bin/ffmpeg"),
            ("ENCODE_TIMEOUT_SECS", "120"),
            ("PROBE_STEP_TIMEOUT_SECS", "soon"),
            ("UPLOAD_CONCURRENCY", "0"),
            ("CUDA_VISIBLE_DEVICES", "0,1"),
        ]);
        assert_eq!(config.port, "8080");
        assert_eq!(config.ffmpeg_path, "/opt/ffmpeg/bin/ffmpeg");
        assert_eq!(config.encode_timeout, Duration::from_secs(120));
        assert_eq!(config.probe_step_timeout, Duration::from_secs(10));
        assert_eq!(config.upload_concurrency, 4);
        assert_eq!(
            config.gpu_env.get("CUDA_VISIBLE_DEVICES").map(String::as_str),
            Some("0,1")
        );
        assert_eq!(config.gpu_env.len(), 1);
    }
}
