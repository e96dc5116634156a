use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use url::Url;

use crate::config::env::{self, EnvKey};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub amqp_url: String,
    pub transcode_queue: String,
    pub transcoded_queue: String,
    pub work_dir: PathBuf,
    pub worker_concurrency: usize,
    pub preview_seconds: u32,
    pub ffmpeg_timeout: Duration,
    pub shutdown_timeout: Duration,
    pub public_base_url: Url,
    pub minio_url: String,
    pub minio_bucket: String,
    pub minio_access_key: String,
    pub minio_secret_key: String,
    pub storage_region: String,
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::get(key).ok())
    }

    /// Builds the config from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(EnvKey) -> Option<String>,
    {
        let value = |key: EnvKey| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: EnvKey| value(key).ok_or(ConfigError::Missing(key.as_str()));
        let or = |key: EnvKey, default: &str| value(key).unwrap_or_else(|| default.to_string());

        let base = required(EnvKey::PublicBaseUrl)?;
        let public_base_url = Url::parse(&base).map_err(|e| ConfigError::Invalid {
            key: EnvKey::PublicBaseUrl.as_str(),
            reason: e.to_string(),
        })?;
        if public_base_url.cannot_be_a_base() {
            return Err(ConfigError::Invalid {
                key: EnvKey::PublicBaseUrl.as_str(),
                reason: "must be an absolute http(s) URL".to_string(),
            });
        }

        let worker_concurrency = value(EnvKey::WorkerConcurrency)
            .map(|v| env::parse_or(&v, 2usize))
            .unwrap_or(2)
            .max(1);
        let preview_seconds = value(EnvKey::PreviewSeconds)
            .map(|v| env::parse_or(&v, 10u32))
            .unwrap_or(10)
            .max(1);
        let ffmpeg_timeout = value(EnvKey::FfmpegTimeoutSecs)
            .map(|v| env::parse_or(&v, 3600u64))
            .unwrap_or(3600);
        let shutdown_timeout = value(EnvKey::ShutdownTimeoutSecs)
            .map(|v| env::parse_or(&v, 30u64))
            .unwrap_or(30);

        Ok(Self {
            amqp_url: required(EnvKey::AmqpUrl)?,
            transcode_queue: or(EnvKey::TranscodeQueue, "transcodings_queue"),
            transcoded_queue: or(EnvKey::TranscodedQueue, "transcoded_queue"),
            work_dir: PathBuf::from(or(EnvKey::WorkDir, "/tmp/transcoder")),
            worker_concurrency,
            preview_seconds,
            ffmpeg_timeout: Duration::from_secs(ffmpeg_timeout),
            shutdown_timeout: Duration::from_secs(shutdown_timeout),
            public_base_url,
            minio_url: required(EnvKey::MinioUrl)?,
            minio_bucket: required(EnvKey::MinioBucket)?,
            minio_access_key: required(EnvKey::MinioAccessKey)?,
            minio_secret_key: required(EnvKey::MinioSecretKey)?,
            storage_region: or(EnvKey::StorageRegion, "us-east-1"),
        })
    }
}
