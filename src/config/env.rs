use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Copy)]
pub enum EnvKey {
    AmqpUrl,
    TranscodeQueue,
    TranscodedQueue,
    WorkDir,
    WorkerConcurrency,
    PreviewSeconds,
    FfmpegTimeoutSecs,
    ShutdownTimeoutSecs,
    PublicBaseUrl,
    MinioUrl,
    MinioBucket,
    MinioAccessKey,
    MinioSecretKey,
    StorageRegion,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::AmqpUrl => "AMQP_URL",
            EnvKey::TranscodeQueue => "TRANSCODE_QUEUE",
            EnvKey::TranscodedQueue => "TRANSCODED_QUEUE",
            EnvKey::WorkDir => "WORK_DIR",
            EnvKey::WorkerConcurrency => "WORKER_CONCURRENCY",
            EnvKey::PreviewSeconds => "PREVIEW_SECONDS",
            EnvKey::FfmpegTimeoutSecs => "FFMPEG_TIMEOUT_SECS",
            EnvKey::ShutdownTimeoutSecs => "SHUTDOWN_TIMEOUT_SECS",
            EnvKey::PublicBaseUrl => "PUBLIC_BASE_URL",
            EnvKey::MinioUrl => "MINIO_ENDPOINT",
            EnvKey::MinioBucket => "MINIO_BUCKET_VIDEOS",
            EnvKey::MinioAccessKey => "AWS_ACCESS_KEY_ID",
            EnvKey::MinioSecretKey => "AWS_SECRET_ACCESS_KEY",
            EnvKey::StorageRegion => "STORAGE_REGION",
        }
    }
}

pub fn get(key: EnvKey) -> Result<String, env::VarError> {
    env::var(key.as_str())
}

pub fn parse_or<T: FromStr>(raw: &str, default: T) -> T {
    raw.trim().parse::<T>().unwrap_or(default)
}
