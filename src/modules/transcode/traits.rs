//! Capabilities the pipeline drives. Production implementations live in
//! `ffmpeg` and `crate::infrastructure`; tests plug in recording stubs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::error::TranscodeError;
use super::layout::JobLayout;

/// Media conversion, derivative generation and inspection.
///
/// Every call may run for as long as a full transcode. Implementations
/// should abort promptly once `cancel` fires and report
/// [`TranscodeError::Cancelled`].
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Normalizes the source into the job's canonical file and returns its path.
    async fn convert(
        &self,
        source_url: &str,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, TranscodeError>;

    async fn short_clip(
        &self,
        canonical: &Path,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;

    async fn renditions(
        &self,
        canonical: &Path,
        job: &JobLayout,
        cancel: &CancellationToken,
    ) -> Result<(), TranscodeError>;

    async fn master_playlist(&self, job: &JobLayout) -> Result<(), TranscodeError>;

    /// Raw duration string as reported by the media inspector.
    async fn probe_duration(
        &self,
        path: &Path,
        cancel: &CancellationToken,
    ) -> Result<String, TranscodeError>;
}

/// Pushes a job directory to remote storage.
#[async_trait]
pub trait Uploader: Send + Sync {
    /// Uploads everything below `job.dir()` under `job.storage_prefix()`.
    /// The local directory is removed only after every object landed.
    async fn upload_dir_and_remove(&self, job: &JobLayout) -> anyhow::Result<()>;
}

/// Outbound completion channel.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> anyhow::Result<()>;
}
