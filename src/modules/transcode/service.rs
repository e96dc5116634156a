use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::derivatives;
use super::error::{MetadataError, PipelineError, PublishError, Stage, TranscodeError};
use super::events::{JobRequest, TranscodeResult};
use super::layout::OutputLayout;
use super::locks::NamespaceLocks;
use super::metadata;
use super::traits::{ResultSink, Transcoder, Uploader};

/// Drives one job through conversion, derivatives, metadata, upload and
/// publication. Safe to share between worker tasks.
pub struct TranscodePipeline {
    layout: OutputLayout,
    transcoder: Arc<dyn Transcoder>,
    uploader: Arc<dyn Uploader>,
    sink: Arc<dyn ResultSink>,
    locks: NamespaceLocks,
}

impl TranscodePipeline {
    pub fn new(
        layout: OutputLayout,
        transcoder: Arc<dyn Transcoder>,
        uploader: Arc<dyn Uploader>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            layout,
            transcoder,
            uploader,
            sink,
            locks: NamespaceLocks::new(),
        }
    }

    /// Runs the whole pipeline for `job`.
    ///
    /// On `Ok` every artifact is in storage and all result fields are
    /// populated; the completion notice was published unless the sink
    /// failed, which is only logged. On `Err` nothing was published.
    pub async fn process(
        &self,
        job: &JobRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, PipelineError> {
        let layout = self.layout.for_job(&job.user_id, &job.file_name);

        let _namespace = tokio::select! {
            guard = self.locks.acquire(&job.file_name) => guard,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        self.enter(job, Stage::Conversion, cancel)?;
        reset_dir(layout.dir())
            .await
            .map_err(|e| PipelineError::Conversion(TranscodeError::Io(e)))?;
        let canonical = self
            .transcoder
            .convert(&job.source_url, &layout, cancel)
            .await
            .map_err(|e| contain(PipelineError::Conversion(e), cancel))?;

        self.enter(job, Stage::Derivatives, cancel)?;
        derivatives::generate(self.transcoder.as_ref(), &canonical, &layout, cancel)
            .await
            .map_err(|e| contain(e, cancel))?;

        self.enter(job, Stage::Metadata, cancel)?;
        let metadata = metadata::extract(self.transcoder.as_ref(), &canonical, cancel)
            .await
            .map_err(|e| contain(PipelineError::Metadata(e), cancel))?;

        let result = TranscodeResult::new(job, &layout, metadata);
        if let Some(field) = result.missing_field() {
            return Err(MetadataError::Incomplete(field).into());
        }

        self.enter(job, Stage::Upload, cancel)?;
        self.uploader
            .upload_dir_and_remove(&layout)
            .await
            .map_err(PipelineError::Upload)?;

        self.enter(job, Stage::Publish, cancel)?;
        if let Err(e) = self.publish(&result).await {
            warn!(
                upload_id = %job.upload_id,
                file_name = %job.file_name,
                "⚠️ Transcode finished but completion notice was lost: {}", e
            );
        }

        info!(
            upload_id = %job.upload_id,
            file_name = %job.file_name,
            size = %result.download_size,
            duration = %result.duration,
            "✅ Job finished"
        );
        Ok(result)
    }

    async fn publish(&self, result: &TranscodeResult) -> Result<(), PublishError> {
        let payload = result.to_payload()?;
        self.sink.publish(&payload).await.map_err(PublishError::Broker)
    }

    fn enter(
        &self,
        job: &JobRequest,
        stage: Stage,
        cancel: &CancellationToken,
    ) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        info!(upload_id = %job.upload_id, file_name = %job.file_name, %stage, "Entering stage");
        Ok(())
    }
}

/// A stage that failed because the job was cancelled reports the cancellation.
fn contain(err: PipelineError, cancel: &CancellationToken) -> PipelineError {
    if cancel.is_cancelled() {
        PipelineError::Cancelled
    } else {
        err
    }
}

/// Stale files from an earlier attempt are purged, never reused.
async fn reset_dir(dir: &Path) -> std::io::Result<()> {
    if tokio::fs::try_exists(dir).await? {
        tokio::fs::remove_dir_all(dir).await?;
    }
    tokio::fs::create_dir_all(dir).await
}
