use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::modules::transcode::error::{JobError, PipelineError};
use crate::modules::transcode::events::{JobRequest, TranscodeResult};
use crate::modules::transcode::service::TranscodePipeline;

/// What happens to a delivery once its job is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Done, remove from the queue.
    Ack,
    /// Put back for another attempt.
    Requeue,
    /// Rejected without requeue; the broker routes it to a dead-letter
    /// exchange if the queue has one.
    DeadLetter,
}

#[derive(Clone)]
pub struct JobHandler {
    pipeline: Arc<TranscodePipeline>,
}

impl JobHandler {
    pub fn new(pipeline: Arc<TranscodePipeline>) -> Self {
        Self { pipeline }
    }

    /// Decodes and runs one delivery. Never fails: every outcome maps to a
    /// disposition for the broker.
    pub async fn handle(
        &self,
        payload: &[u8],
        redelivered: bool,
        cancel: &CancellationToken,
    ) -> Disposition {
        let outcome = self.run(payload, cancel).await;
        let disposition = disposition_for(&outcome, redelivered);

        match &outcome {
            Ok(result) => info!(
                upload_id = %result.upload_id,
                stream_url = %result.stream_url,
                "✅ Transcode job acknowledged"
            ),
            Err(JobError::Decode(e)) => error!("❌ Discarding undecodable job: {}", e),
            Err(JobError::Pipeline(PipelineError::Cancelled)) => {
                warn!("⏹️ Job interrupted by shutdown, returning it to the queue")
            }
            Err(JobError::Pipeline(e)) => error!(
                stage = %e.stage().map(|s| s.to_string()).unwrap_or_default(),
                redelivered,
                ?disposition,
                "❌ Transcode job failed: {}", e
            ),
        }
        disposition
    }

    async fn run(
        &self,
        payload: &[u8],
        cancel: &CancellationToken,
    ) -> Result<TranscodeResult, JobError> {
        let job = JobRequest::decode(payload)?;
        info!(
            upload_id = %job.upload_id,
            user_id = %job.user_id,
            file_name = %job.file_name,
            "📦 Received transcoding job"
        );
        Ok(self.pipeline.process(&job, cancel).await?)
    }
}

/// Transient failures get one more attempt; a second failure, or any
/// permanent one, goes to the dead-letter path so it cannot loop forever.
///
/// "Second" is judged by the broker's `redelivered` flag, which is also set
/// after a shutdown requeue. A job interrupted by shutdown therefore has no
/// transient retry left on its next run.
pub fn disposition_for(
    outcome: &Result<TranscodeResult, JobError>,
    redelivered: bool,
) -> Disposition {
    match outcome {
        Ok(_) => Disposition::Ack,
        Err(JobError::Decode(_)) => Disposition::DeadLetter,
        Err(JobError::Pipeline(PipelineError::Cancelled)) => Disposition::Requeue,
        Err(JobError::Pipeline(e)) if e.is_retryable() && !redelivered => Disposition::Requeue,
        Err(JobError::Pipeline(_)) => Disposition::DeadLetter,
    }
}
