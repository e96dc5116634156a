use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::PipelineError;
use super::layout::JobLayout;
use super::traits::Transcoder;

/// Preview clip, bitrate ladder, then master playlist. The first failure
/// ends the stage; there is no partial derivative set.
pub async fn generate(
    transcoder: &dyn Transcoder,
    canonical: &Path,
    job: &JobLayout,
    cancel: &CancellationToken,
) -> Result<(), PipelineError> {
    debug!(file_name = %job.file_name(), "Generating short clip");
    transcoder
        .short_clip(canonical, job, cancel)
        .await
        .map_err(|source| PipelineError::Generation { derivative: "short_clip", source })?;

    debug!(file_name = %job.file_name(), "Generating renditions");
    transcoder
        .renditions(canonical, job, cancel)
        .await
        .map_err(|source| PipelineError::Generation { derivative: "renditions", source })?;

    debug!(file_name = %job.file_name(), "Generating master playlist");
    transcoder
        .master_playlist(job)
        .await
        .map_err(|source| PipelineError::Generation { derivative: "master_playlist", source })?;

    Ok(())
}
