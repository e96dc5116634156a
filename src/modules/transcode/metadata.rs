use std::path::Path;

use tokio_util::sync::CancellationToken;

use super::error::MetadataError;
use super::traits::Transcoder;

/// Facts about the canonical file, carried into the result record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetadata {
    pub size_bytes: String,
    pub duration: String,
}

/// Byte size of the file as a decimal string.
pub async fn get_size(path: &Path) -> std::io::Result<String> {
    let metadata = tokio::fs::metadata(path).await?;
    Ok(metadata.len().to_string())
}

pub async fn extract(
    transcoder: &dyn Transcoder,
    canonical: &Path,
    cancel: &CancellationToken,
) -> Result<DerivedMetadata, MetadataError> {
    let size_bytes = get_size(canonical).await.map_err(MetadataError::Size)?;
    let raw = transcoder
        .probe_duration(canonical, cancel)
        .await
        .map_err(MetadataError::Duration)?;

    Ok(DerivedMetadata {
        size_bytes,
        duration: normalize_duration(&raw)?,
    })
}

/// Accepts whatever decimal seconds the inspector printed; rejects blanks and sentinels.
fn normalize_duration(raw: &str) -> Result<String, MetadataError> {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(trimmed.to_string()),
        _ => Err(MetadataError::UnusableDuration(trimmed.to_string())),
    }
}
