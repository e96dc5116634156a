use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::error::DecodeError;
use super::layout::{collides_with_derivative, JobLayout, MAX_FILE_NAME_BYTES};
use super::metadata::DerivedMetadata;

/// Inbound job as published by the upload service.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct JobRequest {
    #[serde(rename = "UserId")]
    #[validate(custom(function = "validate_segment"))]
    pub user_id: String,
    #[serde(rename = "VideoUploadId")]
    #[validate(custom(function = "validate_not_blank"))]
    pub upload_id: String,
    #[serde(rename = "Url")]
    #[validate(custom(function = "validate_not_blank"))]
    pub source_url: String,
    #[serde(rename = "FileName")]
    #[validate(custom(function = "validate_file_name"))]
    pub file_name: String,
}

impl JobRequest {
    /// Decodes and validates one inbound payload. Nothing runs for a job that fails here.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let job: JobRequest = serde_json::from_slice(payload)?;
        job.validate()?;
        Ok(job)
    }
}

fn validate_not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

// user_id and file_name become path and URL segments.
fn validate_segment(value: &str) -> Result<(), ValidationError> {
    validate_not_blank(value)?;
    if value == "." || value == ".." || value.contains(['/', '\\', '\0']) {
        return Err(ValidationError::new("unsafe_path_segment"));
    }
    Ok(())
}

// file_name also names the canonical file next to the derivatives.
fn validate_file_name(value: &str) -> Result<(), ValidationError> {
    validate_segment(value)?;
    if value.len() > MAX_FILE_NAME_BYTES {
        return Err(ValidationError::new("file_name_too_long"));
    }
    if collides_with_derivative(value) {
        return Err(ValidationError::new("reserved_file_name"));
    }
    Ok(())
}

/// Completion notice published once per successful job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscodeResult {
    pub user_id: String,
    #[serde(rename = "video_upload_id")]
    pub upload_id: String,
    pub transcoded_url: String,
    pub download_size: String,
    pub stream_url: String,
    pub preview_url: String,
    pub duration: String,
}

impl TranscodeResult {
    pub fn new(job: &JobRequest, layout: &JobLayout, metadata: DerivedMetadata) -> Self {
        Self {
            user_id: job.user_id.clone(),
            upload_id: job.upload_id.clone(),
            transcoded_url: layout.transcoded_url(),
            download_size: metadata.size_bytes,
            stream_url: layout.stream_url(),
            preview_url: layout.preview_url(),
            duration: metadata.duration,
        }
    }

    /// Name of the first empty field, if any.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("user_id", &self.user_id),
            ("video_upload_id", &self.upload_id),
            ("transcoded_url", &self.transcoded_url),
            ("download_size", &self.download_size),
            ("stream_url", &self.stream_url),
            ("preview_url", &self.preview_url),
            ("duration", &self.duration),
        ]
        .into_iter()
        .find(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
