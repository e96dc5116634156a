use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Pipeline stage a job failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Conversion,
    Derivatives,
    Metadata,
    Upload,
    Publish,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Conversion => "conversion",
            Stage::Derivatives => "derivatives",
            Stage::Metadata => "metadata",
            Stage::Upload => "upload",
            Stage::Publish => "publish",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed job payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid job: {0}")]
    Invalid(#[from] validator::ValidationErrors),
}

/// Failure reported by the transcoding capability.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("{0} not found in PATH")]
    NotFound(&'static str),

    #[error("{program} exited with status {code:?}: {stderr}")]
    Failed {
        program: &'static str,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{program} timed out after {secs} seconds")]
    Timeout { program: &'static str, secs: u64 },

    #[error("missing output {}", .0.display())]
    MissingOutput(PathBuf),

    #[error("cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TranscodeError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TranscodeError::Timeout { .. } | TranscodeError::Io(_))
    }
}

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("cannot read size: {0}")]
    Size(#[source] std::io::Error),

    #[error("cannot probe duration: {0}")]
    Duration(#[source] TranscodeError),

    #[error("unusable duration {0:?}")]
    UnusableDuration(String),

    #[error("result field {0} is empty")]
    Incomplete(&'static str),
}

/// Job-level failure. Whatever stage produced it, the job publishes nothing.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("conversion failed: {0}")]
    Conversion(#[source] TranscodeError),

    #[error("derivative generation failed ({derivative}): {source}")]
    Generation {
        derivative: &'static str,
        #[source]
        source: TranscodeError,
    },

    #[error("metadata extraction failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("upload failed: {0}")]
    Upload(#[source] anyhow::Error),

    #[error("job cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Conversion(_) => Some(Stage::Conversion),
            PipelineError::Generation { .. } => Some(Stage::Derivatives),
            PipelineError::Metadata(_) => Some(Stage::Metadata),
            PipelineError::Upload(_) => Some(Stage::Upload),
            PipelineError::Cancelled => None,
        }
    }

    /// Whether a redelivery of the same job has a chance of succeeding.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Conversion(e) => e.is_retryable(),
            PipelineError::Generation { source, .. } => source.is_retryable(),
            PipelineError::Metadata(MetadataError::Size(_)) => true,
            PipelineError::Metadata(MetadataError::Duration(e)) => e.is_retryable(),
            PipelineError::Metadata(_) => false,
            PipelineError::Upload(_) => true,
            PipelineError::Cancelled => true,
        }
    }
}

/// Lost completion notice. Logged, never escalated to a job failure.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("cannot serialize result: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("broker publish failed: {0}")]
    Broker(#[source] anyhow::Error),
}

/// Outcome of one delivery at the handler boundary.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
