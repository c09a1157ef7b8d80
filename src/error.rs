use murmur_core::OptionsError;
use murmur_media::MediaError;
use murmur_transcribe::TranscribeError;
use thiserror::Error;

/// Everything that can end a transcription request early.
///
/// Component errors keep their kind on the way up; only the HTTP layer
/// decides what status each kind becomes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Bad input the caller can fix
    #[error("{0}")]
    Validation(String),

    /// Upload exceeds the configured limit
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Fetching a remote source failed
    #[error("Failed to download audio: {0}")]
    Download(String),

    /// Probing, splitting or converting failed
    #[error(transparent)]
    Media(#[from] MediaError),

    /// The provider rejected or failed the request
    #[error(transparent)]
    Transcription(#[from] TranscribeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<OptionsError> for PipelineError {
    fn from(err: OptionsError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
