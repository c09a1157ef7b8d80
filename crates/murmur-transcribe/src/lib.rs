//! Transcription backend library for murmur.
//!
//! This crate provides a trait-based abstraction over hosted speech-to-text
//! providers, with an implementation for OpenAI's transcription API.

mod openai;

use std::path::Path;

use async_trait::async_trait;
use murmur_core::{ResponseFormat, TranscriptionOptions};
pub use openai::{OpenAIClient, OpenAIConfig};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur during transcription.
#[derive(Debug, Error)]
pub enum TranscribeError {
    #[error("API returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("No API key configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Failed to read audio: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),
}

impl TranscribeError {
    /// Upstream HTTP status, when the provider answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Result type for transcription operations.
pub type Result<T> = std::result::Result<T, TranscribeError>;

/// A transcription as returned by the provider.
#[derive(Debug, Clone, PartialEq)]
pub enum Transcript {
    /// Body of a `json` or `verbose_json` response, kept verbatim.
    Json(Value),
    /// Body of a `text`, `srt` or `vtt` response, kept verbatim.
    Plain {
        format: ResponseFormat,
        body: String,
    },
}

impl Transcript {
    /// A bare `{"text": ...}` transcript, the shape merged results take.
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::Json(serde_json::json!({ "text": text.into() }))
    }

    /// The recognized text, if this transcript carries it on its own.
    ///
    /// Subtitle bodies interleave text with cue timings and return `None`.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Json(value) => value.get("text").and_then(Value::as_str),
            Self::Plain {
                format: ResponseFormat::Text,
                body,
            } => Some(body.as_str()),
            Self::Plain { .. } => None,
        }
    }

    /// Content type to answer the caller with.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json(_) => ResponseFormat::Json.content_type(),
            Self::Plain { format, .. } => format.content_type(),
        }
    }
}

/// Trait for transcription backends.
///
/// Implement this trait to add new transcription providers. Implementations
/// hold no per-request state and are shared between concurrent calls.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `audio`.
    ///
    /// The transcript keeps whatever shape `options.response_format` asked
    /// the provider for.
    async fn transcribe(&self, audio: &Path, options: &TranscriptionOptions)
    -> Result<Transcript>;

    /// Transcribe one segment of a split file and return its text.
    ///
    /// `index` is the segment position, starting at zero. The prompt is
    /// tagged with the segment number so the provider keeps some context
    /// between parts.
    async fn transcribe_segment(
        &self,
        audio: &Path,
        options: &TranscriptionOptions,
        index: usize,
    ) -> Result<String> {
        let options = options.for_segment(index);
        let transcript = self.transcribe(audio, &options).await?;
        transcript.text().map(str::to_owned).ok_or_else(|| {
            TranscribeError::TranscriptionFailed(format!("segment {index} returned no text"))
        })
    }

    /// Returns the name of this transcriber for logging/debugging.
    fn name(&self) -> &str;
}
