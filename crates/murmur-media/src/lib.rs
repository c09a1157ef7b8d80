//! Audio handling for murmur.
//!
//! Everything here works on files in the scratch directory: measuring how
//! long a recording is, cutting it into time-bounded segments and turning
//! uncompressed wave files into something smaller. The heavy lifting is
//! done by the `ffmpeg` and `ffprobe` binaries; wave headers are read
//! natively.

mod convert;
mod probe;
mod segment;
mod tool;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

pub use convert::FfmpegTranscoder;
pub use probe::{Ffprobe, MediaProber, WavProber};
pub use segment::{FfmpegSegmenter, SegmentSpan, plan_segments};

/// Errors that can occur while inspecting or rewriting audio files.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("failed to probe {}: {reason}", path.display())]
    Probe { path: PathBuf, reason: String },

    #[error("failed to split audio file: {0}")]
    Segmentation(#[source] Box<MediaError>),

    #[error("failed to convert audio file: {0}")]
    Conversion(#[source] Box<MediaError>),

    #[error("{tool} exited with {status}: {stderr}")]
    ToolFailed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("{0} not found, install ffmpeg and make sure it is on PATH")]
    ToolMissing(String),

    #[error("source has no audio to split")]
    Empty,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MediaError {
    pub(crate) fn segmentation(err: MediaError) -> Self {
        Self::Segmentation(Box::new(err))
    }

    pub(crate) fn conversion(err: MediaError) -> Self {
        Self::Conversion(Box::new(err))
    }
}

/// Result type for media operations.
pub type Result<T> = std::result::Result<T, MediaError>;

/// Extensions of uncompressed wave containers.
const WAVE_EXTENSIONS: &[&str] = &["wav", "wave"];

/// An audio file sitting in the scratch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    path: PathBuf,
    size_bytes: u64,
    extension: Option<String>,
}

impl AudioSource {
    /// Describes the file at `path`, reading its size from disk.
    pub async fn from_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let size_bytes = tokio::fs::metadata(&path).await?.len();
        Ok(Self::new(path, size_bytes))
    }

    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let extension = extension_of(&path);
        Self {
            path,
            size_bytes,
            extension,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Lowercased extension without the dot.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// Whether the file is an uncompressed wave container.
    pub fn is_wave(&self) -> bool {
        self.extension().is_some_and(is_wave_extension)
    }
}

pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub(crate) fn is_wave_extension(ext: &str) -> bool {
    WAVE_EXTENSIONS.contains(&ext)
}

/// A time-bounded slice of an audio source, written to its own file.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    /// Position in the source, starting at zero
    pub index: usize,
    pub start_secs: f64,
    pub duration_secs: f64,
    pub path: PathBuf,
}

/// Measures how long an audio file plays.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns the duration of the file at `path` in seconds.
    async fn probe_duration(&self, path: &Path) -> Result<f64>;
}

/// Cuts an audio source into segment files.
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Splits `source` into segments of at most `max_chunk_secs` seconds,
    /// written into `output_dir`, ordered by index.
    ///
    /// Files already written when a later segment fails are left in place;
    /// the caller owns `output_dir` and cleans it up.
    async fn segment(
        &self,
        source: &AudioSource,
        max_chunk_secs: f64,
        output_dir: &Path,
    ) -> Result<Vec<Segment>>;
}

/// Re-encodes audio into a compressed format.
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Converts `source` into a compressed file at `output`.
    ///
    /// The output format follows the extension of `output`.
    async fn compress(&self, source: &AudioSource, output: &Path) -> Result<()>;
}
