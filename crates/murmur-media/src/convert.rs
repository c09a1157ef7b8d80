//! Re-encoding uncompressed audio before it goes upstream.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use crate::{AudioSource, MediaError, Result, Transcoder, tool};

/// Re-encodes audio with `ffmpeg`, which picks the codec from the output
/// extension.
#[derive(Debug, Clone)]
pub struct FfmpegTranscoder {
    ffmpeg: PathBuf,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn compress(&self, source: &AudioSource, output: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-i".into(),
            source.path().into(),
            "-vn".into(),
            output.into(),
        ];
        tool::run(&self.ffmpeg, args)
            .await
            .map_err(MediaError::conversion)?;

        info!(input = ?source.path(), output = ?output, "Converted audio");
        Ok(())
    }
}
