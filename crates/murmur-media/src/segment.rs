//! Splitting long recordings into fixed-length segments.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{AudioSource, MediaError, Prober, Result, Segment, Segmenter, tool};

/// Where one segment starts and how long it runs, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentSpan {
    pub start_secs: f64,
    pub duration_secs: f64,
}

/// Computes the spans covering `duration_secs` in steps of `max_chunk_secs`.
///
/// Yields `ceil(duration / max_chunk)` spans starting at `0, L, 2L, ...`.
/// Every span but the last is exactly `max_chunk_secs` long; the last one
/// ends where the source ends. A zero duration yields no spans, as does a
/// chunk length that is not a positive number.
pub fn plan_segments(duration_secs: f64, max_chunk_secs: f64) -> Vec<SegmentSpan> {
    if !(max_chunk_secs.is_finite() && max_chunk_secs > 0.0) {
        return Vec::new();
    }
    if !(duration_secs.is_finite() && duration_secs > 0.0) {
        return Vec::new();
    }

    let count = (duration_secs / max_chunk_secs).ceil() as usize;
    (0..count)
        .map(|i| {
            let start_secs = i as f64 * max_chunk_secs;
            SegmentSpan {
                start_secs,
                duration_secs: max_chunk_secs.min(duration_secs - start_secs),
            }
        })
        // float rounding can leave an empty tail
        .filter(|span| span.duration_secs > 0.0)
        .collect()
}

/// Splits audio with `ffmpeg`, one invocation per segment.
pub struct FfmpegSegmenter {
    ffmpeg: PathBuf,
    prober: Arc<dyn Prober>,
}

impl FfmpegSegmenter {
    pub fn new(ffmpeg: impl Into<PathBuf>, prober: Arc<dyn Prober>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            prober,
        }
    }

    async fn extract(&self, input: &Path, span: &SegmentSpan, output: &Path) -> Result<()> {
        let args: Vec<OsString> = vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-ss".into(),
            format!("{:.3}", span.start_secs).into(),
            "-i".into(),
            input.into(),
            "-t".into(),
            format!("{:.3}", span.duration_secs).into(),
            "-vn".into(),
            output.into(),
        ];
        tool::run(&self.ffmpeg, args).await?;
        Ok(())
    }
}

#[async_trait]
impl Segmenter for FfmpegSegmenter {
    async fn segment(
        &self,
        source: &AudioSource,
        max_chunk_secs: f64,
        output_dir: &Path,
    ) -> Result<Vec<Segment>> {
        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| MediaError::segmentation(e.into()))?;

        let duration = self
            .prober
            .probe_duration(source.path())
            .await
            .map_err(MediaError::segmentation)?;

        let spans = plan_segments(duration, max_chunk_secs);
        if spans.is_empty() {
            return Err(MediaError::segmentation(MediaError::Empty));
        }

        info!(
            duration_secs = duration,
            max_chunk_secs,
            segments = spans.len(),
            "Splitting audio"
        );

        let mut segments = Vec::with_capacity(spans.len());
        for (index, span) in spans.iter().enumerate() {
            let path = output_dir.join(format!("segment_{index:03}.mp3"));
            self.extract(source.path(), span, &path)
                .await
                .map_err(MediaError::segmentation)?;
            debug!(index, start_secs = span.start_secs, path = ?path, "Wrote segment");

            segments.push(Segment {
                index,
                start_secs: span.start_secs,
                duration_secs: span.duration_secs,
                path,
            });
        }

        Ok(segments)
    }
}
