//! Transcribing files too large for a single provider call.
//!
//! Small files go to the provider as they are. Anything above the size
//! threshold is cut into fixed-length segments which are transcribed
//! concurrently and stitched back together in order. Only text survives
//! stitching: subtitle and verbose formats are not merged across segments.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::try_join_all;
use murmur_core::{MB, TranscriptionOptions};
use murmur_media::{AudioSource, Segmenter};
use murmur_transcribe::{Transcriber, Transcript};
use tracing::{info, warn};
use uuid::Uuid;

use crate::cleanup::CleanupList;
use crate::error::Result;

/// Thresholds deciding when and how a file is split.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkLimits {
    /// Files above this many MB are split
    pub max_single_file_mb: f64,
    /// Length of each segment in seconds
    pub max_chunk_secs: f64,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_single_file_mb: 24.0,
            max_chunk_secs: 24.0,
        }
    }
}

impl ChunkLimits {
    /// Whether a file of `size_bytes` has to be split.
    pub fn needs_split(&self, size_bytes: u64) -> bool {
        size_bytes as f64 / MB as f64 > self.max_single_file_mb
    }
}

/// Text recognized for one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub index: usize,
    pub text: String,
}

/// Joins segment texts with a single space, in segment order.
pub fn merge_segments(mut results: Vec<SegmentResult>) -> String {
    results.sort_by_key(|result| result.index);
    results
        .into_iter()
        .map(|result| result.text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Routes a source down the direct or the segmented path.
pub struct ChunkOrchestrator {
    transcriber: Arc<dyn Transcriber>,
    segmenter: Arc<dyn Segmenter>,
    limits: ChunkLimits,
    scratch_dir: PathBuf,
}

impl ChunkOrchestrator {
    pub fn new(
        transcriber: Arc<dyn Transcriber>,
        segmenter: Arc<dyn Segmenter>,
        limits: ChunkLimits,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            transcriber,
            segmenter,
            limits,
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn limits(&self) -> ChunkLimits {
        self.limits
    }

    /// Transcribes `source`, splitting it first when it is too large.
    ///
    /// Segment files are registered with `cleanup` as soon as they exist.
    /// If any segment fails the whole call fails with that error and no
    /// partial transcript is produced.
    pub async fn process(
        &self,
        source: &AudioSource,
        options: &TranscriptionOptions,
        cleanup: &CleanupList,
    ) -> Result<Transcript> {
        if !self.limits.needs_split(source.size_bytes()) {
            info!(
                transcriber = self.transcriber.name(),
                bytes = source.size_bytes(),
                "Transcribing file directly"
            );
            return Ok(self.transcriber.transcribe(source.path(), options).await?);
        }

        let output_dir = self
            .scratch_dir
            .join(format!("segments_{}", Uuid::new_v4().simple()));
        cleanup.push(&output_dir);

        let mut segments = self
            .segmenter
            .segment(source, self.limits.max_chunk_secs, &output_dir)
            .await?;
        segments.sort_by_key(|segment| segment.index);
        cleanup.extend(segments.iter().map(|segment| segment.path.clone()));

        info!(
            transcriber = self.transcriber.name(),
            bytes = source.size_bytes(),
            segments = segments.len(),
            "Transcribing file in segments"
        );

        let calls = segments.iter().map(|segment| async move {
            let text = self
                .transcriber
                .transcribe_segment(&segment.path, options, segment.index)
                .await
                .inspect_err(|e| {
                    warn!(index = segment.index, error = %e, "Segment transcription failed")
                })?;
            Ok::<_, crate::error::PipelineError>(SegmentResult {
                index: segment.index,
                text,
            })
        });
        let results = try_join_all(calls).await?;

        Ok(Transcript::from_text(merge_segments(results)))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use murmur_core::ResponseFormat;
    use murmur_media::{MediaError, Segment};
    use murmur_transcribe::TranscribeError;
    use parking_lot::Mutex;

    use super::*;
    use crate::error::PipelineError;

    /// Writes `count` tiny segment files.
    struct FakeSegmenter {
        count: usize,
    }

    #[async_trait]
    impl Segmenter for FakeSegmenter {
        async fn segment(
            &self,
            _source: &AudioSource,
            max_chunk_secs: f64,
            output_dir: &Path,
        ) -> murmur_media::Result<Vec<Segment>> {
            tokio::fs::create_dir_all(output_dir).await?;
            let mut segments = Vec::new();
            for index in 0..self.count {
                let path = output_dir.join(format!("segment_{index:03}.mp3"));
                tokio::fs::write(&path, b"ID3").await?;
                segments.push(Segment {
                    index,
                    start_secs: index as f64 * max_chunk_secs,
                    duration_secs: max_chunk_secs,
                    path,
                });
            }
            Ok(segments)
        }
    }

    /// Answers `part <n>` per segment, finishing later segments first.
    #[derive(Default)]
    struct FakeTranscriber {
        fail_index: Option<usize>,
        direct_calls: Mutex<Vec<TranscriptionOptions>>,
        completed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Transcriber for FakeTranscriber {
        async fn transcribe(
            &self,
            audio: &Path,
            options: &TranscriptionOptions,
        ) -> murmur_transcribe::Result<Transcript> {
            let name = audio.file_name().unwrap().to_string_lossy().to_string();
            let Some(index) = name
                .strip_prefix("segment_")
                .and_then(|rest| rest.strip_suffix(".mp3"))
                .and_then(|n| n.parse::<usize>().ok())
            else {
                self.direct_calls.lock().push(options.clone());
                return Ok(Transcript::Plain {
                    format: options.response_format,
                    body: "whole file".to_string(),
                });
            };

            tokio::time::sleep(Duration::from_millis(40 - 10 * index as u64)).await;
            if self.fail_index == Some(index) {
                return Err(TranscribeError::Api {
                    status: 500,
                    message: format!("segment {index} broke"),
                });
            }
            self.completed.lock().push(index);
            Ok(Transcript::from_text(format!(
                "part {} [{}]",
                index,
                options.prompt.as_deref().unwrap_or_default()
            )))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn orchestrator(
        transcriber: Arc<FakeTranscriber>,
        segments: usize,
        scratch: &Path,
    ) -> ChunkOrchestrator {
        ChunkOrchestrator::new(
            transcriber,
            Arc::new(FakeSegmenter { count: segments }),
            ChunkLimits::default(),
            scratch,
        )
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let limits = ChunkLimits::default();
        assert!(!limits.needs_split(24 * MB));
        assert!(limits.needs_split(24 * MB + 1));
        assert!(!limits.needs_split(0));
    }

    #[test]
    fn test_merge_orders_by_index() {
        let merged = merge_segments(vec![
            SegmentResult {
                index: 2,
                text: "three".to_string(),
            },
            SegmentResult {
                index: 0,
                text: "one".to_string(),
            },
            SegmentResult {
                index: 1,
                text: "two".to_string(),
            },
        ]);
        assert_eq!(merged, "one two three");
        assert_eq!(merge_segments(Vec::new()), "");
    }

    #[tokio::test]
    async fn test_direct_path_keeps_format() {
        let scratch = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::default());
        let orchestrator = orchestrator(transcriber.clone(), 3, scratch.path());
        let source = AudioSource::new(scratch.path().join("talk.mp3"), 24 * MB);
        let options = TranscriptionOptions::new("whisper-1")
            .with_response_format(ResponseFormat::Vtt)
            .with_prompt("Keynote");
        let cleanup = CleanupList::new();

        let transcript = orchestrator
            .process(&source, &options, &cleanup)
            .await
            .unwrap();

        assert_eq!(
            transcript,
            Transcript::Plain {
                format: ResponseFormat::Vtt,
                body: "whole file".to_string()
            }
        );
        assert_eq!(transcriber.direct_calls.lock().as_slice(), &[options]);
        assert!(cleanup.paths().is_empty());
    }

    #[tokio::test]
    async fn test_segmented_path_merges_in_order() {
        let scratch = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber::default());
        let orchestrator = orchestrator(transcriber.clone(), 3, scratch.path());
        let source = AudioSource::new(scratch.path().join("talk.mp3"), 24 * MB + 1);
        let options = TranscriptionOptions::new("whisper-1")
            .with_response_format(ResponseFormat::Srt)
            .with_prompt("Keynote");
        let cleanup = CleanupList::new();

        let transcript = orchestrator
            .process(&source, &options, &cleanup)
            .await
            .unwrap();

        assert_eq!(
            transcript.text(),
            Some(
                "part 0 [Keynote (Part 1)] part 1 [Keynote (Part 2)] part 2 [Keynote (Part 3)]"
            )
        );
        assert!(matches!(transcript, Transcript::Json(_)));
        // later segments finished first
        assert_eq!(transcriber.completed.lock().as_slice(), &[2, 1, 0]);
        // segment directory plus three segment files
        assert_eq!(cleanup.paths().len(), 4);
        assert!(transcriber.direct_calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_one_failed_segment_fails_request() {
        let scratch = tempfile::tempdir().unwrap();
        let transcriber = Arc::new(FakeTranscriber {
            fail_index: Some(1),
            ..Default::default()
        });
        let orchestrator = orchestrator(transcriber, 3, scratch.path());
        let source = AudioSource::new(scratch.path().join("talk.mp3"), 30 * MB);
        let cleanup = CleanupList::new();

        let err = orchestrator
            .process(&source, &TranscriptionOptions::new("whisper-1"), &cleanup)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Transcription(TranscribeError::Api { message, .. })
                if message == "segment 1 broke"
        ));
        assert_eq!(cleanup.paths().len(), 4);
        cleanup.run().await;
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_segmentation_failure_keeps_dir_registered() {
        struct Broken;

        #[async_trait]
        impl Segmenter for Broken {
            async fn segment(
                &self,
                _source: &AudioSource,
                _max_chunk_secs: f64,
                output_dir: &Path,
            ) -> murmur_media::Result<Vec<Segment>> {
                tokio::fs::create_dir_all(output_dir).await?;
                tokio::fs::write(output_dir.join("segment_000.mp3"), b"ID3").await?;
                Err(MediaError::Segmentation(Box::new(MediaError::ToolMissing(
                    "ffmpeg".to_string(),
                ))))
            }
        }

        let scratch = tempfile::tempdir().unwrap();
        let orchestrator = ChunkOrchestrator::new(
            Arc::new(FakeTranscriber::default()),
            Arc::new(Broken),
            ChunkLimits::default(),
            scratch.path(),
        );
        let source = AudioSource::new(scratch.path().join("talk.mp3"), 100 * MB);
        let cleanup = CleanupList::new();

        let err = orchestrator
            .process(&source, &TranscriptionOptions::new("whisper-1"), &cleanup)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Media(MediaError::Segmentation(_))));
        cleanup.run().await;
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_independent_limits() {
        struct RecordChunk(Mutex<Option<f64>>);

        #[async_trait]
        impl Segmenter for RecordChunk {
            async fn segment(
                &self,
                _source: &AudioSource,
                max_chunk_secs: f64,
                _output_dir: &Path,
            ) -> murmur_media::Result<Vec<Segment>> {
                *self.0.lock() = Some(max_chunk_secs);
                Ok(Vec::new())
            }
        }

        let scratch = tempfile::tempdir().unwrap();
        let segmenter = Arc::new(RecordChunk(Mutex::new(None)));
        let orchestrator = ChunkOrchestrator::new(
            Arc::new(FakeTranscriber::default()),
            segmenter.clone(),
            ChunkLimits {
                max_single_file_mb: 1.0,
                max_chunk_secs: 600.0,
            },
            scratch.path(),
        );
        let source = AudioSource::new(scratch.path().join("talk.mp3"), 2 * MB);

        orchestrator
            .process(
                &source,
                &TranscriptionOptions::new("whisper-1"),
                &CleanupList::new(),
            )
            .await
            .unwrap();

        assert_eq!(*segmenter.0.lock(), Some(600.0));
    }
}
