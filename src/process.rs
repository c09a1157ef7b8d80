use std::sync::Arc;
use std::time::Instant;

use murmur_core::{Config, RequestParams, TranscriptionOptions};
use murmur_media::{
    AudioSource, FfmpegSegmenter, FfmpegTranscoder, Ffprobe, MediaProber, Transcoder,
};
use murmur_transcribe::{Transcriber, Transcript};
use tracing::{debug, info};

use crate::acquire::Acquirer;
use crate::chunked::{ChunkLimits, ChunkOrchestrator};
use crate::cleanup::{CleanupGuard, CleanupList};
use crate::error::Result;

/// An upload that has been stored, along with the parameters that came
/// with it.
#[derive(Debug)]
pub struct Upload {
    pub source: AudioSource,
    pub params: RequestParams,
}

/// Processing pipeline for one transcription request. Carries the audio
/// from the scratch directory through conversion and transcription, and
/// removes every temporary file once the request is done.
pub struct TranscriptionPipeline {
    acquirer: Acquirer,
    orchestrator: ChunkOrchestrator,
    transcoder: Option<Arc<dyn Transcoder>>,
    model: String,
}

impl TranscriptionPipeline {
    /// Create a new pipeline. Wave sources are only converted when a
    /// `transcoder` is given.
    pub fn new(
        acquirer: Acquirer,
        orchestrator: ChunkOrchestrator,
        transcoder: Option<Arc<dyn Transcoder>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            acquirer,
            orchestrator,
            transcoder,
            model: model.into(),
        }
    }

    /// Wires the ffmpeg backed media stages from `config` around
    /// `transcriber`.
    pub fn from_config(config: &Config, transcriber: Arc<dyn Transcriber>) -> Self {
        let scratch_dir = config.scratch_dir();
        let prober = Arc::new(MediaProber::new(Ffprobe::new(config.ffprobe())));
        let segmenter = Arc::new(FfmpegSegmenter::new(config.ffmpeg(), prober));
        let transcoder: Option<Arc<dyn Transcoder>> = config
            .convert_wave
            .then(|| Arc::new(FfmpegTranscoder::new(config.ffmpeg())) as Arc<dyn Transcoder>);

        let limits = ChunkLimits {
            max_single_file_mb: config.max_single_file_mb,
            max_chunk_secs: config.max_chunk_secs,
        };

        Self::new(
            Acquirer::new(&scratch_dir, config.max_upload_bytes())
                .with_download_timeout(config.request_timeout()),
            ChunkOrchestrator::new(transcriber, segmenter, limits, scratch_dir),
            transcoder,
            config.model(),
        )
    }

    pub fn acquirer(&self) -> &Acquirer {
        &self.acquirer
    }

    /// Downloads `url` and transcribes it.
    ///
    /// Parameters are validated before anything is fetched.
    pub async fn transcribe_url(&self, url: &str, params: RequestParams) -> Result<Transcript> {
        let options = params.into_options(&self.model)?;
        let guard = CleanupGuard::new(CleanupList::new());

        let result = async {
            let cleanup = guard.list();
            let source = self.acquirer.download(url, cleanup).await?;
            self.transcribe_source(source, &options, cleanup).await
        }
        .await;

        finish(result, guard).await
    }

    /// Stores an upload with `receive` and transcribes it.
    ///
    /// `receive` gets a handle to the acquirer and to this request's cleanup
    /// list, and is expected to register whatever it writes. Parameters
    /// usually arrive interleaved with the file, so they are validated once
    /// the upload is complete but before any transcription call is made.
    pub async fn transcribe_upload<F, Fut>(&self, receive: F) -> Result<Transcript>
    where
        F: FnOnce(Acquirer, CleanupList) -> Fut,
        Fut: Future<Output = Result<Upload>>,
    {
        let guard = CleanupGuard::new(CleanupList::new());

        let result = async {
            let cleanup = guard.list();
            let upload = receive(self.acquirer.clone(), cleanup.clone()).await?;
            let options = upload.params.into_options(&self.model)?;
            self.transcribe_source(upload.source, &options, cleanup).await
        }
        .await;

        finish(result, guard).await
    }

    async fn transcribe_source(
        &self,
        source: AudioSource,
        options: &TranscriptionOptions,
        cleanup: &CleanupList,
    ) -> Result<Transcript> {
        let source = self.normalize(source, cleanup).await?;

        let before = Instant::now();
        let transcript = self.orchestrator.process(&source, options, cleanup).await?;
        let duration = before.elapsed();

        let mb_per_second =
            source.size_bytes() as f64 / (1024.0 * 1024.0) / duration.as_secs_f64();
        info!(
            duration = ?duration,
            bytes = source.size_bytes(),
            mb_per_second,
            format = %options.response_format,
            "transcription completed"
        );
        Ok(transcript)
    }

    /// Converts wave sources to mp3 when conversion is enabled.
    async fn normalize(&self, source: AudioSource, cleanup: &CleanupList) -> Result<AudioSource> {
        let Some(transcoder) = self.transcoder.as_ref().filter(|_| source.is_wave()) else {
            return Ok(source);
        };

        let output = self.acquirer.scratch_path("converted", "mp3");
        cleanup.push(&output);
        transcoder.compress(&source, &output).await?;

        let converted = AudioSource::from_path(output).await?;
        info!(
            original_bytes = source.size_bytes(),
            converted_bytes = converted.size_bytes(),
            "converted wave audio"
        );
        Ok(converted)
    }
}

/// Removes the request's temporary files, whatever the outcome. A request
/// dropped before reaching this point is cleaned up by the guard instead.
async fn finish(result: Result<Transcript>, guard: CleanupGuard) -> Result<Transcript> {
    let removed = guard.run().await;
    debug!(removed, ok = result.is_ok(), "request finished");
    result
}
