//! Getting source audio onto local scratch storage.
//!
//! Audio arrives either as an upload streamed by the caller or as a URL we
//! fetch ourselves. Both end up as a uniquely named file in the scratch
//! directory, registered for cleanup before the first byte is written.

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use murmur_core::MB;
use murmur_media::AudioSource;
use reqwest::Url;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cleanup::CleanupList;
use crate::error::{PipelineError, Result};

/// MIME types accepted for uploads.
pub const ALLOWED_MIME_TYPES: &[&str] = &[
    "audio/mpeg",
    "audio/mp4",
    "audio/wav",
    "audio/x-wav",
    "audio/webm",
    "audio/ogg",
    "audio/x-m4a",
    "audio/wave",
    "audio/x-pn-wav",
    "audio/vnd.wave",
];

/// File extensions accepted for uploads, since MIME types are unreliable.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp3", "mp4", "wav", "wave", "webm", "ogg", "m4a"];

/// Extension used when nothing better is known about a download.
const FALLBACK_EXTENSION: &str = "mp3";

const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Picks the extension to store an upload under, or `None` when the upload
/// is not audio we accept.
///
/// An allowed file extension wins; otherwise the MIME type decides.
pub fn upload_extension(
    file_name: Option<&str>,
    content_type: Option<&str>,
) -> Option<&'static str> {
    file_name
        .and_then(|name| allowed_extension(Path::new(name)))
        .or_else(|| content_type.and_then(extension_for_mime))
}

fn allowed_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    ALLOWED_EXTENSIONS.iter().copied().find(|allowed| *allowed == ext)
}

fn extension_for_mime(content_type: &str) -> Option<&'static str> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    if !ALLOWED_MIME_TYPES.contains(&mime.as_str()) {
        return None;
    }
    Some(match mime.as_str() {
        "audio/mpeg" => "mp3",
        "audio/mp4" => "mp4",
        "audio/webm" => "webm",
        "audio/ogg" => "ogg",
        "audio/x-m4a" => "m4a",
        _ => "wav",
    })
}

/// Stores uploads and downloads in the scratch directory.
#[derive(Debug, Clone)]
pub struct Acquirer {
    scratch_dir: PathBuf,
    max_upload_bytes: u64,
    download_timeout: Duration,
    http: reqwest::Client,
}

impl Acquirer {
    pub fn new(scratch_dir: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_upload_bytes,
            download_timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            http: reqwest::Client::new(),
        }
    }

    /// Bounds a whole download, body included.
    pub fn with_download_timeout(mut self, timeout: Duration) -> Self {
        self.download_timeout = timeout;
        self
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// A fresh path in the scratch directory.
    pub(crate) fn scratch_path(&self, prefix: &str, extension: &str) -> PathBuf {
        self.scratch_dir
            .join(format!("{prefix}_{}.{extension}", Uuid::new_v4().simple()))
    }

    /// Streams an uploaded file to disk.
    ///
    /// Rejects files that are neither an allowed extension nor an allowed
    /// MIME type, and stops reading as soon as the upload grows past the
    /// limit. Whatever was written is left for `cleanup` to remove.
    pub async fn store_upload<S, B>(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        stream: S,
        cleanup: &CleanupList,
    ) -> Result<AudioSource>
    where
        S: Stream<Item = Result<B>>,
        B: AsRef<[u8]>,
    {
        let Some(extension) = upload_extension(file_name, content_type) else {
            return Err(PipelineError::Validation(
                "Invalid file type. Only audio files are allowed.".to_string(),
            ));
        };

        let path = self.scratch_path("upload", extension);
        cleanup.push(&path);
        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let mut file = File::create(&path).await?;

        let mut stream = std::pin::pin!(stream);
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            let chunk = chunk.as_ref();
            written += chunk.len() as u64;
            if written > self.max_upload_bytes {
                return Err(self.too_large("File"));
            }
            file.write_all(chunk).await?;
        }
        file.flush().await?;

        info!(
            file_name = ?file_name,
            content_type = ?content_type,
            bytes = written,
            path = ?path,
            "Stored upload"
        );
        Ok(AudioSource::new(path, written))
    }

    fn too_large(&self, what: &str) -> PipelineError {
        PipelineError::PayloadTooLarge(format!(
            "{what} too large. Maximum size is {}MB.",
            self.max_upload_bytes / MB
        ))
    }

    /// Downloads `url` into the scratch directory.
    ///
    /// Only `http` and `https` URLs are fetched. The stored file keeps the
    /// URL's extension when it is an allowed audio extension. Downloads are
    /// held to the upload size limit and to the download timeout.
    pub async fn download(&self, url: &str, cleanup: &CleanupList) -> Result<AudioSource> {
        let url = Url::parse(url)
            .map_err(|e| PipelineError::Validation(format!("Invalid audio URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(PipelineError::Validation(format!(
                "Unsupported URL scheme: {}",
                url.scheme()
            )));
        }

        let extension = allowed_extension(Path::new(url.path())).unwrap_or(FALLBACK_EXTENSION);
        let path = self.scratch_path("download", extension);
        cleanup.push(&path);

        debug!(url = %url, path = ?path, "Downloading audio");
        let response = self
            .http
            .get(url.clone())
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(|e| PipelineError::Download(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PipelineError::Download(format!(
                "HTTP {} from {}",
                response.status(),
                url
            )));
        }

        if response
            .content_length()
            .is_some_and(|len| len > self.max_upload_bytes)
        {
            return Err(self.too_large("Audio"));
        }

        tokio::fs::create_dir_all(&self.scratch_dir).await?;
        let mut file = File::create(&path).await?;
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| PipelineError::Download(e.to_string()))?;
            written += chunk.len() as u64;
            if written > self.max_upload_bytes {
                return Err(self.too_large("Audio"));
            }
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        info!(url = %url, bytes = written, path = ?path, "Downloaded audio");
        Ok(AudioSource::new(path, written))
    }
}
