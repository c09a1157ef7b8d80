//! OpenAI transcription API backend.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use murmur_core::TranscriptionOptions;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{Result, TranscribeError, Transcriber, Transcript};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Configuration for the OpenAI transcription client.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    /// OpenAI API key
    pub api_key: String,

    /// API base URL (defaults to the public OpenAI endpoint)
    pub base_url: Option<String>,

    /// Timeout for a whole request, upload included
    pub timeout: Duration,
}

impl OpenAIConfig {
    /// Create a new OpenAI config with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Point the client at a different, API compatible host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Get the transcription endpoint.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL);
        format!("{}/audio/transcriptions", base.trim_end_matches('/'))
    }
}

/// OpenAI transcription API client.
#[derive(Debug, Clone)]
pub struct OpenAIClient {
    client: reqwest::Client,
    config: OpenAIConfig,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

impl OpenAIClient {
    /// Create a new OpenAI client with the given configuration.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(TranscribeError::NoApiKey);
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }

    /// Create a client from just an API key with default settings.
    pub fn from_api_key(api_key: impl Into<String>) -> Result<Self> {
        Self::new(OpenAIConfig::new(api_key))
    }

    async fn form(audio: &Path, options: &TranscriptionOptions) -> Result<Form> {
        let data = tokio::fs::read(audio).await?;
        let file_name = audio
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio".to_string());
        let mime = mime_for(audio);

        debug!(
            model = %options.model,
            audio_bytes = data.len(),
            file_name = %file_name,
            "Building transcription form"
        );

        let file = Part::bytes(data)
            .file_name(file_name)
            .mime_str(mime)
            .map_err(|e| TranscribeError::TranscriptionFailed(e.to_string()))?;

        let mut form = Form::new()
            .part("file", file)
            .text("model", options.model.clone())
            .text("response_format", options.response_format.as_str());

        if let Some(prompt) = &options.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(temperature) = options.temperature {
            form = form.text("temperature", temperature.to_string());
        }
        if let Some(language) = &options.language {
            form = form.text("language", language.clone());
        }

        Ok(form)
    }
}

#[async_trait]
impl Transcriber for OpenAIClient {
    async fn transcribe(
        &self,
        audio: &Path,
        options: &TranscriptionOptions,
    ) -> Result<Transcript> {
        let form = Self::form(audio, options).await?;

        debug!(
            endpoint = %self.config.endpoint(),
            response_format = %options.response_format,
            language = ?options.language,
            "Sending transcription request to OpenAI"
        );

        let response = self
            .client
            .post(self.config.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(TranscribeError::Api {
                status,
                message: error_message(&body),
            });
        }

        let transcript = if options.response_format.is_json() {
            let value = response
                .json()
                .await
                .map_err(|e| TranscribeError::TranscriptionFailed(e.to_string()))?;
            Transcript::Json(value)
        } else {
            Transcript::Plain {
                format: options.response_format,
                body: response.text().await?,
            }
        };

        info!(audio = ?audio, format = %options.response_format, "Transcription completed");
        Ok(transcript)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

/// Pulls the human readable message out of an OpenAI error body, falling
/// back to the raw body.
fn error_message(body: &str) -> String {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.trim().is_empty() => "empty response body".to_string(),
        Err(_) => body.trim().to_string(),
    }
}

fn mime_for(audio: &Path) -> &'static str {
    let ext = audio
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("mp3" | "mpga" | "mpeg") => "audio/mpeg",
        Some("mp4" | "m4a") => "audio/mp4",
        Some("wav" | "wave") => "audio/wav",
        Some("webm") => "audio/webm",
        Some("ogg") => "audio/ogg",
        _ => "application/octet-stream",
    }
}
