//! Options sent along with every transcription request.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Errors raised while turning request parameters into options.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OptionsError {
    #[error("Temperature must be between 0 and 1")]
    Temperature,

    #[error("Invalid response format. Must be one of: json, text, srt, vtt, verbose_json")]
    ResponseFormat(String),
}

/// Output format requested from the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    #[default]
    Json,
    Text,
    Srt,
    Vtt,
    VerboseJson,
}

impl ResponseFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Text => "text",
            Self::Srt => "srt",
            Self::Vtt => "vtt",
            Self::VerboseJson => "verbose_json",
        }
    }

    /// Whether the provider answers this format with a JSON document.
    pub fn is_json(&self) -> bool {
        matches!(self, Self::Json | Self::VerboseJson)
    }

    /// Content type of the provider's answer in this format.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json | Self::VerboseJson => "application/json",
            Self::Text => "text/plain; charset=utf-8",
            Self::Srt => "application/x-subrip",
            Self::Vtt => "text/vtt",
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResponseFormat {
    type Err = OptionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "text" => Ok(Self::Text),
            "srt" => Ok(Self::Srt),
            "vtt" => Ok(Self::Vtt),
            "verbose_json" => Ok(Self::VerboseJson),
            other => Err(OptionsError::ResponseFormat(other.to_string())),
        }
    }
}

/// Options for one transcription request.
///
/// Built once per request and only ever shared by reference, including
/// across the concurrent calls made for a split file.
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptionOptions {
    /// Provider model identifier
    pub model: String,
    pub response_format: ResponseFormat,
    /// Text to guide the model's style or continue a previous segment
    pub prompt: Option<String>,
    /// Sampling temperature in `[0, 1]`
    pub temperature: Option<f32>,
    /// ISO 639-1 language hint
    pub language: Option<String>,
}

impl TranscriptionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            response_format: ResponseFormat::default(),
            prompt: None,
            temperature: None,
            language: None,
        }
    }

    pub fn with_response_format(mut self, format: ResponseFormat) -> Self {
        self.response_format = format;
        self
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    /// Set the temperature, rejecting values outside `[0, 1]`.
    ///
    /// The range is checked at full precision, before narrowing to `f32`.
    pub fn with_temperature(mut self, temperature: f64) -> Result<Self, OptionsError> {
        if !(0.0..=1.0).contains(&temperature) {
            return Err(OptionsError::Temperature);
        }
        self.temperature = Some(temperature as f32);
        Ok(self)
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Options for the segment at `index` of a split file.
    ///
    /// The prompt gets a `Part <n>` marker so each call knows where it sits,
    /// and the format is forced to JSON since only the text survives merging.
    pub fn for_segment(&self, index: usize) -> Self {
        Self {
            prompt: Some(segment_prompt(self.prompt.as_deref(), index)),
            response_format: ResponseFormat::Json,
            ..self.clone()
        }
    }
}

fn segment_prompt(prompt: Option<&str>, index: usize) -> String {
    let part = index + 1;
    match prompt {
        Some(prompt) => format!("{prompt} (Part {part})"),
        None => format!("Part {part}"),
    }
}

/// Raw, unvalidated request parameters as they arrive from a client.
///
/// Empty strings count as absent. `temperature` is accepted either as a
/// string or as a JSON number.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RequestParams {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    pub temperature: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub response_format: Option<String>,
}

impl RequestParams {
    /// Sets a parameter by its form field name. Unknown names are ignored.
    pub fn set(&mut self, name: &str, value: String) {
        match name {
            "prompt" => self.prompt = Some(value),
            "temperature" => self.temperature = Some(value),
            "language" => self.language = Some(value),
            "response_format" => self.response_format = Some(value),
            _ => {}
        }
    }

    /// Validates the parameters and builds options for `model`.
    pub fn into_options(self, model: &str) -> Result<TranscriptionOptions, OptionsError> {
        let response_format = match non_empty(self.response_format) {
            Some(format) => format.parse()?,
            None => ResponseFormat::default(),
        };
        let mut options = TranscriptionOptions::new(model).with_response_format(response_format);

        if let Some(prompt) = non_empty(self.prompt) {
            options = options.with_prompt(prompt);
        }
        if let Some(temperature) = non_empty(self.temperature) {
            let temperature: f64 = temperature
                .trim()
                .parse()
                .map_err(|_| OptionsError::Temperature)?;
            options = options.with_temperature(temperature)?;
        }
        if let Some(language) = non_empty(self.language) {
            options = options.with_language(language);
        }

        Ok(options)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(f64),
    }

    Ok(Option::<Raw>::deserialize(deserializer)?.map(|raw| match raw {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    }))
}
