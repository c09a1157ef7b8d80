//! Configuration management for murmur.
//!
//! The config lives in a TOML file under the platform config directory.
//! A handful of environment variables override what the file says, which
//! keeps secrets like the API key out of the file when deploying.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{APP_NAME, MB};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "whisper-1";

/// Service configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// OpenAI API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_key: Option<String>,

    /// Base URL of the transcription provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Model to use for transcriptions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Address the HTTP server binds to
    #[serde(default = "default_host", skip_serializing_if = "is_default_host")]
    pub host: String,

    /// Port the HTTP server listens on
    #[serde(default = "default_port", skip_serializing_if = "is_default_port")]
    pub port: u16,

    /// Directory for uploads, downloads, conversions and segments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratch_dir: Option<PathBuf>,

    /// Largest accepted upload (in MB)
    #[serde(
        default = "default_max_upload_mb",
        skip_serializing_if = "is_default_max_upload_mb"
    )]
    pub max_upload_mb: u64,

    /// Files above this size (in MB) are split before transcribing
    #[serde(
        default = "default_max_single_file_mb",
        skip_serializing_if = "is_default_max_single_file_mb"
    )]
    pub max_single_file_mb: f64,

    /// Length of each segment (in seconds) when splitting
    #[serde(
        default = "default_max_chunk_secs",
        skip_serializing_if = "is_default_max_chunk_secs"
    )]
    pub max_chunk_secs: f64,

    /// Transcode wave uploads to mp3 before sending them upstream
    #[serde(default = "default_true", skip_serializing_if = "is_true")]
    pub convert_wave: bool,

    /// Timeout for a single provider request (in seconds)
    #[serde(
        default = "default_request_timeout_secs",
        skip_serializing_if = "is_default_request_timeout_secs"
    )]
    pub request_timeout_secs: u64,

    /// Path to the ffmpeg binary, looked up on PATH when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,

    /// Path to the ffprobe binary, looked up on PATH when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffprobe_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

fn is_true(v: &bool) -> bool {
    *v
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn is_default_host(v: &String) -> bool {
    v == "0.0.0.0"
}

fn default_port() -> u16 {
    3000
}

fn is_default_port(v: &u16) -> bool {
    *v == 3000
}

fn default_max_upload_mb() -> u64 {
    25
}

fn is_default_max_upload_mb(v: &u64) -> bool {
    *v == 25
}

fn default_max_single_file_mb() -> f64 {
    24.0
}

fn is_default_max_single_file_mb(v: &f64) -> bool {
    (*v - 24.0).abs() < f64::EPSILON
}

fn default_max_chunk_secs() -> f64 {
    24.0
}

fn is_default_max_chunk_secs(v: &f64) -> bool {
    (*v - 24.0).abs() < f64::EPSILON
}

fn default_request_timeout_secs() -> u64 {
    300
}

fn is_default_request_timeout_secs(v: &u64) -> bool {
    *v == 300
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_key: None,
            base_url: None,
            model: None,
            host: default_host(),
            port: default_port(),
            scratch_dir: None,
            max_upload_mb: default_max_upload_mb(),
            max_single_file_mb: default_max_single_file_mb(),
            max_chunk_secs: default_max_chunk_secs(),
            convert_wave: true,
            request_timeout_secs: default_request_timeout_secs(),
            ffmpeg_path: None,
            ffprobe_path: None,
        }
    }
}

impl Config {
    /// Get the OpenAI API key
    pub fn key_openai(&self) -> Option<&str> {
        self.openai_key.as_deref()
    }

    /// Get the OpenAI API key, failing when none is configured.
    ///
    /// Nothing can be transcribed without one, so the error says where to
    /// put it.
    pub fn require_key_openai(&self, config_path: &Path) -> Result<&str> {
        self.key_openai().with_context(|| {
            format!(
                "OpenAI API key is not set. Transcriptions will not work without it. \
                 Set OPENAI_API_KEY or add openai_key to {}",
                config_path.display()
            )
        })
    }

    /// Get the provider base URL
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// Get the model name
    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Address to bind, as `host:port`
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Scratch directory, defaulting to a folder in the system temp dir
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(APP_NAME))
    }

    /// Upload limit in bytes
    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb * MB
    }

    /// Provider request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Get the ffmpeg binary
    pub fn ffmpeg(&self) -> &Path {
        self.ffmpeg_path
            .as_deref()
            .unwrap_or_else(|| Path::new("ffmpeg"))
    }

    /// Get the ffprobe binary
    pub fn ffprobe(&self) -> &Path {
        self.ffprobe_path
            .as_deref()
            .unwrap_or_else(|| Path::new("ffprobe"))
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Applies overrides using `lookup` to read variables.
    ///
    /// `OPENAI_API_KEY` replaces the key and `PORT` replaces the port. A
    /// `PORT` that does not parse is ignored with a warning.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENAI_API_KEY").filter(|k| !k.is_empty()) {
            self.openai_key = Some(key);
        }
        if let Some(port) = lookup("PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => warn!(port = %port, "Ignoring PORT that is not a valid port number"),
            }
        }
    }

    /// Checks that the limits make sense.
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_mb == 0 {
            bail!("max_upload_mb must be greater than zero");
        }
        if !(self.max_single_file_mb.is_finite() && self.max_single_file_mb > 0.0) {
            bail!("max_single_file_mb must be a positive number");
        }
        if !(self.max_chunk_secs.is_finite() && self.max_chunk_secs > 0.0) {
            bail!("max_chunk_secs must be a positive number");
        }
        if self.request_timeout_secs == 0 {
            bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }
}

/// Manages loading and saving configuration files.
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// Creates a new ConfigManager, honoring `MURMUR_CONFIG` when set.
    pub fn new() -> Result<Self> {
        let config_path = match std::env::var_os("MURMUR_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => Self::default_config_path()?,
        };
        Ok(Self { config_path })
    }

    /// Creates a new ConfigManager with a specified configuration directory.
    pub fn with_config_dir<P: AsRef<Path>>(dir: P) -> Self {
        let config_path = dir.as_ref().join(format!("{}.toml", APP_NAME));
        Self { config_path }
    }

    /// Returns the default path to the configuration file.
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to retrieve configuration directory")?;
        Ok(config_dir.join(APP_NAME).join(format!("{}.toml", APP_NAME)))
    }

    /// Reads the config file. A file that does not exist yet reads as
    /// `None`.
    fn read(&self) -> Result<Option<Config>> {
        let content = match fs::read_to_string(&self.config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read config file at {:?}", self.config_path)
                });
            }
        };

        toml::from_str(&content)
            .map(Some)
            .with_context(|| format!("Failed to parse config file at {:?}", self.config_path))
    }

    /// Loads the configuration, falling back to defaults when there is no file.
    pub fn load(&self) -> Result<Config> {
        Ok(self.read()?.unwrap_or_default())
    }

    /// Loads the configuration, writing the defaults out on first start so
    /// there is a file to edit.
    pub fn load_or_init(&self) -> Result<Config> {
        if let Some(config) = self.read()? {
            return Ok(config);
        }
        let config = Config::default();
        self.save(&config)?;
        info!(path = ?self.config_path, "Wrote default config");
        Ok(config)
    }

    /// Saves the configuration to the config file.
    pub fn save(&self, config: &Config) -> Result<()> {
        let config_dir = self
            .config_path
            .parent()
            .with_context(|| format!("Failed to get parent directory of {:?}", self.config_path))?;

        fs::create_dir_all(config_dir)
            .with_context(|| format!("Failed to create config directory at {:?}", config_dir))?;

        let serialized =
            toml::to_string_pretty(&config).context("Failed to serialize configuration")?;

        fs::write(&self.config_path, serialized)
            .with_context(|| format!("Failed to write config file at {:?}", self.config_path))?;

        Ok(())
    }

    /// Returns the path to the configuration file.
    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
