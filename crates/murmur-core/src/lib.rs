//! Core types and configuration for murmur.
//!
//! This crate holds the pieces every other murmur crate agrees on: the
//! service configuration and the options sent along with a transcription.

mod config;
mod options;

pub use config::{Config, ConfigManager};
pub use options::{OptionsError, RequestParams, ResponseFormat, TranscriptionOptions};

/// Application name
pub const APP_NAME: &str = "murmur";

/// Default log level
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Bytes per megabyte as used by every size threshold in murmur.
pub const MB: u64 = 1024 * 1024;
