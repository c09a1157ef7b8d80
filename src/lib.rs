// Re-export from sub-crates
pub use murmur_core::{
    APP_NAME, Config, ConfigManager, DEFAULT_LOG_LEVEL, MB, RequestParams, ResponseFormat,
    TranscriptionOptions,
};
pub use murmur_media::{AudioSource, MediaError, Segment};
pub use murmur_transcribe::{OpenAIClient, OpenAIConfig, TranscribeError, Transcriber, Transcript};

pub mod acquire;
pub mod chunked;
pub mod cleanup;
pub mod error;
pub mod process;
pub mod server;

pub use error::PipelineError;

// Version from this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
