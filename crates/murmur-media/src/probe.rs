//! Finding out how long an audio file is.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{MediaError, Prober, Result, extension_of, is_wave_extension, tool};

/// Reads the container duration with `ffprobe`.
#[derive(Debug, Clone)]
pub struct Ffprobe {
    bin: PathBuf,
}

impl Ffprobe {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self { bin: bin.into() }
    }
}

impl Default for Ffprobe {
    fn default() -> Self {
        Self::new("ffprobe")
    }
}

#[async_trait]
impl Prober for Ffprobe {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let args = [
            OsStr::new("-v"),
            OsStr::new("error"),
            OsStr::new("-show_entries"),
            OsStr::new("format=duration"),
            OsStr::new("-of"),
            OsStr::new("default=noprint_wrappers=1:nokey=1"),
            path.as_os_str(),
        ];
        let stdout = tool::run(&self.bin, args)
            .await
            .map_err(|e| MediaError::Probe {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        let duration = parse_duration(&stdout).map_err(|reason| MediaError::Probe {
            path: path.to_path_buf(),
            reason,
        })?;
        debug!(path = ?path, duration_secs = duration, "Probed duration");
        Ok(duration)
    }
}

/// Parses the single duration line ffprobe prints.
fn parse_duration(stdout: &str) -> std::result::Result<f64, String> {
    let line = stdout.lines().map(str::trim).find(|l| !l.is_empty());
    let Some(line) = line else {
        return Err("ffprobe reported no duration".to_string());
    };
    let duration: f64 = line
        .parse()
        .map_err(|_| format!("unexpected duration {line:?}"))?;
    check_duration(duration)
}

fn check_duration(duration: f64) -> std::result::Result<f64, String> {
    if duration.is_finite() && duration >= 0.0 {
        Ok(duration)
    } else {
        Err(format!("invalid duration {duration}"))
    }
}

/// Reads the duration of PCM wave files straight from their header.
#[derive(Debug, Clone, Copy, Default)]
pub struct WavProber;

#[async_trait]
impl Prober for WavProber {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        let owned = path.to_path_buf();
        let duration = tokio::task::spawn_blocking(move || {
            let reader = hound::WavReader::open(&owned).map_err(|e| e.to_string())?;
            let sample_rate = reader.spec().sample_rate;
            if sample_rate == 0 {
                return Err("header declares a zero sample rate".to_string());
            }
            check_duration(reader.duration() as f64 / sample_rate as f64)
        })
        .await
        .map_err(|e| MediaError::Probe {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
        .map_err(|reason| MediaError::Probe {
            path: path.to_path_buf(),
            reason,
        })?;

        debug!(path = ?path, duration_secs = duration, "Read wave header");
        Ok(duration)
    }
}

/// Picks the cheapest way to probe a file.
///
/// Wave files are read natively and only handed to ffprobe when their
/// header cannot be parsed (compressed wave payloads, for instance).
/// Everything else goes to ffprobe directly.
#[derive(Debug, Clone, Default)]
pub struct MediaProber {
    wav: WavProber,
    ffprobe: Ffprobe,
}

impl MediaProber {
    pub fn new(ffprobe: Ffprobe) -> Self {
        Self {
            wav: WavProber,
            ffprobe,
        }
    }
}

#[async_trait]
impl Prober for MediaProber {
    async fn probe_duration(&self, path: &Path) -> Result<f64> {
        if extension_of(path).is_some_and(|ext| is_wave_extension(&ext)) {
            match self.wav.probe_duration(path).await {
                Ok(duration) => return Ok(duration),
                Err(e) => warn!(error = %e, "Falling back to ffprobe"),
            }
        }
        self.ffprobe.probe_duration(path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, sample_rate: u32, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..sample_rate * seconds {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("62.040000\n"), Ok(62.04));
        assert_eq!(parse_duration("\n 3.5 \n"), Ok(3.5));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("N/A\n").is_err());
        assert!(parse_duration("-1.0").is_err());
    }

    #[tokio::test]
    async fn test_wav_prober() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 8_000, 3);

        let duration = WavProber.probe_duration(&path).await.unwrap();
        assert!((duration - 3.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_wav_prober_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"definitely not riff").unwrap();

        let err = WavProber.probe_duration(&path).await.unwrap_err();
        assert!(matches!(err, MediaError::Probe { .. }));
    }

    #[tokio::test]
    async fn test_media_prober_reads_wave_without_ffprobe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.WAV");
        write_wav(&path, 16_000, 2);

        let prober = MediaProber::new(Ffprobe::new("/nonexistent/ffprobe"));
        let duration = prober.probe_duration(&path).await.unwrap();
        assert!((duration - 2.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_media_prober_reports_missing_ffprobe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp3");
        std::fs::write(&path, b"ID3").unwrap();

        let prober = MediaProber::new(Ffprobe::new("/nonexistent/ffprobe"));
        let err = prober.probe_duration(&path).await.unwrap_err();
        assert!(matches!(err, MediaError::Probe { reason, .. } if reason.contains("not found")));
    }
}
