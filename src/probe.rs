//! Media metadata prober backed by an external ffprobe process
//!
//! Probing is advisory: the metadata endpoint must always answer, so every
//! failure mode here (missing binary, non-zero exit, timeout, garbage
//! output) degrades to a zeroed [`MediaMetadata`] instead of an error.

use crate::config::AppConfig;
use crate::models::MediaMetadata;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Invokes ffprobe to extract duration, bitrate and stream parameters
#[derive(Debug, Clone)]
pub struct MediaProber {
    ffprobe: String,
    timeout: Duration,
}

/// Top-level shape of `ffprobe -of json` output
///
/// ffprobe reports numeric format fields as strings.
#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    format: ProbeFormat,
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeStream {
    sample_rate: Option<String>,
    channels: Option<u32>,
}

impl MediaProber {
    pub fn new(ffprobe: impl Into<String>, timeout: Duration) -> Self {
        MediaProber {
            ffprobe: ffprobe.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.ffprobe_path.clone(),
            Duration::from_secs(config.probe_timeout_secs),
        )
    }

    /// Probe a file for duration, bitrate, sample rate and channel count
    ///
    /// Requests container duration/bit rate plus the first audio stream's
    /// sample rate and channels in JSON form, bounded by the configured
    /// timeout. Always returns a value; degraded to zeros/absent on any
    /// failure.
    pub async fn probe(&self, path: &Path) -> MediaMetadata {
        let mut cmd = Command::new(&self.ffprobe);
        cmd.arg("-v")
            .arg("quiet")
            .arg("-show_entries")
            .arg("format=duration,bit_rate:stream=sample_rate,channels")
            .arg("-of")
            .arg("json")
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to run {}: {}", self.ffprobe, e);
                return MediaMetadata::default();
            }
            Err(_) => {
                warn!("Probe timed out after {:?} for {:?}", self.timeout, path);
                return MediaMetadata::default();
            }
        };

        if !output.status.success() {
            debug!(
                "Probe exited with {:?} for {:?}",
                output.status.code(),
                path
            );
            return MediaMetadata::default();
        }

        match serde_json::from_slice::<ProbeOutput>(&output.stdout) {
            Ok(parsed) => Self::into_metadata(parsed),
            Err(e) => {
                warn!("Unparsable probe output for {:?}: {}", path, e);
                MediaMetadata::default()
            }
        }
    }

    fn into_metadata(parsed: ProbeOutput) -> MediaMetadata {
        let duration = parsed
            .format
            .duration
            .as_deref()
            .and_then(|d| d.parse::<f64>().ok())
            .unwrap_or(0.0);

        let bitrate = parsed
            .format
            .bit_rate
            .as_deref()
            .and_then(|b| b.parse::<u32>().ok())
            .map(|b| b / 1000);

        let first_stream = parsed.streams.into_iter().next().unwrap_or_default();

        let sample_rate = first_stream
            .sample_rate
            .as_deref()
            .and_then(|s| s.parse::<u32>().ok());

        MediaMetadata {
            duration,
            bitrate,
            sample_rate,
            channels: first_stream.channels,
        }
    }
}
