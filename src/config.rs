//! Configuration management for the tunebox server

use crate::error::{MediaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for the tunebox server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Root directory of the audio library
    #[serde(default = "default_media_root")]
    pub media_root: PathBuf,

    /// Directory holding transcoded cache entries
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// Address the HTTP API binds to (default: "0.0.0.0:8000")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// LAME VBR quality, 0-9, lower = better (default: 2)
    #[serde(default = "default_audio_quality")]
    pub audio_quality: u8,

    /// CBR fallback bitrate in kbps (default: 192)
    ///
    /// Part of the cache identity but not wired into the encoder invocation;
    /// only the VBR quality reaches ffmpeg. See DESIGN.md.
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: u32,

    /// File extensions served from the library (lowercase, no dot)
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,

    /// Encoder executable (default: "ffmpeg")
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Prober executable (default: "ffprobe")
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,

    /// Bound on a single encode in seconds (default: 300)
    #[serde(default = "default_encode_timeout")]
    pub encode_timeout_secs: u64,

    /// Bound on a single metadata probe in seconds (default: 10)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,
}

// Default value functions for serde
fn default_media_root() -> PathBuf {
    PathBuf::from("/media")
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("/cache")
}

fn default_bind_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_audio_quality() -> u8 {
    2
}

fn default_audio_bitrate() -> u32 {
    192
}

fn default_allowed_extensions() -> Vec<String> {
    ["wav", "mp3", "m4a", "mp4", "flac", "ogg"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_encode_timeout() -> u64 {
    300
}

fn default_probe_timeout() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            media_root: default_media_root(),
            cache_root: default_cache_root(),
            bind_address: default_bind_address(),
            audio_quality: default_audio_quality(),
            audio_bitrate: default_audio_bitrate(),
            allowed_extensions: default_allowed_extensions(),
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            encode_timeout_secs: default_encode_timeout(),
            probe_timeout_secs: default_probe_timeout(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a YAML file
    ///
    /// # Arguments
    /// * `path` - Path to the YAML configuration file
    ///
    /// # Returns
    /// * `Ok(AppConfig)` if the file exists and parses
    /// * `Err(MediaError::ConfigError)` otherwise
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref()).map_err(|e| {
            MediaError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let config: AppConfig = serde_yaml::from_str(&raw)
            .map_err(|e| MediaError::ConfigError(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Validate the configuration
    ///
    /// # Validation Rules
    /// - media_root must exist and be a directory
    /// - audio_quality must be in 0..=9
    /// - allowed_extensions must not be empty
    /// - timeouts must be non-zero
    ///
    /// The cache root is not required to exist; it is created at startup.
    pub fn validate(&self) -> Result<()> {
        if !self.media_root.is_dir() {
            return Err(MediaError::ConfigError(format!(
                "media_root does not exist: {}",
                self.media_root.display()
            )));
        }

        if self.audio_quality > 9 {
            return Err(MediaError::ConfigError(format!(
                "audio_quality must be 0-9, got {}",
                self.audio_quality
            )));
        }

        if self.allowed_extensions.is_empty() {
            return Err(MediaError::ConfigError(
                "allowed_extensions must not be empty".to_string(),
            ));
        }

        if self.encode_timeout_secs == 0 || self.probe_timeout_secs == 0 {
            return Err(MediaError::ConfigError(
                "timeouts must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Allowed extensions as a lowercase lookup set
    pub fn allowed_extensions_set(&self) -> HashSet<String> {
        self.allowed_extensions
            .iter()
            .map(|e| e.trim().to_lowercase())
            .collect()
    }
}
