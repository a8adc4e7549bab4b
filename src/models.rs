//! Core data models for the tunebox server

use crate::config::AppConfig;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity snapshot of a playable file, taken at request time
///
/// Staleness between this snapshot and the actual encode is accepted; the
/// file is not locked. A replaced file changes its mtime and therefore its
/// cache identity.
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Absolute path to the file
    pub path: PathBuf,
    /// Last-modified time as whole seconds since the epoch
    pub mtime_secs: u64,
    /// File size in bytes
    pub size: u64,
}

impl SourceFile {
    /// Stat a path into a snapshot
    ///
    /// # Returns
    /// * `Ok(SourceFile)` if the path is a readable regular file
    /// * `Err(MediaError)` otherwise
    pub fn stat<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;

        let mtime_secs = meta
            .modified()
            .unwrap_or(UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        Ok(SourceFile {
            path: path.to_path_buf(),
            mtime_secs,
            size: meta.len(),
        })
    }

    /// Lowercase extension without the dot, empty if none
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

/// Encoding parameters that affect transcoded output
///
/// Process-wide, read-only after startup. Both fields participate in the
/// cache identity even though only `quality` reaches the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingProfile {
    /// LAME VBR quality, 0-9, lower = better
    pub quality: u8,
    /// CBR fallback bitrate in kbps
    pub bitrate: u32,
}

impl EncodingProfile {
    pub fn from_config(config: &AppConfig) -> Self {
        EncodingProfile {
            quality: config.audio_quality,
            bitrate: config.audio_bitrate,
        }
    }
}

/// Metadata extracted from a media file by the prober
///
/// Produced fresh per request, never cached. The default value is the
/// degraded "probe failed" shape: zero duration, everything else absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    /// Duration in seconds
    pub duration: f64,
    /// Overall bitrate in kbps
    pub bitrate: Option<u32>,
    /// Sample rate of the first audio stream in Hz
    pub sample_rate: Option<u32>,
    /// Channel count of the first audio stream
    pub channels: Option<u32>,
}

/// A folder in the media library
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderItem {
    pub name: String,
    /// Percent-encoded path relative to the media root
    pub path: String,
    pub has_audio: bool,
    pub subfolder_count: usize,
}

/// An audio file in a folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFile {
    pub filename: String,
    /// Percent-encoded relative path, usable with the stream endpoint
    pub path: String,
    pub format: String,
    /// File size in bytes
    pub size: u64,
}

/// Contents of a folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderContents {
    pub path: String,
    pub name: String,
    pub folders: Vec<FolderItem>,
    pub files: Vec<AudioFile>,
}

/// Response for the root folder listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FolderListResponse {
    pub folders: Vec<FolderItem>,
}

/// A track in a folder playlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistTrack {
    pub filename: String,
    pub path: String,
    #[serde(default)]
    pub skip: bool,
    pub duration: Option<f64>,
}

/// Playlist for a folder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playlist {
    pub path: String,
    pub tracks: Vec<PlaylistTrack>,
}

/// A single track entry in a playlist update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistTrackUpdate {
    pub filename: String,
    #[serde(default)]
    pub skip: bool,
}

/// Request body for reordering a folder playlist
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistUpdate {
    pub tracks: Vec<PlaylistTrackUpdate>,
}

/// Audio file metadata returned by the info endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioInfo {
    pub filename: String,
    pub duration: f64,
    pub format: String,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}

/// Cache status report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub total_bytes: u64,
}

/// Result of a cache clear
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheClearResult {
    pub removed: usize,
}

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_source_file_stat() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("track.flac");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"not really flac").unwrap();

        let source = SourceFile::stat(&path).unwrap();
        assert_eq!(source.size, 15);
        assert!(source.mtime_secs > 0);
        assert_eq!(source.extension(), "flac");
    }

    #[test]
    fn test_source_file_stat_missing() {
        assert!(SourceFile::stat("/no/such/file.mp3").is_err());
    }

    #[test]
    fn test_extension_casing() {
        let source = SourceFile {
            path: PathBuf::from("/media/Track.MP3"),
            mtime_secs: 0,
            size: 0,
        };
        assert_eq!(source.extension(), "mp3");
    }

    #[test]
    fn test_media_metadata_default_is_degraded() {
        let meta = MediaMetadata::default();
        assert_eq!(meta.duration, 0.0);
        assert!(meta.bitrate.is_none());
        assert!(meta.sample_rate.is_none());
        assert!(meta.channels.is_none());
    }

    #[test]
    fn test_profile_from_config() {
        let config = AppConfig::default();
        let profile = EncodingProfile::from_config(&config);
        assert_eq!(profile.quality, 2);
        assert_eq!(profile.bitrate, 192);
    }

    #[test]
    fn test_error_body_omits_absent_details() {
        let body = ErrorBody {
            error: "File not found".to_string(),
            details: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("details"));
    }
}
