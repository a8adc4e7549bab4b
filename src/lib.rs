//! tunebox
//!
//! A self-hosted HTTP server for a private audio library. Folders and
//! per-folder playlists are served as JSON; playback requests stream MP3
//! bytes, transcoding non-MP3 sources on demand through an external ffmpeg
//! process and caching the result on disk.
//!
//! # Overview
//!
//! A playback request flows through the [`pipeline::StreamingPipeline`]:
//! a deterministic cache key is computed from the source file's path and
//! mtime plus the encoding profile, an existing cache entry is streamed
//! directly, MP3 sources pass through untouched, and anything else is
//! encoded into the cache first. Encoder trouble never fails the request;
//! the original bytes are served instead.
//!
//! Concurrent requests for the same cache key are single-flight: one encode
//! runs, everyone else waits and then streams the finished entry. Entries
//! are published with an atomic rename, so a partially written file is
//! never visible under a cache path.
//!
//! # Architecture
//!
//! - [`ApiServer`]: hyper-based HTTP front end and router
//! - [`StreamingPipeline`]: cache / passthrough / encode decision and
//!   chunked byte streams
//! - [`Transcoder`]: external encoder invocation with timeout and staged
//!   output
//! - [`MediaProber`]: external metadata probe, degrading to zeros on failure
//! - [`TranscodeCache`]: on-disk cache store (existence, size, clear)
//! - [`StreamMetrics`]: process-wide counters exposed at `/metrics`
//!
//! # Configuration
//!
//! Configuration is loaded from a YAML file:
//!
//! ```yaml
//! media_root: /srv/music
//! cache_root: /var/cache/tunebox
//! bind_address: "0.0.0.0:8000"
//! audio_quality: 2        # LAME VBR, 0-9, lower = better
//! audio_bitrate: 192      # CBR fallback, kbps
//! allowed_extensions: [wav, mp3, m4a, mp4, flac, ogg]
//! ```
//!
//! See [`AppConfig`] for all options and defaults.

pub mod cache;
pub mod config;
pub mod error;
pub mod library;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod playlist;
pub mod probe;
pub mod server;
pub mod transcoder;

// Re-export commonly used types
pub use cache::{cache_key, TranscodeCache, CACHE_KEY_LEN};
pub use config::AppConfig;
pub use error::{MediaError, Result};
pub use metrics::{MetricsSnapshot, StreamMetrics};
pub use models::{
    AudioInfo, EncodingProfile, MediaMetadata, Playlist, PlaylistTrack, SourceFile,
};
pub use pipeline::{is_mp3_passthrough, AudioStream, StreamOrigin, StreamingPipeline};
pub use probe::MediaProber;
pub use server::{ApiServer, AppState};
pub use transcoder::{EncodeOutcome, Transcoder};
