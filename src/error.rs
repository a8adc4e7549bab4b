//! Error types for the tunebox server

use thiserror::Error;

/// Result type alias for tunebox operations
pub type Result<T> = std::result::Result<T, MediaError>;

/// Error types that can occur while serving the library
///
/// Transcode trouble is deliberately absent here: encoder timeouts and
/// failures are modeled as [`crate::transcoder::EncodeOutcome`] variants and
/// consumed by the streaming pipeline's fallback logic, never surfaced as
/// request errors. The same goes for probe failures, which degrade to zeroed
/// metadata instead of failing the request.
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Not found")]
    NotFound,

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Playlist error: {0}")]
    PlaylistError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),
}

impl From<std::io::Error> for MediaError {
    fn from(err: std::io::Error) -> Self {
        MediaError::IoError(err.to_string())
    }
}

impl MediaError {
    /// Convert error to HTTP status code
    ///
    /// Missing/unsafe/disallowed paths map to 404; everything else that
    /// escapes a handler is a server-side failure.
    pub fn to_http_status(&self) -> u16 {
        match self {
            MediaError::NotFound => 404,
            MediaError::BadRequest(_) => 400,

            MediaError::ConfigError(_) => 500,
            MediaError::PlaylistError(_) => 500,
            MediaError::CacheError(_) => 500,
            MediaError::IoError(_) => 500,
            MediaError::HttpError(_) => 500,
        }
    }
}
