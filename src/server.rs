//! HTTP API for the library: folders, playlists, streaming, cache admin
//!
//! One accepted connection per spawned task, HTTP/1 served with hyper.
//! Playback responses are streamed bodies fed by the pipeline; everything
//! else is small JSON.

use crate::cache::TranscodeCache;
use crate::config::AppConfig;
use crate::error::{MediaError, Result};
use crate::library;
use crate::metrics::StreamMetrics;
use crate::models::{
    AudioInfo, CacheClearResult, CacheStatus, ErrorBody, FolderListResponse, Playlist,
    PlaylistUpdate, SourceFile,
};
use crate::pipeline::{is_mp3_passthrough, StreamingPipeline};
use crate::playlist;
use crate::probe::MediaProber;
use crate::transcoder::Transcoder;
use bytes::Bytes;
use futures_util::TryStreamExt;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

type ApiBody = UnsyncBoxBody<Bytes, std::io::Error>;

/// Shared per-process state handed to every request handler
pub struct AppState {
    pub config: AppConfig,
    allowed: HashSet<String>,
    pub cache: TranscodeCache,
    pub pipeline: StreamingPipeline,
    pub prober: MediaProber,
    pub metrics: Arc<StreamMetrics>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let cache = TranscodeCache::new(&config.cache_root);
        let metrics = Arc::new(StreamMetrics::new());
        let pipeline = StreamingPipeline::new(
            cache.clone(),
            Transcoder::from_config(&config),
            crate::models::EncodingProfile::from_config(&config),
            Arc::clone(&metrics),
        );
        let prober = MediaProber::from_config(&config);
        let allowed = config.allowed_extensions_set();

        AppState {
            config,
            allowed,
            cache,
            pipeline,
            prober,
            metrics,
        }
    }
}

/// The tunebox API server
pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(state: Arc<AppState>) -> Self {
        ApiServer { state }
    }

    /// Bind the configured address and serve until the process terminates
    pub async fn start(self) -> Result<()> {
        let listener = TcpListener::bind(&self.state.config.bind_address)
            .await
            .map_err(|e| {
                MediaError::HttpError(format!(
                    "Failed to bind {}: {}",
                    self.state.config.bind_address, e
                ))
            })?;

        info!("Listening on http://{}", self.state.config.bind_address);

        loop {
            let (stream, peer) = listener
                .accept()
                .await
                .map_err(|e| MediaError::HttpError(format!("Accept failed: {}", e)))?;
            let io = TokioIo::new(stream);
            let state = Arc::clone(&self.state);

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let state = Arc::clone(&state);
                    async move { handle_request(req, state).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    debug!("Connection from {} ended with error: {:?}", peer, err);
                }
            });
        }
    }
}

/// Parsed request target
#[derive(Debug, PartialEq, Eq)]
enum Route<'a> {
    Health,
    Metrics,
    CacheStatus,
    CacheClear,
    FolderList(&'a str),
    PlaylistGet(&'a str),
    PlaylistPut(&'a str),
    Stream(&'a str),
    StreamInfo(&'a str),
    Unknown,
}

/// Map a method and path onto a route
///
/// Folder and stream paths are kept percent-encoded here; handlers decode
/// after the safety check, mirroring how the paths were issued.
fn route_for<'a>(method: &Method, path: &'a str) -> Route<'a> {
    match (method, path) {
        (&Method::GET, "/api/health") => return Route::Health,
        (&Method::GET, "/metrics") => return Route::Metrics,
        (&Method::GET, "/api/cache") => return Route::CacheStatus,
        (&Method::DELETE, "/api/cache") => return Route::CacheClear,
        (&Method::GET, "/api/folders") => return Route::FolderList(""),
        _ => {}
    }

    if let Some(rest) = path.strip_prefix("/api/folders/") {
        if let Some(rel) = rest.strip_suffix("/playlist") {
            return match *method {
                Method::GET => Route::PlaylistGet(rel),
                Method::PUT => Route::PlaylistPut(rel),
                _ => Route::Unknown,
            };
        }
        if *method == Method::GET {
            return Route::FolderList(rest);
        }
    }

    if let Some(rest) = path.strip_prefix("/api/stream/") {
        if *method == Method::GET {
            if let Some(rel) = rest.strip_suffix("/info") {
                return Route::StreamInfo(rel);
            }
            return Route::Stream(rest);
        }
    }

    Route::Unknown
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> std::result::Result<Response<ApiBody>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("{} {}", method, path);

    let result = match route_for(&method, &path) {
        Route::Health => Ok(json_response(
            StatusCode::OK,
            &serde_json::json!({"status": "ok"}),
        )),
        Route::Metrics => Ok(metrics_response(&state)),
        Route::CacheStatus => handle_cache_status(&state).await,
        Route::CacheClear => handle_cache_clear(&state).await,
        Route::FolderList(rel) => {
            let rel = rel.to_string();
            handle_folders(&state, &rel)
        }
        Route::PlaylistGet(rel) => {
            let rel = rel.to_string();
            handle_playlist_get(&state, &rel)
        }
        Route::PlaylistPut(rel) => {
            let rel = rel.to_string();
            let body = req.into_body().collect().await?.to_bytes();
            handle_playlist_put(&state, &rel, &body)
        }
        Route::Stream(rel) => {
            let rel = rel.to_string();
            handle_stream(&state, &rel).await
        }
        Route::StreamInfo(rel) => {
            let rel = rel.to_string();
            handle_stream_info(&state, &rel).await
        }
        Route::Unknown => Err(MediaError::NotFound),
    };

    Ok(result.unwrap_or_else(|err| error_response(&err)))
}

/// Serve the Prometheus exposition
fn metrics_response(state: &AppState) -> Response<ApiBody> {
    let body = state.metrics.snapshot().render_prometheus();
    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "text/plain; version=0.0.4; charset=utf-8")
        .body(full(Bytes::from(body)))
        .unwrap()
}

async fn handle_cache_status(state: &AppState) -> Result<Response<ApiBody>> {
    let total_bytes = state.cache.total_size().await?;
    Ok(json_response(
        StatusCode::OK,
        &CacheStatus { total_bytes },
    ))
}

async fn handle_cache_clear(state: &AppState) -> Result<Response<ApiBody>> {
    let removed = state.cache.clear().await?;
    info!("Cache cleared: {} entries removed", removed);
    Ok(json_response(StatusCode::OK, &CacheClearResult { removed }))
}

fn handle_folders(state: &AppState, rel: &str) -> Result<Response<ApiBody>> {
    if rel.is_empty() {
        let folders = library::list_folders(&state.config.media_root, "", &state.allowed);
        return Ok(json_response(
            StatusCode::OK,
            &FolderListResponse { folders },
        ));
    }

    if !library::is_safe_path(&state.config.media_root, rel) {
        return Err(MediaError::NotFound);
    }

    let contents = library::folder_contents(&state.config.media_root, rel, &state.allowed)
        .ok_or(MediaError::NotFound)?;
    Ok(json_response(StatusCode::OK, &contents))
}

fn handle_playlist_get(state: &AppState, rel: &str) -> Result<Response<ApiBody>> {
    let folder = checked_folder(state, rel)?;
    if !folder.is_dir() {
        return Err(MediaError::NotFound);
    }

    let tracks = playlist::build_playlist(&state.config.media_root, rel, &state.allowed);
    Ok(json_response(
        StatusCode::OK,
        &Playlist {
            path: rel.to_string(),
            tracks,
        },
    ))
}

fn handle_playlist_put(state: &AppState, rel: &str, body: &[u8]) -> Result<Response<ApiBody>> {
    checked_folder(state, rel)?;

    let update: PlaylistUpdate = serde_json::from_slice(body)
        .map_err(|e| MediaError::BadRequest(format!("Invalid playlist body: {}", e)))?;

    let tracks = playlist::update_playlist(
        &state.config.media_root,
        rel,
        &update.tracks,
        &state.allowed,
    )?
    .ok_or(MediaError::NotFound)?;

    Ok(json_response(
        StatusCode::OK,
        &Playlist {
            path: rel.to_string(),
            tracks,
        },
    ))
}

async fn handle_stream(state: &AppState, rel: &str) -> Result<Response<ApiBody>> {
    state.metrics.record_request();

    let file_path = checked_file(state, rel)?;

    let decoded = library::decode_path(rel);
    let ext = library::file_extension(&decoded);
    if !state.allowed.contains(&ext) {
        return Err(MediaError::NotFound);
    }

    let source = SourceFile::stat(&file_path).map_err(|_| MediaError::NotFound)?;
    let passthrough = is_mp3_passthrough(&source);
    let content_type = content_type_for(&ext, passthrough);

    let audio = state.pipeline.open(&source).await?;
    debug!("Streaming {:?} ({:?})", source.path, audio.origin);

    let body = StreamBody::new(audio.stream.map_ok(Frame::data)).boxed_unsync();
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", content_type)
        .header("Cache-Control", "public, max-age=3600")
        .body(body)
        .unwrap())
}

async fn handle_stream_info(state: &AppState, rel: &str) -> Result<Response<ApiBody>> {
    let file_path = checked_file(state, rel)?;

    let decoded = library::decode_path(rel);
    let filename = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let meta = state.prober.probe(&file_path).await;

    Ok(json_response(
        StatusCode::OK,
        &AudioInfo {
            filename,
            duration: meta.duration,
            format: library::file_extension(&decoded),
            bitrate: meta.bitrate,
            sample_rate: meta.sample_rate,
            channels: meta.channels,
        },
    ))
}

/// Validate a folder path and return it decoded and joined to the root
fn checked_folder(state: &AppState, rel: &str) -> Result<std::path::PathBuf> {
    if !rel.is_empty() && !library::is_safe_path(&state.config.media_root, rel) {
        return Err(MediaError::NotFound);
    }
    let decoded = library::decode_path(rel);
    Ok(state.config.media_root.join(decoded))
}

/// Validate a file path: safe, existing, and a regular file
fn checked_file(state: &AppState, rel: &str) -> Result<std::path::PathBuf> {
    if !library::is_safe_path(&state.config.media_root, rel) {
        return Err(MediaError::NotFound);
    }
    let decoded = library::decode_path(rel);
    let file_path = state.config.media_root.join(decoded);
    if !file_path.is_file() {
        return Err(MediaError::NotFound);
    }
    Ok(file_path)
}

/// MIME type for the audio response
///
/// Transcoded output is always MP3; passthrough keeps the source format's
/// native type.
fn content_type_for(ext: &str, passthrough: bool) -> &'static str {
    if !passthrough {
        return "audio/mpeg";
    }
    match ext {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "ogg" => "audio/ogg",
        "m4a" | "mp4" => "audio/mp4",
        _ => "audio/mpeg",
    }
}

fn full(bytes: Bytes) -> ApiBody {
    Full::new(bytes).map_err(|never| match never {}).boxed_unsync()
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ApiBody> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            return error_response(&MediaError::HttpError(e.to_string()));
        }
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(Bytes::from(body)))
        .unwrap()
}

fn error_response(err: &MediaError) -> Response<ApiBody> {
    let status =
        StatusCode::from_u16(err.to_http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if status.is_server_error() {
        warn!("Request failed: {}", err);
    }

    let body = ErrorBody {
        error: match err {
            MediaError::NotFound => "File not found".to_string(),
            other => other.to_string(),
        },
        details: None,
    };
    // Built directly so a serialization failure cannot loop back here
    let body = serde_json::to_vec(&body)
        .unwrap_or_else(|_| br#"{"error":"Internal server error"}"#.to_vec());

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(full(Bytes::from(body)))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    fn test_state(encoder: &str) -> (tempfile::TempDir, Arc<AppState>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("media")).unwrap();
        std::fs::write(dir.path().join("media/track.mp3"), b"mp3 source bytes").unwrap();
        std::fs::write(dir.path().join("media/track.flac"), b"flac source bytes").unwrap();
        std::fs::write(dir.path().join("media/readme.txt"), b"text").unwrap();

        let config = AppConfig {
            media_root: dir.path().join("media"),
            cache_root: dir.path().join("cache"),
            ffmpeg_path: encoder.to_string(),
            ffprobe_path: "tunebox-no-such-probe".to_string(),
            encode_timeout_secs: 10,
            probe_timeout_secs: 1,
            ..AppConfig::default()
        };

        (dir, Arc::new(AppState::new(config)))
    }

    /// An "ffmpeg" that writes a fixed payload to its output path
    fn working_encoder(dir: &std::path::Path) -> String {
        let path = dir.join("fake-ffmpeg");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "for last; do :; done").unwrap();
        writeln!(f, "printf 'encoded output' > \"$last\"").unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    async fn body_bytes(response: Response<ApiBody>) -> Vec<u8> {
        response
            .into_body()
            .collect()
            .await
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn test_route_parsing() {
        assert_eq!(route_for(&Method::GET, "/api/health"), Route::Health);
        assert_eq!(route_for(&Method::GET, "/metrics"), Route::Metrics);
        assert_eq!(route_for(&Method::GET, "/api/cache"), Route::CacheStatus);
        assert_eq!(route_for(&Method::DELETE, "/api/cache"), Route::CacheClear);
        assert_eq!(route_for(&Method::GET, "/api/folders"), Route::FolderList(""));
        assert_eq!(
            route_for(&Method::GET, "/api/folders/Albums"),
            Route::FolderList("Albums")
        );
        assert_eq!(
            route_for(&Method::GET, "/api/folders/Albums/playlist"),
            Route::PlaylistGet("Albums")
        );
        assert_eq!(
            route_for(&Method::PUT, "/api/folders/Albums/playlist"),
            Route::PlaylistPut("Albums")
        );
        assert_eq!(
            route_for(&Method::GET, "/api/folders//playlist"),
            Route::PlaylistGet("")
        );
        assert_eq!(
            route_for(&Method::GET, "/api/stream/Albums%2Ftrack.flac"),
            Route::Stream("Albums%2Ftrack.flac")
        );
        assert_eq!(
            route_for(&Method::GET, "/api/stream/track.flac/info"),
            Route::StreamInfo("track.flac")
        );
        assert_eq!(route_for(&Method::POST, "/api/cache"), Route::Unknown);
        assert_eq!(route_for(&Method::GET, "/nope"), Route::Unknown);
    }

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("flac", false), "audio/mpeg");
        assert_eq!(content_type_for("flac", true), "audio/flac");
        assert_eq!(content_type_for("mp3", true), "audio/mpeg");
        assert_eq!(content_type_for("m4a", true), "audio/mp4");
        assert_eq!(content_type_for("xyz", true), "audio/mpeg");
    }

    #[tokio::test]
    async fn test_stream_passthrough_bytes_and_headers() {
        let (_dir, state) = test_state("false");
        let response = handle_stream(&state, "track.mp3").await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "audio/mpeg"
        );
        assert_eq!(
            response.headers().get("Cache-Control").unwrap(),
            "public, max-age=3600"
        );
        // Range support is not implemented, so it is not advertised
        assert!(response.headers().get("Accept-Ranges").is_none());

        assert_eq!(body_bytes(response).await, b"mp3 source bytes");
    }

    #[tokio::test]
    async fn test_stream_falls_back_on_encoder_failure() {
        let (_dir, state) = test_state("false");
        let response = handle_stream(&state, "track.flac").await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        // The response still claims the transcoded type even when degraded
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "audio/mpeg"
        );
        assert_eq!(body_bytes(response).await, b"flac source bytes");
    }

    #[tokio::test]
    async fn test_stream_encodes_and_caches() {
        let encoder_dir = tempfile::tempdir().unwrap();
        let encoder = working_encoder(encoder_dir.path());
        let (_dir, state) = test_state(&encoder);

        let response = handle_stream(&state, "track.flac").await.unwrap();
        assert_eq!(body_bytes(response).await, b"encoded output");

        // The entry is reused on the second request
        let response = handle_stream(&state, "track.flac").await.unwrap();
        assert_eq!(body_bytes(response).await, b"encoded output");

        let snap = state.metrics.snapshot();
        assert_eq!(snap.encode_success, 1);
        assert_eq!(snap.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_stream_rejections() {
        let (_dir, state) = test_state("false");

        for rel in ["missing.mp3", "readme.txt", "..%2Fescape.mp3", "../escape.mp3"] {
            let err = handle_stream(&state, rel).await.unwrap_err();
            assert!(matches!(err, MediaError::NotFound), "{} should 404", rel);
        }
    }

    #[tokio::test]
    async fn test_stream_info_degrades_without_prober() {
        let (_dir, state) = test_state("false");
        let response = handle_stream_info(&state, "track.flac").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let info: AudioInfo = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(info.filename, "track.flac");
        assert_eq!(info.format, "flac");
        assert_eq!(info.duration, 0.0);
        assert!(info.bitrate.is_none());
    }

    #[tokio::test]
    async fn test_cache_status_and_clear() {
        let (_dir, state) = test_state("false");
        state.cache.ensure_dir().await.unwrap();
        tokio::fs::write(state.cache.entry_path("aaaa"), vec![0u8; 64])
            .await
            .unwrap();

        let response = handle_cache_status(&state).await.unwrap();
        let status: CacheStatus = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.total_bytes, 64);

        let response = handle_cache_clear(&state).await.unwrap();
        let cleared: CacheClearResult =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(cleared.removed, 1);

        let response = handle_cache_status(&state).await.unwrap();
        let status: CacheStatus = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(status.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_folders_and_playlist_handlers() {
        let (_dir, state) = test_state("false");

        let response = handle_folders(&state, "").unwrap();
        let list: FolderListResponse =
            serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert!(list.folders.is_empty());

        let response = handle_playlist_get(&state, "").unwrap();
        let playlist: Playlist = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let names: Vec<_> = playlist.tracks.iter().map(|t| t.filename.as_str()).collect();
        assert_eq!(names, vec!["track.flac", "track.mp3"]);

        // Reorder via PUT body
        let body = serde_json::json!({
            "tracks": [
                {"filename": "track.mp3", "skip": true},
                {"filename": "track.flac"}
            ]
        });
        let response =
            handle_playlist_put(&state, "", &serde_json::to_vec(&body).unwrap()).unwrap();
        let playlist: Playlist = serde_json::from_slice(&body_bytes(response).await).unwrap();
        let names: Vec<_> = playlist.tracks.iter().map(|t| t.filename.as_str()).collect();
        assert_eq!(names, vec!["track.mp3", "track.flac"]);
        assert!(playlist.tracks[0].skip);

        // Malformed body is a 400, not a panic
        let err = handle_playlist_put(&state, "", b"not json").unwrap_err();
        assert!(matches!(err, MediaError::BadRequest(_)));

        let err = handle_playlist_get(&state, "missing").unwrap_err();
        assert!(matches!(err, MediaError::NotFound));
    }

    #[tokio::test]
    async fn test_error_response_shape() {
        let response = error_response(&MediaError::NotFound);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body: ErrorBody = serde_json::from_slice(&body_bytes(response).await).unwrap();
        assert_eq!(body.error, "File not found");
    }
}
