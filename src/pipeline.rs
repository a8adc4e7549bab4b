//! Streaming pipeline: answers "give me bytes for this request"
//!
//! Decision order, first match wins:
//! 1. a complete cache entry exists for the request's key: stream it;
//! 2. the source is already MP3: stream it untouched (no entry is created);
//! 3. encode into the cache, then stream the new entry; if the encode times
//!    out or the process fails, stream the original source bytes instead.
//!
//! A playback request therefore never hard-fails for transcode trouble as
//! long as the source itself is readable.
//!
//! Encodes are single-flight per cache key: concurrent requests that miss on
//! the same key serialize on a per-key lock, and every waiter re-checks the
//! cache after acquiring it so only the first actually runs the encoder.
//! Combined with the encoder's temp-file-plus-rename publication, a reader
//! can never observe a partially written entry.

use crate::cache::{cache_key, TranscodeCache};
use crate::error::Result;
use crate::metrics::StreamMetrics;
use crate::models::{EncodingProfile, SourceFile};
use crate::transcoder::{EncodeOutcome, Transcoder};
use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

/// Fixed read size for response chunks
///
/// Each chunk read is an await point, so concurrent requests interleave at
/// chunk granularity.
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// A lazily produced, one-shot sequence of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Where the bytes of a response come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOrigin {
    /// An existing cache entry
    CacheHit,
    /// A cache entry created by this request
    CacheFill,
    /// The source file, already in delivery format
    Passthrough,
    /// The source file, served untranscoded after an encode failure
    Fallback,
}

/// An open audio byte stream plus its provenance
pub struct AudioStream {
    pub origin: StreamOrigin,
    pub stream: ByteStream,
}

/// True iff the file can be streamed unmodified
///
/// Extension-only check, case-insensitive, no content sniffing: a renamed
/// non-MP3 file with an `.mp3` extension streams uninspected.
pub fn is_mp3_passthrough(source: &SourceFile) -> bool {
    source.extension() == "mp3"
}

/// Orchestrates cache, classifier and encoder into response byte streams
pub struct StreamingPipeline {
    cache: TranscodeCache,
    transcoder: Transcoder,
    profile: EncodingProfile,
    metrics: Arc<StreamMetrics>,
    in_flight: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl StreamingPipeline {
    pub fn new(
        cache: TranscodeCache,
        transcoder: Transcoder,
        profile: EncodingProfile,
        metrics: Arc<StreamMetrics>,
    ) -> Self {
        StreamingPipeline {
            cache,
            transcoder,
            profile,
            metrics,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Open a byte stream for `source`, encoding into the cache if needed
    ///
    /// The returned stream is not restartable; callers wanting to read again
    /// must call `open` again. Total length is not known in advance when an
    /// encode happens inline.
    pub async fn open(&self, source: &SourceFile) -> Result<AudioStream> {
        let key = cache_key(source, &self.profile);
        let entry = self.cache.entry_path(&key);

        if self.cache.exists(&key).await {
            debug!("Cache hit for {:?} (key {})", source.path, key);
            self.metrics.record_cache_hit();
            return self.open_file(&entry, StreamOrigin::CacheHit).await;
        }

        if is_mp3_passthrough(source) {
            debug!("Passthrough for {:?}", source.path);
            self.metrics.record_passthrough();
            return self.open_file(&source.path, StreamOrigin::Passthrough).await;
        }

        self.metrics.record_cache_miss();

        let lock = self.key_lock(&key);
        let outcome = {
            let _guard = lock.lock().await;

            // Another request may have finished this encode while we waited.
            if self.cache.exists(&key).await {
                debug!("Coalesced encode for key {}", key);
                self.release_key(&key, &lock);
                return self.open_file(&entry, StreamOrigin::CacheHit).await;
            }

            let outcome = self
                .transcoder
                .transcode(&source.path, &entry, &self.profile)
                .await;
            self.metrics.record_encode(outcome);
            outcome
        };
        self.release_key(&key, &lock);

        match outcome {
            EncodeOutcome::Success => self.open_file(&entry, StreamOrigin::CacheFill).await,
            EncodeOutcome::Timeout | EncodeOutcome::ProcessFailure => {
                warn!(
                    "Encode of {:?} did not complete ({:?}); serving original bytes",
                    source.path, outcome
                );
                self.open_file(&source.path, StreamOrigin::Fallback).await
            }
        }
    }

    /// Open a file as a chunked byte stream
    async fn open_file(&self, path: &Path, origin: StreamOrigin) -> Result<AudioStream> {
        let file = tokio::fs::File::open(path).await?;
        let metrics = Arc::clone(&self.metrics);
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)
            .inspect_ok(move |chunk| metrics.record_bytes_streamed(chunk.len() as u64))
            .boxed();

        Ok(AudioStream { origin, stream })
    }

    /// Get or create the in-flight lock for a cache key
    fn key_lock(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.in_flight.lock().unwrap();
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the map entry for `key` once no other request holds it
    fn release_key(&self, key: &str, held: &Arc<AsyncMutex<()>>) {
        let mut map = self.in_flight.lock().unwrap();
        // Two owners means just the map and our own clone: no waiters left.
        if Arc::strong_count(held) <= 2 {
            map.remove(key);
        }
    }
}
