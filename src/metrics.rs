//! Runtime metrics for the streaming pipeline and cache

use crate::transcoder::EncodeOutcome;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected across all requests
///
/// All counters are monotonic and lock-free; a snapshot is taken for the
/// exposition endpoint.
#[derive(Debug, Default)]
pub struct StreamMetrics {
    requests: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    passthrough: AtomicU64,
    encode_success: AtomicU64,
    encode_timeout: AtomicU64,
    encode_failure: AtomicU64,
    bytes_streamed: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub passthrough: u64,
    pub encode_success: u64,
    pub encode_timeout: u64,
    pub encode_failure: u64,
    pub bytes_streamed: u64,
}

impl StreamMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_passthrough(&self) {
        self.passthrough.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_encode(&self, outcome: EncodeOutcome) {
        let counter = match outcome {
            EncodeOutcome::Success => &self.encode_success,
            EncodeOutcome::Timeout => &self.encode_timeout,
            EncodeOutcome::ProcessFailure => &self.encode_failure,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bytes_streamed(&self, n: u64) {
        self.bytes_streamed.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            passthrough: self.passthrough.load(Ordering::Relaxed),
            encode_success: self.encode_success.load(Ordering::Relaxed),
            encode_timeout: self.encode_timeout.load(Ordering::Relaxed),
            encode_failure: self.encode_failure.load(Ordering::Relaxed),
            bytes_streamed: self.bytes_streamed.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSnapshot {
    /// Cache hit rate as a percentage of lookups
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64 * 100.0
        }
    }

    /// Render in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let counters: [(&str, &str, u64); 8] = [
            (
                "tunebox_requests_total",
                "Total number of stream requests processed",
                self.requests,
            ),
            (
                "tunebox_cache_hits_total",
                "Number of transcode cache hits",
                self.cache_hits,
            ),
            (
                "tunebox_cache_misses_total",
                "Number of transcode cache misses",
                self.cache_misses,
            ),
            (
                "tunebox_passthrough_total",
                "Number of requests served as MP3 passthrough",
                self.passthrough,
            ),
            (
                "tunebox_encode_success_total",
                "Number of successful encodes",
                self.encode_success,
            ),
            (
                "tunebox_encode_timeout_total",
                "Number of encodes aborted on timeout",
                self.encode_timeout,
            ),
            (
                "tunebox_encode_failure_total",
                "Number of encoder process failures",
                self.encode_failure,
            ),
            (
                "tunebox_bytes_streamed_total",
                "Total bytes streamed to clients",
                self.bytes_streamed,
            ),
        ];

        for (name, help, value) in counters {
            out.push_str(&format!("# HELP {} {}\n", name, help));
            out.push_str(&format!("# TYPE {} counter\n", name));
            out.push_str(&format!("{} {}\n\n", name, value));
        }

        out.push_str("# HELP tunebox_cache_hit_rate Cache hit rate percentage\n");
        out.push_str("# TYPE tunebox_cache_hit_rate gauge\n");
        out.push_str(&format!("tunebox_cache_hit_rate {:.2}\n", self.cache_hit_rate()));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = StreamMetrics::new();
        metrics.record_request();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_passthrough();
        metrics.record_encode(EncodeOutcome::Success);
        metrics.record_encode(EncodeOutcome::Timeout);
        metrics.record_encode(EncodeOutcome::ProcessFailure);
        metrics.record_bytes_streamed(4096);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 2);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
        assert_eq!(snap.passthrough, 1);
        assert_eq!(snap.encode_success, 1);
        assert_eq!(snap.encode_timeout, 1);
        assert_eq!(snap.encode_failure, 1);
        assert_eq!(snap.bytes_streamed, 4096);
    }

    #[test]
    fn test_hit_rate() {
        let metrics = StreamMetrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        assert_eq!(metrics.snapshot().cache_hit_rate(), 75.0);
    }

    #[test]
    fn test_hit_rate_no_lookups() {
        assert_eq!(MetricsSnapshot::default().cache_hit_rate(), 0.0);
    }

    #[test]
    fn test_prometheus_rendering() {
        let metrics = StreamMetrics::new();
        metrics.record_request();
        metrics.record_cache_hit();
        metrics.record_bytes_streamed(100);

        let out = metrics.snapshot().render_prometheus();
        assert!(out.contains("tunebox_requests_total 1"));
        assert!(out.contains("tunebox_cache_hits_total 1"));
        assert!(out.contains("tunebox_bytes_streamed_total 100"));
        assert!(out.contains("# TYPE tunebox_requests_total counter"));
        assert!(out.contains("# TYPE tunebox_cache_hit_rate gauge"));
        assert!(out.contains("tunebox_cache_hit_rate 100.00"));
    }
}
