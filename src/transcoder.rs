//! Encoder invoker: drives an external ffmpeg process to populate the cache
//!
//! The encoder never writes to the destination path directly. Output goes to
//! a uniquely named temporary file next to the destination and is renamed
//! into place only after the process exits cleanly, so a concurrent reader
//! can never observe a partially written cache entry.

use crate::config::AppConfig;
use crate::models::EncodingProfile;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Tagged result of an encode attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeOutcome {
    /// The destination now holds a complete, readable cache entry
    Success,
    /// The attempt exceeded the time bound; partial output was removed
    Timeout,
    /// The external process exited non-zero or could not be started
    ProcessFailure,
}

/// Invokes ffmpeg to produce an MP3 cache entry from a source file
#[derive(Debug, Clone)]
pub struct Transcoder {
    ffmpeg: String,
    timeout: Duration,
}

impl Transcoder {
    pub fn new(ffmpeg: impl Into<String>, timeout: Duration) -> Self {
        Transcoder {
            ffmpeg: ffmpeg.into(),
            timeout,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.ffmpeg_path.clone(),
            Duration::from_secs(config.encode_timeout_secs),
        )
    }

    /// Transcode `source` into an MP3 at `dest`
    ///
    /// Creates the destination's parent directory if absent. The encoder is
    /// invoked with no video stream, the LAME MP3 codec and the profile's
    /// VBR quality; the profile's CBR bitrate is part of the cache identity
    /// but is not passed to the encoder. The wait is bounded; on timeout the
    /// child is killed and the partial output removed.
    pub async fn transcode(
        &self,
        source: &Path,
        dest: &Path,
        profile: &EncodingProfile,
    ) -> EncodeOutcome {
        let parent = match dest.parent() {
            Some(parent) => parent,
            None => {
                warn!("Destination {:?} has no parent directory", dest);
                return EncodeOutcome::ProcessFailure;
            }
        };

        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!("Failed to create {:?}: {}", parent, e);
            return EncodeOutcome::ProcessFailure;
        }

        // Staged in the same directory so the final rename is atomic.
        // Dropping the guard unlinks the partial file on every non-success
        // path, including cancellation of this future.
        let staging = match tempfile::Builder::new()
            .prefix(".encode-")
            .suffix(".tmp")
            .tempfile_in(parent)
        {
            Ok(staging) => staging,
            Err(e) => {
                warn!("Failed to create staging file in {:?}: {}", parent, e);
                return EncodeOutcome::ProcessFailure;
            }
        };

        let mut cmd = Command::new(&self.ffmpeg);
        cmd.arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-vn")
            .arg("-codec:a")
            .arg("libmp3lame")
            .arg("-q:a")
            .arg(profile.quality.to_string())
            // The staging file has a .tmp suffix, so the container format
            // cannot be inferred from the output path.
            .arg("-f")
            .arg("mp3")
            .arg(staging.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        debug!(
            "Encoding {:?} -> {:?} (q:a {})",
            source,
            dest,
            profile.quality
        );

        let output = match timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!("Failed to run {}: {}", self.ffmpeg, e);
                return EncodeOutcome::ProcessFailure;
            }
            Err(_) => {
                warn!(
                    "Encode of {:?} timed out after {:?}",
                    source, self.timeout
                );
                return EncodeOutcome::Timeout;
            }
        };

        if !output.status.success() {
            warn!(
                "Encoder exited with {:?} for {:?}",
                output.status.code(),
                source
            );
            return EncodeOutcome::ProcessFailure;
        }

        match staging.persist(dest) {
            Ok(_) => {
                info!("Encoded {:?} -> {:?}", source, dest);
                EncodeOutcome::Success
            }
            Err(e) => {
                warn!("Failed to publish cache entry {:?}: {}", dest, e.error);
                EncodeOutcome::ProcessFailure
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;

    fn profile() -> EncodingProfile {
        EncodingProfile {
            quality: 2,
            bitrate: 192,
        }
    }

    /// Write an executable stand-in for ffmpeg into `dir`
    fn fake_encoder(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "#!/bin/sh").unwrap();
        writeln!(f, "{}", body).unwrap();
        drop(f);
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_success_publishes_entry() {
        let dir = tempfile::tempdir().unwrap();
        // Writes a marker to its last argument (the staging path) and exits 0
        let encoder = fake_encoder(
            dir.path(),
            "for last; do :; done\nprintf 'mp3 bytes' > \"$last\"",
        );

        let dest = dir.path().join("cache").join("abcd.mp3");
        let transcoder =
            Transcoder::new(encoder.to_string_lossy(), Duration::from_secs(5));
        let outcome = transcoder
            .transcode(&dir.path().join("in.flac"), &dest, &profile())
            .await;

        assert_eq!(outcome, EncodeOutcome::Success);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "mp3 bytes");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abcd.mp3");
        let transcoder = Transcoder::new("false", Duration::from_secs(5));
        let outcome = transcoder
            .transcode(&dir.path().join("in.flac"), &dest, &profile())
            .await;

        assert_eq!(outcome, EncodeOutcome::ProcessFailure);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("abcd.mp3");
        let transcoder =
            Transcoder::new("tunebox-no-such-encoder", Duration::from_secs(5));
        let outcome = transcoder
            .transcode(&dir.path().join("in.flac"), &dest, &profile())
            .await;

        assert_eq!(outcome, EncodeOutcome::ProcessFailure);
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_timeout_leaves_no_output() {
        let dir = tempfile::tempdir().unwrap();
        // Starts writing, then hangs well past the timeout
        let encoder = fake_encoder(
            dir.path(),
            "for last; do :; done\nprintf 'partial' > \"$last\"\nsleep 30",
        );

        let dest = dir.path().join("abcd.mp3");
        let transcoder =
            Transcoder::new(encoder.to_string_lossy(), Duration::from_millis(200));
        let outcome = transcoder
            .transcode(&dir.path().join("in.flac"), &dest, &profile())
            .await;

        assert_eq!(outcome, EncodeOutcome::Timeout);
        assert!(!dest.exists());
        // The staging file must be gone too
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_creates_destination_parent() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = fake_encoder(
            dir.path(),
            "for last; do :; done\nprintf 'x' > \"$last\"",
        );

        let dest = dir.path().join("deep").join("nested").join("abcd.mp3");
        let transcoder =
            Transcoder::new(encoder.to_string_lossy(), Duration::from_secs(5));
        let outcome = transcoder
            .transcode(&dir.path().join("in.flac"), &dest, &profile())
            .await;

        assert_eq!(outcome, EncodeOutcome::Success);
        assert!(dest.exists());
    }
}
