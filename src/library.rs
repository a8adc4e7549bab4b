//! Media library browsing: path safety, folder and file listing
//!
//! All listing operations are single-shot directory scans with no shared
//! state. Permission problems degrade to empty results rather than errors;
//! only the HTTP layer turns a missing folder into a 404.

use crate::models::{AudioFile, FolderContents, FolderItem};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Everything except RFC 3986 unreserved characters gets percent-encoded
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Percent-encode a relative path for use in API responses
pub fn encode_path(path: &str) -> String {
    utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

/// Decode a percent-encoded path
pub fn decode_path(encoded: &str) -> String {
    percent_decode_str(encoded)
        .decode_utf8_lossy()
        .into_owned()
}

/// Check that a requested path cannot escape the media root
///
/// Rejects raw or encoded `..` components and absolute paths outright. If
/// the target exists its canonical form must still sit under the canonical
/// base, which also catches symlinks pointing outside the library.
pub fn is_safe_path(base: &Path, requested: &str) -> bool {
    if requested.contains("..") {
        return false;
    }

    let decoded = decode_path(requested);
    let decoded_path = Path::new(&decoded);

    if decoded_path.is_absolute() {
        return false;
    }
    if decoded_path
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return false;
    }

    let full = base.join(decoded_path);
    match full.canonicalize() {
        Ok(resolved) => match base.canonicalize() {
            Ok(canonical_base) => resolved.starts_with(canonical_base),
            Err(_) => false,
        },
        // Nonexistent paths are lexically contained; existence is checked
        // separately by the caller.
        Err(_) => true,
    }
}

/// Lowercase file extension without the dot, empty if none
pub fn file_extension(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Whether a filename carries one of the allowed audio extensions
pub fn is_audio_file(filename: &str, allowed: &HashSet<String>) -> bool {
    allowed.contains(&file_extension(filename))
}

/// Resolve a (possibly empty) encoded relative path under the base
fn resolve(base: &Path, relative: &str) -> PathBuf {
    if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(decode_path(relative))
    }
}

/// Whether a folder directly contains any audio files (non-recursive)
fn folder_has_audio(folder: &Path, allowed: &HashSet<String>) -> bool {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(_) => return false,
    };

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        if entry.path().is_file() && is_audio_file(&name, allowed) {
            return true;
        }
    }
    false
}

/// Count immediate subfolders
fn count_subfolders(folder: &Path) -> usize {
    match std::fs::read_dir(folder) {
        Ok(entries) => entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .count(),
        Err(_) => 0,
    }
}

/// List folders under `relative`, sorted case-insensitively by name
///
/// Hidden (dot-prefixed) directories are skipped. Missing or unreadable
/// directories list as empty.
pub fn list_folders(base: &Path, relative: &str, allowed: &HashSet<String>) -> Vec<FolderItem> {
    let full = resolve(base, relative);
    if !full.is_dir() {
        return Vec::new();
    }

    let entries = match std::fs::read_dir(&full) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to read {:?}: {}", full, e);
            return Vec::new();
        }
    };

    let mut folders: Vec<FolderItem> = entries
        .flatten()
        .filter(|e| e.path().is_dir())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                return None;
            }
            let rel = e
                .path()
                .strip_prefix(base)
                .ok()?
                .to_string_lossy()
                .into_owned();
            Some(FolderItem {
                has_audio: folder_has_audio(&e.path(), allowed),
                subfolder_count: count_subfolders(&e.path()),
                path: encode_path(&rel),
                name,
            })
        })
        .collect();

    folders.sort_by_key(|f| f.name.to_lowercase());
    folders
}

/// List audio files under `relative`, sorted case-insensitively by name
pub fn list_audio_files(base: &Path, relative: &str, allowed: &HashSet<String>) -> Vec<AudioFile> {
    let full = resolve(base, relative);
    if !full.is_dir() {
        return Vec::new();
    }

    let entries = match std::fs::read_dir(&full) {
        Ok(entries) => entries,
        Err(e) => {
            debug!("Failed to read {:?}: {}", full, e);
            return Vec::new();
        }
    };

    let mut files: Vec<AudioFile> = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().into_owned();
            if !is_audio_file(&name, allowed) {
                return None;
            }
            let rel = e
                .path()
                .strip_prefix(base)
                .ok()?
                .to_string_lossy()
                .into_owned();
            let size = e.metadata().map(|m| m.len()).unwrap_or(0);
            Some(AudioFile {
                format: file_extension(&name),
                path: encode_path(&rel),
                filename: name,
                size,
            })
        })
        .collect();

    files.sort_by_key(|f| f.filename.to_lowercase());
    files
}

/// Complete contents of a folder, `None` for unsafe or missing paths
pub fn folder_contents(
    base: &Path,
    relative: &str,
    allowed: &HashSet<String>,
) -> Option<FolderContents> {
    if !relative.is_empty() && !is_safe_path(base, relative) {
        return None;
    }

    let full = resolve(base, relative);
    if !full.is_dir() {
        return None;
    }

    let name = if relative.is_empty() {
        "Root".to_string()
    } else {
        full.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Root".to_string())
    };

    Some(FolderContents {
        path: relative.to_string(),
        name,
        folders: list_folders(base, relative, allowed),
        files: list_audio_files(base, relative, allowed),
    })
}
