//! Per-folder playlist ordering, persisted as YAML inside the folder
//!
//! Tracks named by the playlist file come first, in file order; audio files
//! not named by it follow in case-insensitive name order. Entries for files
//! that no longer exist are dropped on every rebuild, so the file heals
//! itself as the folder changes.

use crate::error::{MediaError, Result};
use crate::library::{decode_path, encode_path, is_audio_file};
use crate::models::{PlaylistTrack, PlaylistTrackUpdate};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the playlist file stored inside each ordered folder
pub const PLAYLIST_FILENAME: &str = ".tunebox-playlist.yaml";

/// On-disk playlist schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistFile {
    pub version: u32,
    #[serde(default)]
    pub tracks: Vec<PlaylistFileEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaylistFileEntry {
    pub filename: String,
    #[serde(default)]
    pub skip: bool,
}

/// Path of the playlist file for a folder
pub fn playlist_path(folder: &Path) -> PathBuf {
    folder.join(PLAYLIST_FILENAME)
}

/// Load the playlist file for a folder if present and parsable
pub fn load_playlist_file(folder: &Path) -> Option<PlaylistFile> {
    let path = playlist_path(folder);
    let raw = std::fs::read_to_string(&path).ok()?;

    match serde_yaml::from_str(&raw) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            warn!("Ignoring unparsable playlist {:?}: {}", path, e);
            None
        }
    }
}

/// Persist a playlist file for a folder
pub fn save_playlist_file(folder: &Path, playlist: &PlaylistFile) -> Result<()> {
    let path = playlist_path(folder);
    let raw = serde_yaml::to_string(playlist)
        .map_err(|e| MediaError::PlaylistError(format!("Failed to serialize playlist: {}", e)))?;

    std::fs::write(&path, raw).map_err(|e| {
        MediaError::PlaylistError(format!("Failed to write {:?}: {}", path, e))
    })
}

/// Audio filenames in a folder, sorted case-insensitively
fn audio_files_in_folder(folder: &Path, allowed: &HashSet<String>) -> Vec<String> {
    let entries = match std::fs::read_dir(folder) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files: Vec<String> = entries
        .flatten()
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| is_audio_file(name, allowed))
        .collect();

    files.sort_by_key(|name| name.to_lowercase());
    files
}

fn track_for(relative: &str, filename: &str, skip: bool) -> PlaylistTrack {
    let rel_file = if relative.is_empty() {
        filename.to_string()
    } else {
        format!("{}/{}", decode_path(relative), filename)
    };

    PlaylistTrack {
        filename: filename.to_string(),
        path: encode_path(&rel_file),
        skip,
        duration: None,
    }
}

/// Build the ordered playlist for a folder
pub fn build_playlist(
    base: &Path,
    relative: &str,
    allowed: &HashSet<String>,
) -> Vec<PlaylistTrack> {
    let folder = if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(decode_path(relative))
    };

    let all_files: HashSet<String> = audio_files_in_folder(&folder, allowed).into_iter().collect();
    if all_files.is_empty() {
        return Vec::new();
    }

    let mut tracks = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if let Some(playlist) = load_playlist_file(&folder) {
        for entry in playlist.tracks {
            if !all_files.contains(&entry.filename) {
                debug!("Dropping vanished playlist entry {}", entry.filename);
                continue;
            }
            if !seen.insert(entry.filename.clone()) {
                continue;
            }
            tracks.push(track_for(relative, &entry.filename, entry.skip));
        }
    }

    let mut remaining: Vec<&String> = all_files.iter().filter(|f| !seen.contains(*f)).collect();
    remaining.sort_by_key(|name| name.to_lowercase());
    for filename in remaining {
        tracks.push(track_for(relative, filename, false));
    }

    tracks
}

/// Rewrite a folder's playlist order and skip flags
///
/// Updates naming files that do not exist in the folder are discarded.
/// Returns the rebuilt playlist, or `None` if the folder is missing; a
/// failed write is a caller-visible error.
pub fn update_playlist(
    base: &Path,
    relative: &str,
    updates: &[PlaylistTrackUpdate],
    allowed: &HashSet<String>,
) -> Result<Option<Vec<PlaylistTrack>>> {
    let folder = if relative.is_empty() {
        base.to_path_buf()
    } else {
        base.join(decode_path(relative))
    };

    if !folder.is_dir() {
        return Ok(None);
    }

    let all_files: HashSet<String> = audio_files_in_folder(&folder, allowed).into_iter().collect();

    let playlist = PlaylistFile {
        version: 1,
        tracks: updates
            .iter()
            .filter(|u| all_files.contains(&u.filename))
            .map(|u| PlaylistFileEntry {
                filename: u.filename.clone(),
                skip: u.skip,
            })
            .collect(),
    };

    save_playlist_file(&folder, &playlist)?;

    Ok(Some(build_playlist(base, relative, allowed)))
}
