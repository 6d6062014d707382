//! Enumeration of stored media for the preview collaborator and the CLI
//! listing

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

/// One stored media file.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Recursively collect files under `root` with the given extension
/// (case-insensitive), newest first. This is the order the preview
/// browser presents uploads in; it reads the same tree the workers write
/// and never signals back into the pipeline.
pub fn scan_media(root: &Path, extension: &str) -> Result<Vec<MediaEntry>> {
    let mut entries = Vec::new();

    for entry in WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .map(|e| e.eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if !matches {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            entries.push(MediaEntry {
                path: entry.path().to_path_buf(),
                size: metadata.len(),
                modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        } // else: skip unreadable entries
    }

    entries.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(entries)
}
