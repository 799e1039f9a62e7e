//! Recursive discovery of harvestable files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::FilePattern;
use crate::cursor;

/// Result of one discovery walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Entries visited, directories included.
    pub visited: usize,

    /// Files that matched the pattern.
    pub matched: usize,

    /// Matched files a new harvest was started for.
    pub dispatched: usize,

    /// Matched files that were already being harvested.
    pub already_active: usize,

    /// Entries that could not be read.
    pub errors: usize,
}

/// Walk `root` and collect every regular, non-cursor file whose path
/// matches `pattern`. Unreadable entries are logged and skipped.
pub fn discover(root: &Path, pattern: &FilePattern) -> (Vec<PathBuf>, ScanReport) {
    let mut report = ScanReport::default();
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Failed to walk {}: {e}", root.display());
                report.errors += 1;
                continue;
            }
        };
        report.visited += 1;

        let file_type = entry.file_type();
        if file_type.is_dir() || file_type.is_symlink() {
            continue;
        }

        let path = entry.path();
        if cursor::is_cursor_path(path) {
            continue;
        }

        if pattern.matches(path) {
            debug!("Discovered {}", path.display());
            report.matched += 1;
            files.push(path.to_path_buf());
        }
    }

    (files, report)
}

/// `root` and every directory below it, symlinks not followed.
pub fn directories(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Failed to walk {}: {e}", root.display());
                None
            }
        })
        .filter(|entry| entry.file_type().is_dir())
        .map(walkdir::DirEntry::into_path)
        .collect()
}
