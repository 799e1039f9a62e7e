//! Persisted read offsets.
//!
//! Each harvested file `name.ext` gets a sibling `name.cursor` holding the
//! decimal byte offset of everything already handed downstream.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::Result;

/// Extension of cursor files.
pub const CURSOR_EXTENSION: &str = "cursor";

const CURSOR_SUFFIX: &str = ".cursor";

/// Path of the cursor file belonging to `file`.
pub fn cursor_path(file: &Path) -> PathBuf {
    file.with_extension(CURSOR_EXTENSION)
}

/// Whether `path` names a cursor file.
pub fn is_cursor_path(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name.to_string_lossy().ends_with(CURSOR_SUFFIX))
}

/// Read a persisted offset.
///
/// A missing or unreadable cursor yields 0: harvesting starts over rather
/// than refusing to start.
pub async fn read(cursor: &Path) -> u64 {
    let text = match fs::read_to_string(cursor).await {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(cursor = %cursor.display(), "no cursor, starting at 0");
            return 0;
        }
        Err(e) => {
            warn!(cursor = %cursor.display(), "failed to read cursor: {e}");
            return 0;
        }
    };

    match text.trim().parse::<u64>() {
        Ok(offset) => offset,
        Err(e) => {
            warn!(cursor = %cursor.display(), "malformed cursor {text:?}: {e}");
            0
        }
    }
}

/// Overwrite the cursor with `offset`.
pub async fn write(cursor: &Path, offset: u64) -> Result<()> {
    fs::write(cursor, offset.to_string()).await?;
    Ok(())
}

/// Delete a cursor. A cursor that was never written is not an error.
pub async fn remove(cursor: &Path) -> Result<()> {
    match fs::remove_file(cursor).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_cursor_path_replaces_extension() {
        assert_eq!(
            cursor_path(Path::new("/logs/app.log")),
            Path::new("/logs/app.cursor")
        );
        assert_eq!(
            cursor_path(Path::new("/logs/app.2024-01-01.log")),
            Path::new("/logs/app.2024-01-01.cursor")
        );
        assert_eq!(cursor_path(Path::new("/logs/app")), Path::new("/logs/app.cursor"));
    }

    #[test]
    fn test_is_cursor_path() {
        assert!(is_cursor_path(Path::new("/logs/app.cursor")));
        assert!(!is_cursor_path(Path::new("/logs/app.log")));
        assert!(!is_cursor_path(Path::new("/logs/cursor")));
        assert!(is_cursor_path(Path::new("/logs/.cursor")));
        assert!(is_cursor_path(Path::new("/logs/app.log.cursor")));
    }

    #[tokio::test]
    async fn test_missing_cursor_reads_zero() {
        let temp_dir = TempDir::new().unwrap();
        assert_eq!(read(&temp_dir.path().join("none.cursor")).await, 0);
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let cursor = temp_dir.path().join("a.cursor");

        write(&cursor, 123_456).await.unwrap();
        assert_eq!(read(&cursor).await, 123_456);

        // Shorter values must not leave stale digits behind.
        write(&cursor, 7).await.unwrap();
        assert_eq!(std::fs::read_to_string(&cursor).unwrap(), "7");
        assert_eq!(read(&cursor).await, 7);
    }

    #[tokio::test]
    async fn test_malformed_cursor_reads_zero() {
        let temp_dir = TempDir::new().unwrap();
        let cursor = temp_dir.path().join("a.cursor");
        std::fs::write(&cursor, "not a number").unwrap();

        assert_eq!(read(&cursor).await, 0);
    }

    #[tokio::test]
    async fn test_trailing_newline_is_tolerated() {
        let temp_dir = TempDir::new().unwrap();
        let cursor = temp_dir.path().join("a.cursor");
        std::fs::write(&cursor, "42\n").unwrap();

        assert_eq!(read(&cursor).await, 42);
    }

    #[tokio::test]
    async fn test_remove_missing_cursor_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let cursor = temp_dir.path().join("a.cursor");

        remove(&cursor).await.unwrap();
        write(&cursor, 1).await.unwrap();
        remove(&cursor).await.unwrap();
        assert!(!cursor.exists());
    }
}
