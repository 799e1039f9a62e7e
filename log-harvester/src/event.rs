//! Change notifications and harvested content records.

use std::path::PathBuf;

use notify::event::{ModifyKind, RenameMode};
use serde::{Serialize, Serializer};

/// A file system change reported by a notifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// The kind of event.
    pub kind: FileEventKind,

    /// Path to the affected file or directory.
    pub path: PathBuf,
}

impl FileEvent {
    /// Create a new file event.
    pub fn new(kind: FileEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
        }
    }

    /// Translate a `notify` event into the events the harvester cares about.
    ///
    /// Renames are split: the old name is reported as removed and the new
    /// name as created, so files moved into a watched directory get picked up.
    pub fn from_notify(event: notify::Event) -> Vec<Self> {
        use notify::EventKind;

        let kind = match event.kind {
            EventKind::Create(_) => FileEventKind::Create,
            EventKind::Remove(_) => FileEventKind::Remove,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FileEventKind::Create,
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FileEventKind::Remove,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                let mut paths = event.paths.into_iter();
                return paths
                    .next()
                    .map(|from| Self::new(FileEventKind::Remove, from))
                    .into_iter()
                    .chain(paths.next().map(|to| Self::new(FileEventKind::Create, to)))
                    .collect();
            }
            // Backends that can't tell the two sides of a rename apart.
            EventKind::Modify(ModifyKind::Name(_)) => {
                return event
                    .paths
                    .into_iter()
                    .map(|path| {
                        let kind = if path.exists() {
                            FileEventKind::Create
                        } else {
                            FileEventKind::Remove
                        };
                        Self::new(kind, path)
                    })
                    .collect();
            }
            // Unlinking a file that is still held open only changes its link
            // count, so the delete shows up as a metadata change.
            EventKind::Modify(ModifyKind::Metadata(_)) => {
                return event
                    .paths
                    .into_iter()
                    .filter(|path| !path.exists())
                    .map(|path| Self::new(FileEventKind::Remove, path))
                    .collect();
            }
            EventKind::Modify(_) => FileEventKind::Write,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => return Vec::new(),
        };

        event
            .paths
            .into_iter()
            .map(|path| Self::new(kind, path))
            .collect()
    }
}

/// Kind of file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileEventKind {
    /// A file or directory appeared.
    Create,

    /// File content changed.
    Write,

    /// A file or directory went away.
    Remove,
}

/// A batch of complete lines read from one harvested file.
///
/// Serializes with `content` as text, invalid UTF-8 replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileContent {
    /// The harvested file.
    pub path: PathBuf,

    /// One or more newline-terminated lines, exactly as they appear on disk.
    #[serde(serialize_with = "serialize_lossy")]
    pub content: Vec<u8>,

    /// Whether the last line was the completion marker.
    pub end_of_stream: bool,

    /// File offset just past `content`.
    pub offset: u64,
}

impl FileContent {
    /// Content as text, replacing invalid UTF-8.
    pub fn content_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }
}

fn serialize_lossy<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}
