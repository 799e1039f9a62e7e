//! Incremental harvesting of a single file.
//!
//! A [`FileHarvester`] opens its file, resumes from the persisted cursor and
//! then waits on whichever comes first: a change notification, the flush
//! tick, the stall deadline or cancellation. Complete lines are batched and
//! sent downstream; the cursor is only advanced after the batch was accepted
//! by the output queue.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::cursor;
use crate::error::{HarvestError, Result};
use crate::event::{FileContent, FileEventKind};
use crate::notifier::NotifierFactory;

/// How a harvest ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// The completion marker was delivered.
    Completed,

    /// No writes arrived within the stall timeout.
    Stalled,

    /// The file was removed by someone else.
    Removed,

    /// Shutdown was requested.
    Cancelled,

    /// An unrecoverable error; nothing is retried.
    Failed(String),
}

/// Harvests one file until it completes, stalls, disappears or fails.
pub struct FileHarvester {
    path: PathBuf,
    config: Arc<HarvestConfig>,
    output: mpsc::Sender<FileContent>,
    cancel: CancellationToken,
}

impl FileHarvester {
    /// Create a harvester for `path` that sends batches to `output`.
    pub fn new(
        path: impl Into<PathBuf>,
        config: Arc<HarvestConfig>,
        output: mpsc::Sender<FileContent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            path: path.into(),
            config,
            output,
            cancel,
        }
    }

    /// The harvested file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run to a terminal state. Errors are logged and reported as
    /// [`HarvestOutcome::Failed`].
    pub async fn run(self, factory: &dyn NotifierFactory) -> HarvestOutcome {
        let path = self.path.clone();
        let outcome = match self.harvest(factory).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Harvest of {} failed: {e}", path.display());
                HarvestOutcome::Failed(e.to_string())
            }
        };
        info!("Stopped harvesting {}: {outcome:?}", path.display());
        outcome
    }

    async fn harvest(self, factory: &dyn NotifierFactory) -> Result<HarvestOutcome> {
        let mut task = HarvestTask::open(self.path, self.config.clone(), self.output).await?;

        let (mut notifier, mut events) = factory.create()?;
        notifier.subscribe(&task.path)?;

        // Read whatever is already there without waiting for a first write.
        if task.read_available().await? == Progress::EndOfStream {
            return Ok(task.complete().await);
        }

        let flush_interval = self.config.flush_interval;
        let stall_timeout = self.config.stall_timeout;

        let mut flush_tick =
            tokio::time::interval_at(Instant::now() + flush_interval, flush_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stall = tokio::time::sleep(stall_timeout);
        tokio::pin!(stall);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    task.flush(true).await?;
                    return Ok(HarvestOutcome::Cancelled);
                }
                event = events.recv() => {
                    let event = event.ok_or(HarvestError::NotifierClosed)??;
                    match event.kind {
                        FileEventKind::Write => {
                            stall.as_mut().reset(Instant::now() + stall_timeout);
                            task.stale_at_open = false;
                            match task.read_available().await? {
                                Progress::EndOfStream => return Ok(task.complete().await),
                                Progress::Continue { flushed: true } => flush_tick.reset(),
                                Progress::Continue { flushed: false } => {}
                            }
                        }
                        FileEventKind::Remove => {
                            info!("{} was removed", task.path.display());
                            // The cursor would outlive its file; skip it.
                            task.flush(false).await?;
                            return Ok(HarvestOutcome::Removed);
                        }
                        FileEventKind::Create => {}
                    }
                }
                _ = flush_tick.tick() => {
                    task.flush(true).await?;
                    if task.stale_at_open {
                        info!(
                            "{} has not been written to for over {stall_timeout:?}",
                            task.path.display()
                        );
                        return Ok(HarvestOutcome::Stalled);
                    }
                }
                () = &mut stall => {
                    task.flush(true).await?;
                    info!("{} stalled for {stall_timeout:?}", task.path.display());
                    return Ok(HarvestOutcome::Stalled);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Continue { flushed: bool },
    EndOfStream,
}

/// Read state for one open file.
struct HarvestTask {
    path: PathBuf,
    cursor_path: PathBuf,
    config: Arc<HarvestConfig>,
    output: mpsc::Sender<FileContent>,
    reader: BufReader<File>,
    offset: u64,
    line: Vec<u8>,
    batch: Vec<u8>,
    batch_lines: usize,
    end_of_stream: bool,
    stale_at_open: bool,
}

impl HarvestTask {
    async fn open(
        path: PathBuf,
        config: Arc<HarvestConfig>,
        output: mpsc::Sender<FileContent>,
    ) -> Result<Self> {
        let file = File::open(&path).await?;
        let metadata = file.metadata().await?;
        let cursor_path = cursor::cursor_path(&path);

        let mut offset = cursor::read(&cursor_path).await;
        if offset > metadata.len() {
            warn!(
                "Cursor for {} is past the end of the file ({offset} > {}), starting over",
                path.display(),
                metadata.len()
            );
            offset = 0;
        }

        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(offset)).await?;

        let modified = metadata.modified()?;
        let idle = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        let stale_at_open = idle > config.stall_timeout;

        info!(
            "Harvesting {} from offset {offset} (last modified {}{})",
            path.display(),
            DateTime::<Utc>::from(modified).to_rfc3339(),
            if stale_at_open { ", stale" } else { "" }
        );

        Ok(Self {
            path,
            cursor_path,
            config,
            output,
            reader,
            offset,
            line: Vec::new(),
            batch: Vec::new(),
            batch_lines: 0,
            end_of_stream: false,
            stale_at_open,
        })
    }

    /// Consume every complete line past the current offset. A trailing line
    /// without its newline is left for the next read.
    async fn read_available(&mut self) -> Result<Progress> {
        let mut flushed = false;

        loop {
            self.line.clear();
            let read = self.reader.read_until(b'\n', &mut self.line).await?;
            if read == 0 {
                break;
            }
            if self.line.last() != Some(&b'\n') {
                self.reader.seek(SeekFrom::Start(self.offset)).await?;
                break;
            }

            self.offset += read as u64;
            self.batch.extend_from_slice(&self.line);
            self.batch_lines += 1;

            if is_marker(&self.line, &self.config.complete_marker) {
                self.end_of_stream = true;
                self.flush(true).await?;
                return Ok(Progress::EndOfStream);
            }

            if self.batch_lines >= self.config.max_batch_lines {
                self.flush(true).await?;
                flushed = true;
            }
        }

        Ok(Progress::Continue { flushed })
    }

    /// Hand the pending batch to the output queue, then persist the offset
    /// if asked to. Returns whether anything was sent.
    async fn flush(&mut self, persist_cursor: bool) -> Result<bool> {
        if self.batch.is_empty() {
            return Ok(false);
        }

        let lines = std::mem::take(&mut self.batch_lines);
        let record = FileContent {
            path: self.path.clone(),
            content: std::mem::take(&mut self.batch),
            end_of_stream: self.end_of_stream,
            offset: self.offset,
        };

        self.output
            .send(record)
            .await
            .map_err(|_| HarvestError::OutputClosed)?;
        debug!(
            "Flushed {lines} lines from {} up to offset {}",
            self.path.display(),
            self.offset
        );

        if persist_cursor {
            if let Err(e) = cursor::write(&self.cursor_path, self.offset).await {
                warn!(
                    "Failed to save cursor {} at {}: {e}",
                    self.cursor_path.display(),
                    self.offset
                );
            }
        }

        Ok(true)
    }

    /// Finish after the completion marker was delivered, deleting the file
    /// and its cursor when configured to. Failed deletions are only logged.
    async fn complete(self) -> HarvestOutcome {
        info!("{} is complete", self.path.display());

        if self.config.remove_after_complete {
            drop(self.reader);

            let file_removed = fs::remove_file(&self.path).await;
            let cursor_removed = cursor::remove(&self.cursor_path).await;

            match (file_removed, cursor_removed) {
                (Ok(()), Ok(())) => info!("Removed {} and its cursor", self.path.display()),
                (file_result, cursor_result) => {
                    if let Err(e) = file_result {
                        warn!("Failed to remove {}: {e}", self.path.display());
                    }
                    if let Err(e) = cursor_result {
                        warn!("Failed to remove {}: {e}", self.cursor_path.display());
                    }
                }
            }
        }

        HarvestOutcome::Completed
    }
}

/// Whether a newline-terminated line is exactly the marker. A CRLF ending is
/// accepted as well.
fn is_marker(line: &[u8], marker: &str) -> bool {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    line == marker.as_bytes()
}
