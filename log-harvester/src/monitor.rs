//! Directory monitoring and harvest dispatch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HarvestConfig;
use crate::cursor;
use crate::error::{HarvestError, Result};
use crate::event::{FileContent, FileEvent, FileEventKind};
use crate::harvester::FileHarvester;
use crate::notifier::{ChangeNotifier, NotifierFactory, NotifyFactory};
use crate::scan::{self, ScanReport};

/// Watches a directory tree and runs one [`FileHarvester`] per matching file.
///
/// The monitor:
/// - Discovers existing files once ([`scan`](Self::scan))
/// - Follows new files and subdirectories ([`start`](Self::start))
/// - Never runs two harvests for the same path
/// - Cancels every harvest it started on [`shutdown`](Self::shutdown)
pub struct DirectoryMonitor {
    /// Shared, read-only settings.
    config: Arc<HarvestConfig>,

    /// Source of change notifications.
    factory: Arc<dyn NotifierFactory>,

    /// Producer side of the output queue, cloned into every harvest.
    output: mpsc::Sender<FileContent>,

    /// Active harvests by path.
    harvests: Arc<Mutex<HashMap<PathBuf, CancellationToken>>>,

    /// Whether a watch loop is running.
    watching: AtomicBool,

    /// Whether the initial scan has run.
    scanned: AtomicBool,

    /// Parent of every harvest's cancellation token.
    shutdown: CancellationToken,
}

impl DirectoryMonitor {
    /// Create a monitor and the receiving end of its output queue.
    pub fn new(
        config: HarvestConfig,
        factory: Arc<dyn NotifierFactory>,
    ) -> Result<(Self, mpsc::Receiver<FileContent>)> {
        config.validate()?;
        let (output, output_rx) = mpsc::channel(config.queue_capacity);

        let monitor = Self {
            config: Arc::new(config),
            factory,
            output,
            harvests: Arc::new(Mutex::new(HashMap::new())),
            watching: AtomicBool::new(false),
            scanned: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        };

        Ok((monitor, output_rx))
    }

    /// Create a monitor backed by the platform's native file watcher.
    pub fn with_native_notifier(
        config: HarvestConfig,
    ) -> Result<(Self, mpsc::Receiver<FileContent>)> {
        Self::new(config, Arc::new(NotifyFactory))
    }

    /// The monitor's settings.
    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    /// Walk the tree once and start harvesting every matching file.
    ///
    /// Only the first call does anything; later calls return `None`.
    pub async fn scan(&self) -> Option<ScanReport> {
        if self.scanned.swap(true, Ordering::SeqCst) {
            debug!("Initial scan of {} already done", self.config.dir.display());
            return None;
        }

        info!("Scanning {} for unharvested files", self.config.dir.display());
        let report = self.discover(&self.config.dir).await;
        info!(
            "Scan of {} finished: {} matched, {} started, {} already active, {} errors",
            self.config.dir.display(),
            report.matched,
            report.dispatched,
            report.already_active,
            report.errors
        );

        Some(report)
    }

    /// Watch the tree until shutdown or a notification error.
    ///
    /// Returns immediately if a watch is already running. On a notification
    /// error the loop ends and the error is returned; harvests keep running
    /// and `start` may be called again. Every start after the first walks the
    /// tree again, since files may have appeared while nothing was watching.
    pub async fn start(&self) -> Result<()> {
        if self
            .watching
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("{} is already being watched", self.config.dir.display());
            return Ok(());
        }
        let _guard = WatchingGuard(&self.watching);

        let result = self.watch().await;
        match &result {
            Ok(()) => info!("Stopped watching {}", self.config.dir.display()),
            Err(e) => error!("Watching {} failed: {e}", self.config.dir.display()),
        }
        result
    }

    /// Stop the watch loop and cancel every harvest. Cancelled harvests flush
    /// what they already read. The monitor cannot be restarted afterwards.
    pub fn shutdown(&self) {
        info!("Shutting down monitor for {}", self.config.dir.display());
        self.shutdown.cancel();
    }

    /// Check if the watch loop is running.
    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Paths currently being harvested.
    pub async fn active_harvests(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.harvests.lock().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    async fn watch(&self) -> Result<()> {
        let root = &self.config.dir;
        if !root.is_dir() {
            return Err(HarvestError::DirectoryNotFound(root.display().to_string()));
        }

        let (mut notifier, mut events) = self.factory.create()?;
        for dir in scan::directories(root) {
            notifier.subscribe(&dir)?;
        }
        info!("Watching {}", root.display());

        // After a restart, pick up files whose events were lost in between.
        if self.scan().await.is_none() {
            let report = self.discover(root).await;
            info!(
                "Rescan of {} after restart: {} matched, {} started",
                root.display(),
                report.matched,
                report.dispatched
            );
        }

        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => return Ok(()),
                event = events.recv() => {
                    let event = event.ok_or(HarvestError::NotifierClosed)??;
                    self.handle_event(notifier.as_mut(), event).await;
                }
            }
        }
    }

    async fn handle_event(&self, notifier: &mut dyn ChangeNotifier, event: FileEvent) {
        let path = event.path;

        if cursor::is_cursor_path(&path) {
            let _ = notifier.unsubscribe(&path);
            return;
        }
        if event.kind != FileEventKind::Create {
            return;
        }

        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Failed to inspect new entry {}: {e}", path.display());
                return;
            }
        };

        if metadata.is_dir() {
            self.follow_directory(notifier, &path).await;
            return;
        }

        if metadata.file_type().is_symlink() {
            debug!("Ignoring symlink {}", path.display());
            return;
        }

        if !self.config.pattern.matches(&path) {
            let _ = notifier.unsubscribe(&path);
            warn!("Ignoring unexpected file {}", path.display());
            return;
        }

        self.dispatch(path).await;
    }

    /// Subscribe a new directory and pick up anything created in it before
    /// the subscription took effect.
    async fn follow_directory(&self, notifier: &mut dyn ChangeNotifier, dir: &Path) {
        info!("Adding new directory to watch: {}", dir.display());
        for sub_dir in scan::directories(dir) {
            if let Err(e) = notifier.subscribe(&sub_dir) {
                warn!("Failed to watch {}: {e}", sub_dir.display());
            }
        }

        self.discover(dir).await;
    }

    async fn discover(&self, dir: &Path) -> ScanReport {
        let (files, mut report) = scan::discover(dir, &self.config.pattern);
        for file in files {
            if self.dispatch(file).await {
                report.dispatched += 1;
            } else {
                report.already_active += 1;
            }
        }
        report
    }

    /// Start a harvest for `path` unless one is already running. Returns
    /// whether a harvest was started.
    async fn dispatch(&self, path: PathBuf) -> bool {
        let cancel = {
            let mut harvests = self.harvests.lock().await;
            if harvests.contains_key(&path) {
                debug!("{} is already being harvested", path.display());
                return false;
            }
            let cancel = self.shutdown.child_token();
            harvests.insert(path.clone(), cancel.clone());
            cancel
        };

        info!("Watching: {}", path.display());
        let harvester = FileHarvester::new(
            path.clone(),
            self.config.clone(),
            self.output.clone(),
            cancel,
        );
        let factory = self.factory.clone();
        let harvests = self.harvests.clone();

        tokio::spawn(async move {
            harvester.run(factory.as_ref()).await;
            harvests.lock().await.remove(&path);
        });

        true
    }
}

/// Clears the watching flag however the watch loop exits.
struct WatchingGuard<'a>(&'a AtomicBool);

impl Drop for WatchingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
