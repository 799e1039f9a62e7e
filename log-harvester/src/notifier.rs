//! Change-notification backends.
//!
//! The monitor and every harvester create their own notifier through a
//! [`NotifierFactory`], subscribe the paths they care about, and read
//! translated [`FileEvent`]s from the returned stream.

use std::path::Path;

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{HarvestError, Result};
use crate::event::FileEvent;

/// Events produced by a notifier, or the error that ended it.
pub type EventStream = mpsc::UnboundedReceiver<Result<FileEvent>>;

/// A per-path subscription handle onto a change-notification facility.
pub trait ChangeNotifier: Send {
    /// Start delivering events for `path`. Directories are not watched
    /// recursively; subdirectories must be subscribed one by one.
    fn subscribe(&mut self, path: &Path) -> Result<()>;

    /// Stop delivering events for `path`.
    fn unsubscribe(&mut self, path: &Path) -> Result<()>;
}

/// Creates independent notifiers.
pub trait NotifierFactory: Send + Sync {
    /// Create a notifier and the stream its events arrive on.
    fn create(&self) -> Result<(Box<dyn ChangeNotifier>, EventStream)>;
}

/// Notifier factory backed by the platform's native watcher.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyFactory;

impl NotifierFactory for NotifyFactory {
    fn create(&self) -> Result<(Box<dyn ChangeNotifier>, EventStream)> {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let watcher = notify::recommended_watcher(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if event.need_rescan() {
                        let path = event
                            .paths
                            .first()
                            .map(|p| p.display().to_string())
                            .unwrap_or_default();
                        let _ = event_tx.send(Err(HarvestError::Overflow(path)));
                        return;
                    }

                    for file_event in FileEvent::from_notify(event) {
                        if event_tx.send(Ok(file_event)).is_err() {
                            // Receiver dropped; the owner is shutting down.
                            return;
                        }
                    }
                }
                Err(e) => {
                    let _ = event_tx.send(Err(e.into()));
                }
            },
        )?;

        Ok((Box::new(NotifyNotifier { watcher }), event_rx))
    }
}

struct NotifyNotifier {
    watcher: RecommendedWatcher,
}

impl ChangeNotifier for NotifyNotifier {
    fn subscribe(&mut self, path: &Path) -> Result<()> {
        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!(path = %path.display(), "subscribed");
        Ok(())
    }

    fn unsubscribe(&mut self, path: &Path) -> Result<()> {
        self.watcher.unwatch(path)?;
        debug!(path = %path.display(), "unsubscribed");
        Ok(())
    }
}

/// In-memory notifier for driving harvesters and the monitor from tests.
#[cfg(test)]
pub(crate) mod fake {
    use std::collections::HashSet;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::{ChangeNotifier, EventStream, NotifierFactory};
    use crate::error::{HarvestError, Result};
    use crate::event::FileEvent;

    type Subscriptions = Arc<Mutex<HashSet<PathBuf>>>;

    struct Registered {
        subscriptions: Subscriptions,
        event_tx: mpsc::UnboundedSender<Result<FileEvent>>,
    }

    impl Registered {
        fn watches(&self, path: &Path) -> bool {
            if self.event_tx.is_closed() {
                return false;
            }
            let subscriptions = self.subscriptions.lock().unwrap();
            subscriptions.contains(path) || path.parent().is_some_and(|p| subscriptions.contains(p))
        }
    }

    /// Routes emitted events to every live notifier subscribed to the path
    /// or to its parent directory.
    #[derive(Clone, Default)]
    pub(crate) struct FakeFactory {
        notifiers: Arc<Mutex<Vec<Registered>>>,
    }

    impl FakeFactory {
        pub(crate) fn emit(&self, event: FileEvent) {
            for notifier in self.notifiers.lock().unwrap().iter() {
                if notifier.watches(&event.path) {
                    let _ = notifier.event_tx.send(Ok(event.clone()));
                }
            }
        }

        /// Deliver an error to the first live notifier watching `path`.
        pub(crate) fn fail(&self, path: &Path, error: HarvestError) {
            let notifiers = self.notifiers.lock().unwrap();
            if let Some(notifier) = notifiers.iter().find(|n| n.watches(path)) {
                let _ = notifier.event_tx.send(Err(error));
            }
        }

        pub(crate) fn is_subscribed(&self, path: &Path) -> bool {
            self.notifiers.lock().unwrap().iter().any(|n| {
                !n.event_tx.is_closed() && n.subscriptions.lock().unwrap().contains(path)
            })
        }

        pub(crate) async fn wait_for_subscription(&self, path: &Path) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while !self.is_subscribed(path) {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
        }

        /// Subscriptions held by notifiers whose owner is still running.
        pub(crate) fn active_subscriptions(&self) -> usize {
            self.notifiers
                .lock()
                .unwrap()
                .iter()
                .filter(|n| !n.event_tx.is_closed())
                .map(|n| n.subscriptions.lock().unwrap().len())
                .sum()
        }
    }

    impl NotifierFactory for FakeFactory {
        fn create(&self) -> Result<(Box<dyn ChangeNotifier>, EventStream)> {
            let (event_tx, event_rx) = mpsc::unbounded_channel();
            let subscriptions = Subscriptions::default();
            self.notifiers.lock().unwrap().push(Registered {
                subscriptions: subscriptions.clone(),
                event_tx,
            });
            Ok((Box::new(FakeNotifier { subscriptions }), event_rx))
        }
    }

    struct FakeNotifier {
        subscriptions: Subscriptions,
    }

    impl ChangeNotifier for FakeNotifier {
        fn subscribe(&mut self, path: &Path) -> Result<()> {
            self.subscriptions.lock().unwrap().insert(path.to_path_buf());
            Ok(())
        }

        fn unsubscribe(&mut self, path: &Path) -> Result<()> {
            if self.subscriptions.lock().unwrap().remove(path) {
                Ok(())
            } else {
                Err(HarvestError::Config(format!("not subscribed: {}", path.display())))
            }
        }
    }
}
