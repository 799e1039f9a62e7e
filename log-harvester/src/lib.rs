//! # Log Harvester
//!
//! Watches a directory tree for log files, reads what gets appended to them
//! and hands complete lines to a consumer in batches.
//!
//! ## Features
//!
//! - **Resumable**: read offsets are persisted next to each file as
//!   `name.cursor`, so a restart continues where delivery stopped
//! - **Completion Marker**: a configured line ends a file's stream and can
//!   trigger deletion of the file and its cursor
//! - **Bounded Latency**: pending lines are flushed on a fixed interval
//! - **Stall Detection**: files that stop being written to are released
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Log Harvester                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  HarvestConfig ──► DirectoryMonitor ──► FileHarvester (per file)│
//! │                          │                   │         │        │
//! │                          ▼                   ▼         ▼        │
//! │                   NotifierFactory       cursor    FileContent   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Delivery is at-least-once: a crash between handing a batch to the output
//! queue and writing the cursor re-delivers that batch on restart.

pub mod config;
pub mod cursor;
pub mod error;
pub mod event;
pub mod harvester;
pub mod monitor;
pub mod notifier;
pub mod scan;

pub use config::{FilePattern, HarvestConfig};
pub use error::{HarvestError, Result};
pub use event::{FileContent, FileEvent, FileEventKind};
pub use harvester::{FileHarvester, HarvestOutcome};
pub use monitor::DirectoryMonitor;
pub use notifier::{ChangeNotifier, EventStream, NotifierFactory, NotifyFactory};
pub use scan::ScanReport;
