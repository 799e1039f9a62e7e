use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use codex_log_harvester::{DirectoryMonitor, FileContent, HarvestConfig, HarvestError};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Wait before restarting a watch that died on a notification error.
const RESTART_DELAY: Duration = Duration::from_secs(1);

/// How long cancelled harvests get to flush on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(
    name = "codex-log-harvester",
    about = "Harvest appended log lines from a directory tree"
)]
struct Args {
    /// TOML file with harvester settings. Flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory to watch.
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Regular expression a file's path must match.
    #[arg(long)]
    pattern: Option<String>,

    /// Line that marks a file as complete.
    #[arg(long)]
    marker: Option<String>,

    /// Delete completed files and their cursors.
    #[arg(long)]
    remove_after_complete: bool,

    /// Seconds without writes before a file is released.
    #[arg(long)]
    stall_timeout_secs: Option<u64>,

    /// Milliseconds between forced flushes.
    #[arg(long)]
    flush_interval_ms: Option<u64>,

    /// Lines per batch before a flush is forced.
    #[arg(long)]
    max_batch_lines: Option<usize>,

    /// Print one JSON object per batch instead of raw lines.
    #[arg(long)]
    json: bool,
}

impl Args {
    fn into_config(self) -> anyhow::Result<HarvestConfig> {
        let mut config = match &self.config {
            Some(path) => HarvestConfig::load(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => HarvestConfig::default(),
        };

        if let Some(dir) = self.dir {
            config = config.with_dir(dir);
        }
        if let Some(pattern) = self.pattern {
            config = config.with_pattern(&pattern)?;
        }
        if let Some(marker) = self.marker {
            config = config.with_complete_marker(marker);
        }
        if self.remove_after_complete {
            config = config.remove_after_complete(true);
        }
        if let Some(secs) = self.stall_timeout_secs {
            config = config.with_stall_timeout(Duration::from_secs(secs));
        }
        if let Some(ms) = self.flush_interval_ms {
            config = config.with_flush_interval(Duration::from_millis(ms));
        }
        if let Some(lines) = self.max_batch_lines {
            config = config.with_max_batch_lines(lines);
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let json = args.json;
    let config = args.into_config()?;

    let (monitor, records) = DirectoryMonitor::with_native_notifier(config)?;
    let monitor = Arc::new(monitor);
    let printer = tokio::spawn(print_records(records, json));

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = monitor.start() => match result {
                Ok(()) => break,
                Err(e @ (HarvestError::DirectoryNotFound(_) | HarvestError::Io(_))) => {
                    return Err(e).context("cannot watch directory");
                }
                Err(e) => {
                    warn!("Watch ended ({e}), restarting in {RESTART_DELAY:?}");
                    tokio::time::sleep(RESTART_DELAY).await;
                }
            },
            _ = &mut ctrl_c => {
                monitor.shutdown();
                break;
            }
        }
    }

    let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
        while !monitor.active_harvests().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!("Harvests still running after {SHUTDOWN_GRACE:?}, exiting anyway");
        return Ok(());
    }

    drop(monitor);
    printer.await?.context("failed to write records")?;
    info!("Shut down");
    Ok(())
}

async fn print_records(mut records: mpsc::Receiver<FileContent>, json: bool) -> anyhow::Result<()> {
    while let Some(record) = records.recv().await {
        let mut stdout = std::io::stdout().lock();
        if json {
            serde_json::to_writer(&mut stdout, &record)?;
            writeln!(stdout)?;
        } else {
            stdout.write_all(&record.content)?;
        }
        stdout.flush()?;
    }
    Ok(())
}
