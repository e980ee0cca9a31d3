//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mstore_common::{LifecycleError, Result};
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::LifecycleMetrics;

/// Read access to the OS process table.
pub trait ProcessTable: Send + Sync {
    /// Executable names of every running process.
    fn executables(&self) -> Result<Vec<String>>;
}

/// Longest name the kernel keeps in a process's `comm`.
const COMM_LEN: usize = 15;

/// [`ProcessTable`] backed by `/proc`.
///
/// Names come from `comm`, which the kernel truncates. A name that may have
/// been cut short is replaced by the basename of the first command line
/// argument when that extends it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcfsTable;

impl ProcessTable for ProcfsTable {
    fn executables(&self) -> Result<Vec<String>> {
        let processes = procfs::process::all_processes().map_err(|err| LifecycleError::System {
            context: "listing processes".into(),
            source: io::Error::new(io::ErrorKind::Other, err.to_string()),
        })?;
        // Processes exiting mid-scan fail to stat and are simply gone.
        Ok(processes
            .filter_map(|process| process.ok())
            .filter_map(|process| {
                let comm = process.stat().ok()?.comm;
                let argv0 = if comm.len() < COMM_LEN {
                    None
                } else {
                    process.cmdline().ok().and_then(|args| args.into_iter().next())
                };
                Some(untruncated_name(comm, argv0.as_deref()))
            })
            .collect())
    }
}

fn untruncated_name(comm: String, argv0: Option<&str>) -> String {
    if comm.len() < COMM_LEN {
        return comm;
    }
    let full = argv0
        .and_then(|arg| Path::new(arg).file_name())
        .and_then(|name| name.to_str())
        .filter(|name| name.len() > comm.len() && name.starts_with(comm.as_str()))
        .map(str::to_owned);
    full.unwrap_or(comm)
}

/// Polls the process table until an executable is gone.
#[derive(Clone)]
pub struct ProcessWatcher {
    table: Arc<dyn ProcessTable>,
    interval: Duration,
    metrics: Option<LifecycleMetrics>,
}

impl ProcessWatcher {
    pub fn new(table: Arc<dyn ProcessTable>, interval: Duration) -> Self {
        Self {
            table,
            interval,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: LifecycleMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Block until no process named `executable` remains.
    ///
    /// A unit reported as stopped may still be flushing to disk, so callers that
    /// go on to touch the data directory wait here first. Fails with
    /// [`LifecycleError::Timeout`] once `timeout` elapses and with
    /// [`LifecycleError::Cancelled`] when `cancel` fires; both are observed no
    /// later than the next tick.
    pub async fn wait_for_stopped(
        &self,
        executable: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LifecycleError::Cancelled {
                        what: format!("{executable} to exit"),
                    });
                }
                _ = &mut deadline => {
                    return Err(LifecycleError::Timeout {
                        what: format!("{executable} to exit"),
                        after: timeout,
                    });
                }
                _ = tick.tick() => {}
            }

            let running = self
                .table
                .executables()?
                .iter()
                .filter(|name| name.as_str() == executable)
                .count();
            if running == 0 {
                let waited = started.elapsed();
                if let Some(metrics) = &self.metrics {
                    metrics.observe_process_wait(waited);
                }
                info!(executable, waited_ms = waited.as_millis() as u64, "process stopped");
                return Ok(());
            }
            debug!(executable, running, "process still running");
        }
    }
}
