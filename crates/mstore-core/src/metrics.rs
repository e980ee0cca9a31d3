//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mstore_common::{IoResultExt, LifecycleError, Result};
use mstore_logging::LifecycleOutcome;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

/// Metrics published by the lifecycle flows.
#[derive(Clone)]
pub struct LifecycleMetrics {
    operations: IntCounterVec,
    process_wait: Histogram,
    registry: Arc<Registry>,
}

impl LifecycleMetrics {
    /// Register all lifecycle metrics with the provided registry.
    pub fn new(registry: Arc<Registry>) -> Result<Self> {
        let operations = IntCounterVec::new(
            Opts::new(
                "mstore_lifecycle_operations_total",
                "Lifecycle operations executed on this node by outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(operations.clone()))
            .map_err(metrics_error)?;

        let buckets = prometheus::exponential_buckets(0.05, 2.0, 12).map_err(metrics_error)?;
        let process_wait = Histogram::with_opts(
            HistogramOpts::new(
                "mstore_process_wait_seconds",
                "Time spent waiting for a stopped unit's process to exit",
            )
            .buckets(buckets),
        )
        .map_err(metrics_error)?;
        registry
            .register(Box::new(process_wait.clone()))
            .map_err(metrics_error)?;

        Ok(Self {
            operations,
            process_wait,
            registry,
        })
    }

    /// Metrics bound to a fresh private registry.
    pub fn standalone() -> Result<Self> {
        Self::new(Arc::new(Registry::new()))
    }

    pub fn record_operation(&self, operation: &str, outcome: LifecycleOutcome) {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .inc();
    }

    pub fn operation_count(&self, operation: &str, outcome: LifecycleOutcome) -> u64 {
        self.operations
            .with_label_values(&[operation, outcome.as_str()])
            .get()
    }

    pub fn observe_process_wait(&self, waited: Duration) {
        self.process_wait.observe(waited.as_secs_f64());
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(metrics_error)
    }

    /// Write the registry for a node-exporter textfile collector.
    ///
    /// The file is replaced by rename so the collector never reads a partial write.
    pub fn write_textfile(&self, path: &Path) -> Result<()> {
        let rendered = self.render()?;
        let staging = path.with_extension("prom.tmp");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .or_system(|| format!("creating directory {}", parent.display()))?;
        }
        fs::write(&staging, rendered).or_system(|| format!("writing {}", staging.display()))?;
        fs::rename(&staging, path).or_system(|| format!("renaming to {}", path.display()))
    }
}

fn metrics_error(err: impl std::error::Error + Send + Sync + 'static) -> LifecycleError {
    LifecycleError::System {
        context: "metrics".into(),
        source: io::Error::new(io::ErrorKind::Other, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn operations_are_counted_per_outcome() {
        let metrics = LifecycleMetrics::standalone().unwrap();
        metrics.record_operation("upgrade", LifecycleOutcome::Success);
        metrics.record_operation("upgrade", LifecycleOutcome::Success);
        metrics.record_operation("upgrade", LifecycleOutcome::Fault);
        assert_eq!(metrics.operation_count("upgrade", LifecycleOutcome::Success), 2);
        assert_eq!(metrics.operation_count("upgrade", LifecycleOutcome::Fault), 1);
    }

    #[test]
    fn textfile_contains_counters() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("textfile/mstore.prom");
        let metrics = LifecycleMetrics::standalone().unwrap();
        metrics.record_operation("promote", LifecycleOutcome::Skipped);
        metrics.observe_process_wait(Duration::from_millis(300));
        metrics.write_textfile(&path).unwrap();

        let body = fs::read_to_string(&path).unwrap();
        assert!(body.contains(
            "mstore_lifecycle_operations_total{operation=\"promote\",outcome=\"skipped\"} 1"
        ));
        assert!(body.contains("mstore_process_wait_seconds_count 1"));
    }
}
