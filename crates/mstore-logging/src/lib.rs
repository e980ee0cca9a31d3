//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Structured lifecycle logging adapters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Structured logging helpers shared by the lifecycle flows.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for development and tests.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer().with_test_writer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Member name of this node, when known.
    pub node: Option<&'a str>,
    /// Service unit the event concerns.
    pub service: Option<&'a str>,
    /// Store version the event concerns.
    pub version: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a node name.
    pub fn with_node(mut self, node: &'a str) -> Self {
        self.node = Some(node);
        self
    }

    /// Attach a service unit name.
    pub fn with_service(mut self, service: &'a str) -> Self {
        self.service = Some(service);
        self
    }

    /// Attach a store version.
    pub fn with_version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }
}

/// Outcome recorded for each top-level lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// The operation completed and changed node state as requested.
    Success,
    /// The operation had nothing to do (proxy mode, already converged).
    Skipped,
    /// The operation failed.
    Fault,
}

impl LifecycleOutcome {
    /// Label used in log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleOutcome::Success => "success",
            LifecycleOutcome::Skipped => "skipped",
            LifecycleOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event.
pub fn log_lifecycle_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: LifecycleOutcome,
) {
    let default = LogContext::default();
    let ctx = context.unwrap_or(&default);
    match outcome {
        LifecycleOutcome::Success | LifecycleOutcome::Skipped => tracing::info!(
            event = event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            message = %message
        ),
        LifecycleOutcome::Fault => tracing::error!(
            event = event,
            outcome = outcome.as_str(),
            node = ctx.node.unwrap_or(""),
            service = ctx.service.unwrap_or(""),
            version = ctx.version.unwrap_or(""),
            message = %message
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macros_emit_without_panic() {
        init();
        let ctx = LogContext::new()
            .with_service("etcd.service")
            .with_version("3.3.12");
        mstore_info!(context = ctx.clone(), "unit masked");
        mstore_warn!("restart of {} failed", "kube-apiserver.service");
        mstore_error!(context = ctx, "exit code: {}", 1);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(LifecycleOutcome::Success.as_str(), "success");
        assert_eq!(LifecycleOutcome::Skipped.as_str(), "skipped");
        assert_eq!(LifecycleOutcome::Fault.as_str(), "fault");
    }

    #[test]
    fn lifecycle_event_helper_emits() {
        init();
        let ctx = LogContext::new().with_node("node-1");
        log_lifecycle_event(
            Some(&ctx),
            "lifecycle.promote",
            "proxy promoted to voting member",
            LifecycleOutcome::Success,
        );
        log_lifecycle_event(
            None,
            "lifecycle.upgrade",
            "etcd.service still active",
            LifecycleOutcome::Fault,
        );
    }
}
