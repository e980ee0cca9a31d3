//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the metadata store lifecycle manager."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result alias used throughout the lifecycle crates.
pub type Result<T> = std::result::Result<T, LifecycleError>;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A file or record is missing; the caller may substitute a default.
    NotFound,
    /// Malformed input or a violated precondition. Never retried.
    BadParameter,
    /// Operating system, external command or collaborator failure.
    SystemError,
}

/// Error type for every lifecycle operation.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A required file or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Malformed record or violated precondition.
    #[error("bad parameter: {0}")]
    BadParameter(String),
    /// OS-level failure wrapped with the operation that hit it.
    #[error("{context}: {source}")]
    System {
        /// What was being attempted.
        context: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// An external command exited unsuccessfully.
    #[error("command `{command}` failed: {output}")]
    Command {
        /// Rendered command line.
        command: String,
        /// Combined stdout and stderr of the command.
        output: String,
    },
    /// A deadline elapsed before the awaited condition held.
    #[error("timed out after {after:?} waiting for {what}")]
    Timeout {
        /// Description of the awaited condition.
        what: String,
        /// Deadline that elapsed.
        after: Duration,
    },
    /// The caller cancelled the operation.
    #[error("cancelled while waiting for {what}")]
    Cancelled {
        /// Description of the awaited condition.
        what: String,
    },
    /// The external backup engine rejected or failed a job.
    #[error("backup engine error: {0}")]
    Engine(String),
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl LifecycleError {
    /// Build a [`LifecycleError::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Build a [`LifecycleError::BadParameter`].
    pub fn bad_parameter(message: impl Into<String>) -> Self {
        Self::BadParameter(message.into())
    }

    /// Wrap an IO error, mapping a missing path to [`LifecycleError::NotFound`].
    pub fn system(context: impl Into<String>, source: io::Error) -> Self {
        let context = context.into();
        if source.kind() == io::ErrorKind::NotFound {
            return Self::NotFound(format!("{context}: {source}"));
        }
        Self::System { context, source }
    }

    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadParameter(_) | Self::Config(_) => ErrorKind::BadParameter,
            Self::System { .. }
            | Self::Command { .. }
            | Self::Timeout { .. }
            | Self::Cancelled { .. }
            | Self::Engine(_) => ErrorKind::SystemError,
        }
    }

    /// Whether the error denotes a missing file or record.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Extension for attaching context to raw IO results.
pub trait IoResultExt<T> {
    /// Convert the IO error with [`LifecycleError::system`].
    fn or_system(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn or_system(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|err| LifecycleError::system(context(), err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_path_maps_to_not_found() {
        let err = LifecycleError::system(
            "reading /nope",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());
    }

    #[test]
    fn permission_errors_stay_system_errors() {
        let err = LifecycleError::system(
            "writing record",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.kind(), ErrorKind::SystemError);
        assert_eq!(err.to_string(), "writing record: denied");
    }

    #[test]
    fn command_failure_carries_output() {
        let err = LifecycleError::Command {
            command: "systemctl stop etcd".into(),
            output: "Unit etcd.service not loaded.".into(),
        };
        assert!(err.to_string().contains("not loaded"));
        assert_eq!(err.kind(), ErrorKind::SystemError);
    }
}
