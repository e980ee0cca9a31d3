//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the metadata store lifecycle manager."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the metadata store lifecycle workspace.
//! This crate exposes the error taxonomy, configuration loading, logging
//! initialisation and the node environment file consumed by every flow.

pub mod config;
pub mod environment;
pub mod error;
pub mod logging;

pub use config::{
    BackupConfig, EndpointsConfig, LifecycleConfig, LoggingConfig, MetricsConfig, PathsConfig,
    ServicesConfig, TimeoutsConfig, VersionsConfig,
};
pub use environment::NodeEnvironment;
pub use error::{ErrorKind, IoResultExt, LifecycleError, Result};
pub use logging::{init_tracing, LogFormat};
