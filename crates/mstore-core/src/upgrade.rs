//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Version transitions of the local store.
//!
//! Every step is guarded by an equality or existence check so a run
//! interrupted at any point converges when repeated.
use std::fmt;
use std::path::PathBuf;

use mstore_common::{LifecycleError, NodeEnvironment, Result};
use mstore_versioning::{read_release, SymlinkSwitcher, Version, VersionRecord, VersionRegistry};
use serde::Serialize;
use tracing::{info, warn};

use crate::services::{ServiceController, ServiceDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Transition {
    Upgrade,
    Rollback,
}

impl Transition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transition::Upgrade => "upgrade",
            Transition::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a transition did to the version record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// Proxies hold no local data; nothing was touched.
    ProxyMode,
    /// The record already matched the requested state.
    Unchanged(VersionRecord),
    /// The record was rewritten.
    Applied {
        previous: VersionRecord,
        record: VersionRecord,
    },
}

impl TransitionOutcome {
    /// Record in effect after the transition, if one exists.
    pub fn record(&self) -> Option<&VersionRecord> {
        match self {
            TransitionOutcome::ProxyMode => None,
            TransitionOutcome::Unchanged(record) => Some(record),
            TransitionOutcome::Applied { record, .. } => Some(record),
        }
    }
}

/// Units the transitions inspect or restart.
#[derive(Debug, Clone)]
pub struct TransitionUnits {
    pub primary: ServiceDescriptor,
    pub shadow: ServiceDescriptor,
    pub consumer: ServiceDescriptor,
}

/// Moves the version record between releases.
#[derive(Clone)]
pub struct UpgradeStateMachine {
    registry: VersionRegistry,
    switcher: SymlinkSwitcher,
    services: ServiceController,
    units: TransitionUnits,
    release_file: PathBuf,
    environment_file: PathBuf,
}

impl UpgradeStateMachine {
    pub fn new(
        registry: VersionRegistry,
        switcher: SymlinkSwitcher,
        services: ServiceController,
        units: TransitionUnits,
        release_file: PathBuf,
        environment_file: PathBuf,
    ) -> Self {
        Self {
            registry,
            switcher,
            services,
            units,
            release_file,
            environment_file,
        }
    }

    pub async fn run(&self, transition: Transition) -> Result<TransitionOutcome> {
        if self.proxy_mode()? {
            info!(%transition, "proxy mode enabled, skipping");
            return Ok(TransitionOutcome::ProxyMode);
        }
        self.check_units_stopped(transition).await?;

        let outcome = match transition {
            Transition::Upgrade => self.upgrade()?,
            Transition::Rollback => self.rollback()?,
        };

        self.services.restart_if_running(&self.units.consumer).await;
        Ok(outcome)
    }

    /// Whether the node runs as a proxy. A node without an environment file
    /// is a member.
    pub fn proxy_mode(&self) -> Result<bool> {
        match NodeEnvironment::read(&self.environment_file) {
            Ok(environment) => Ok(environment.proxy_enabled()),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn check_units_stopped(&self, transition: Transition) -> Result<()> {
        for unit in [&self.units.primary, &self.units.shadow] {
            let state = match self.services.status(unit).await {
                Ok(state) => state,
                Err(err) => {
                    warn!(service = %unit, error = %err, "unable to get service status");
                    continue;
                }
            };
            info!(service = %unit, %state, "checked service status");
            if !state.is_quiescent() {
                return Err(LifecycleError::bad_parameter(format!(
                    "service {unit} is {state}; it must be inactive or failed before {transition}"
                )));
            }
        }
        Ok(())
    }

    fn current_record(&self) -> Result<VersionRecord> {
        match self.registry.read() {
            Ok(record) => Ok(record),
            Err(err) if err.is_not_found() => {
                info!("no version record, assuming legacy install");
                Ok(VersionRecord::new(Version::Legacy, None))
            }
            Err(err) => Err(err),
        }
    }

    fn upgrade(&self) -> Result<TransitionOutcome> {
        let desired = read_release(&self.release_file, self.registry.labels())?;
        let previous = self.current_record()?;

        let outcome = if previous.current == desired {
            info!(version = %desired, "version record already current");
            TransitionOutcome::Unchanged(previous)
        } else {
            let backup = previous.current.clone();
            let record = self.registry.write(&desired, Some(&backup))?;
            info!(current = %record.current, backup = %backup, "version record updated");
            if let Some(displaced) = previous.backup.as_ref().filter(|old| **old != backup) {
                self.switcher.purge(displaced)?;
            }
            TransitionOutcome::Applied { previous, record }
        };

        // A crashed restore can leave a half written generation behind.
        self.switcher.reset(&desired)?;
        Ok(outcome)
    }

    fn rollback(&self) -> Result<TransitionOutcome> {
        let previous = self.current_record()?;
        let Some(backup) = previous.backup.clone() else {
            info!(version = %previous.current, "no backup version, nothing to roll back");
            return Ok(TransitionOutcome::Unchanged(previous));
        };
        let record = self.registry.write(&backup, None)?;
        info!(current = %record.current, from = %previous.current, "rolled back version record");
        Ok(TransitionOutcome::Applied { previous, record })
    }
}
