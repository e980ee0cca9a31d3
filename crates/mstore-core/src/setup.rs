//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use mstore_common::Result;
use mstore_versioning::{read_release, SymlinkSwitcher, Version, VersionRegistry};
use tracing::info;

/// Points binaries and the data link at the recorded version.
#[derive(Debug, Clone)]
pub struct VersionSetup {
    registry: VersionRegistry,
    switcher: SymlinkSwitcher,
    release_file: PathBuf,
}

impl VersionSetup {
    pub fn new(registry: VersionRegistry, switcher: SymlinkSwitcher, release_file: PathBuf) -> Self {
        Self {
            registry,
            switcher,
            release_file,
        }
    }

    /// Version the release descriptor asks for.
    pub fn desired(&self) -> Result<Version> {
        read_release(&self.release_file, self.registry.labels())
    }

    /// Resolve the current version and switch the symlinks to it.
    ///
    /// A node without a record predates version tracking unless it also has
    /// no legacy data, in which case it is a fresh install of the desired
    /// version and the record is created.
    pub fn run(&self) -> Result<Version> {
        let desired = self.desired()?;
        let current = match self.registry.read() {
            Ok(record) => record.current,
            Err(err) if err.is_not_found() => {
                if self.switcher.has_legacy_data() {
                    info!("no version record, assuming legacy install");
                    Version::Legacy
                } else {
                    info!(version = %desired, "new install detected");
                    self.registry.write(&desired, None)?;
                    desired
                }
            }
            Err(err) => return Err(err),
        };

        self.switcher.switch_binaries(&current)?;
        self.switcher.switch_data(&current)?;
        info!(version = %current, "version symlinks in place");
        Ok(current)
    }
}
