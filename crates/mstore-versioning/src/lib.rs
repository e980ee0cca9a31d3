//! ---
//! ems_section: "14-versioning-licensing-system"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Store version labels and the persisted version record."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Version bookkeeping for the metadata store: the version record, the
//! release descriptor, and the symlinks that select the active version.

pub mod build_info;
pub mod layout;
pub mod registry;
pub mod version;

pub use build_info::BuildInfo;
pub use layout::SymlinkSwitcher;
pub use registry::{read_release, VersionRegistry};
pub use version::{StorageBackend, Version, VersionLabels, VersionRecord};
