//! ---
//! ems_section: "14-versioning-licensing-system"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Store version labels and the persisted version record."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Component, Path};

use mstore_common::{LifecycleError, Result};
use serde::Serialize;

/// An installed store version.
///
/// `Legacy` stands for an install that predates version tracking. It is kept
/// apart from [`Version::Release`] so a genuine label can never be mistaken for
/// it inside the flows; only the on-disk encoding goes through
/// [`VersionLabels`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Version {
    Legacy,
    Release(String),
}

impl Version {
    /// Construct a tracked release version.
    pub fn release(label: impl Into<String>) -> Self {
        Version::Release(label.into())
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, Version::Legacy)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Legacy => f.write_str("legacy"),
            Version::Release(label) => f.write_str(label),
        }
    }
}

/// Translates between [`Version`] values and the labels used on disk.
///
/// Legacy binaries ship suffixed with the last untracked release label, and
/// previously written records carry that label too.
///
/// A release label becomes a directory name under the store base, so it must
/// be a single plain path component and must not collide with a reserved
/// entry of that directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionLabels {
    legacy: String,
    reserved: Vec<String>,
}

impl VersionLabels {
    pub fn new(legacy: impl Into<String>) -> Self {
        Self {
            legacy: legacy.into(),
            reserved: Vec::new(),
        }
    }

    /// Names that already live next to the version directories.
    pub fn reserving<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
        self
    }

    /// Decode an on-disk label.
    pub fn parse(&self, raw: &str) -> Result<Version> {
        if raw == self.legacy {
            return Ok(Version::Legacy);
        }
        let mut components = Path::new(raw).components();
        let plain = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(name)), None) if name == raw
        );
        if !plain {
            return Err(LifecycleError::bad_parameter(format!(
                "version label {raw:?} is not a plain directory name"
            )));
        }
        if self.reserved.iter().any(|name| name == raw) {
            return Err(LifecycleError::bad_parameter(format!(
                "version label {raw:?} collides with a reserved store entry"
            )));
        }
        Ok(Version::Release(raw.to_owned()))
    }

    /// Encode a version for disk and for binary suffixes.
    pub fn label<'a>(&'a self, version: &'a Version) -> &'a str {
        match version {
            Version::Legacy => &self.legacy,
            Version::Release(label) => label,
        }
    }
}

/// Storage generation implied by the current version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorageBackend {
    Legacy,
    Modern,
}

impl StorageBackend {
    /// Tag written to the version record.
    pub fn tag(&self) -> &'static str {
        match self {
            StorageBackend::Legacy => "etcd2",
            StorageBackend::Modern => "etcd3",
        }
    }
}

/// Persisted `{current, backup}` pair.
///
/// The storage backend is derived from `current` rather than stored, so the
/// two can never disagree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionRecord {
    pub current: Version,
    pub backup: Option<Version>,
}

impl VersionRecord {
    pub fn new(current: Version, backup: Option<Version>) -> Self {
        Self { current, backup }
    }

    pub fn storage_backend(&self) -> StorageBackend {
        if self.current.is_legacy() {
            StorageBackend::Legacy
        } else {
            StorageBackend::Modern
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn legacy_label_round_trips_through_labels() {
        let labels = VersionLabels::new("2.3.8");
        assert_eq!(labels.parse("2.3.8").unwrap(), Version::Legacy);
        assert_eq!(labels.parse("3.3.9").unwrap(), Version::release("3.3.9"));
        assert_eq!(labels.label(&Version::Legacy), "2.3.8");
    }

    #[test]
    fn labels_escaping_the_store_base_are_rejected() {
        let labels = VersionLabels::new("2.3.8");
        for raw in ["..", ".", "/", "/var/lib", "3.3.9/..", "a/b", "./3.3.9"] {
            assert_matches!(
                labels.parse(raw),
                Err(LifecycleError::BadParameter(_)),
                "label {raw:?} accepted"
            );
        }
    }

    #[test]
    fn reserved_names_are_rejected() {
        let labels = VersionLabels::new("2.3.8").reserving(["member", "latest"]);
        assert_matches!(labels.parse("member"), Err(LifecycleError::BadParameter(_)));
        assert_matches!(labels.parse("latest"), Err(LifecycleError::BadParameter(_)));
        assert_eq!(labels.parse("3.3.12").unwrap(), Version::release("3.3.12"));
    }

    #[test]
    fn backend_follows_current_version() {
        let legacy = VersionRecord::new(Version::Legacy, Some(Version::release("3.3.9")));
        assert_eq!(legacy.storage_backend(), StorageBackend::Legacy);
        assert_eq!(legacy.storage_backend().tag(), "etcd2");

        let modern = VersionRecord::new(Version::release("3.3.9"), Some(Version::Legacy));
        assert_eq!(modern.storage_backend().tag(), "etcd3");
    }
}
