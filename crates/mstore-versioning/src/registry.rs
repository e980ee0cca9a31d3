//! ---
//! ems_section: "14-versioning-licensing-system"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Store version labels and the persisted version record."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};

use mstore_common::{IoResultExt, LifecycleError, Result};
use tracing::debug;

use crate::version::{Version, VersionLabels, VersionRecord};

pub const KEY_VERSION: &str = "ETCD_VERSION";
pub const KEY_PREV_VERSION: &str = "ETCD_PREV_VERSION";
pub const KEY_STORAGE_BACKEND: &str = "ETCD_STORAGE_BACKEND";

/// Reads and writes the version record file.
#[derive(Debug, Clone)]
pub struct VersionRegistry {
    path: PathBuf,
    labels: VersionLabels,
}

impl VersionRegistry {
    pub fn new(path: impl Into<PathBuf>, labels: VersionLabels) -> Self {
        Self {
            path: path.into(),
            labels,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn labels(&self) -> &VersionLabels {
        &self.labels
    }

    /// Read the record. Fails with not found when the file is absent and with
    /// bad parameter when the current version key is missing or empty, or a
    /// label is not usable as a version directory.
    pub fn read(&self) -> Result<VersionRecord> {
        let (current, backup) = read_labels(&self.path)?;
        let current = current.ok_or_else(|| {
            LifecycleError::bad_parameter(format!(
                "unable to parse {KEY_VERSION} from {}",
                self.path.display()
            ))
        })?;
        Ok(VersionRecord {
            current: self.labels.parse(&current)?,
            backup: backup
                .map(|label| self.labels.parse(&label))
                .transpose()?,
        })
    }

    /// Replace the record with `current` and an optional `backup`.
    pub fn write(&self, current: &Version, backup: Option<&Version>) -> Result<VersionRecord> {
        let record = VersionRecord::new(current.clone(), backup.cloned());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .or_system(|| format!("creating directory {}", parent.display()))?;
        }
        fs::write(&self.path, self.render(&record))
            .or_system(|| format!("writing version record {}", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            current = %record.current,
            backup = ?record.backup.as_ref().map(ToString::to_string),
            "version record written"
        );
        Ok(record)
    }

    fn render(&self, record: &VersionRecord) -> String {
        let mut out = format!("{KEY_VERSION}={}\n", self.labels.label(&record.current));
        if let Some(backup) = &record.backup {
            out.push_str(&format!(
                "{KEY_PREV_VERSION}={}\n",
                self.labels.label(backup)
            ));
        }
        out.push_str(&format!(
            "{KEY_STORAGE_BACKEND}={}\n",
            record.storage_backend().tag()
        ));
        out
    }
}

/// Read the desired version from a release descriptor.
pub fn read_release(path: impl AsRef<Path>, labels: &VersionLabels) -> Result<Version> {
    let path = path.as_ref();
    let (desired, _) = read_labels(path)?;
    let desired = desired.ok_or_else(|| {
        LifecycleError::bad_parameter(format!(
            "unable to parse {KEY_VERSION} from release descriptor {}",
            path.display()
        ))
    })?;
    labels.parse(&desired)
}

fn read_labels(path: &Path) -> Result<(Option<String>, Option<String>)> {
    let raw = fs::read_to_string(path).or_system(|| format!("reading {}", path.display()))?;
    Ok(parse_labels(&raw))
}

fn parse_labels(raw: &str) -> (Option<String>, Option<String>) {
    let mut current = None;
    let mut previous = None;
    for line in raw.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match key.trim() {
            KEY_VERSION => current = Some(value.to_owned()),
            KEY_PREV_VERSION => previous = Some(value.to_owned()),
            _ => {}
        }
    }
    (current, previous)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn registry(dir: &Path) -> VersionRegistry {
        VersionRegistry::new(dir.join("ext/etcd/etcd-version.txt"), VersionLabels::new("2.3.8"))
    }

    #[test]
    fn current_only_record_has_no_backup() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(registry.path(), "ETCD_VERSION=3.3.9\n").unwrap();

        let record = registry.read().unwrap();
        assert_eq!(record.current, Version::release("3.3.9"));
        assert_eq!(record.backup, None);
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        let written = registry
            .write(&Version::release("3.3.12"), Some(&Version::release("3.3.9")))
            .unwrap();
        assert_eq!(registry.read().unwrap(), written);

        let raw = fs::read_to_string(registry.path()).unwrap();
        assert_eq!(
            raw,
            "ETCD_VERSION=3.3.12\nETCD_PREV_VERSION=3.3.9\nETCD_STORAGE_BACKEND=etcd3\n"
        );
    }

    #[test]
    fn legacy_current_writes_legacy_backend() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry.write(&Version::Legacy, None).unwrap();
        let raw = fs::read_to_string(registry.path()).unwrap();
        assert_eq!(raw, "ETCD_VERSION=2.3.8\nETCD_STORAGE_BACKEND=etcd2\n");
        assert_eq!(registry.read().unwrap().current, Version::Legacy);
    }

    #[test]
    fn repeated_writes_are_identical() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        registry.write(&Version::release("3.3.12"), None).unwrap();
        let first = fs::read(registry.path()).unwrap();
        registry.write(&Version::release("3.3.12"), None).unwrap();
        assert_eq!(fs::read(registry.path()).unwrap(), first);
    }

    #[test]
    fn missing_record_is_not_found() {
        let dir = tempdir().unwrap();
        let err = registry(dir.path()).read().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn record_without_current_is_bad_parameter() {
        let dir = tempdir().unwrap();
        let registry = registry(dir.path());
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(registry.path(), "ETCD_PREV_VERSION=3.3.9\nETCD_VERSION=\n").unwrap();
        assert_matches!(registry.read(), Err(LifecycleError::BadParameter(_)));
    }

    #[test]
    fn release_descriptor_ignores_unrelated_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("release");
        fs::write(&path, "KUBE_VERSION=1.13.5\nETCD_VERSION=3.3.12\n").unwrap();
        let desired = read_release(&path, &VersionLabels::new("2.3.8")).unwrap();
        assert_eq!(desired, Version::release("3.3.12"));
    }

    #[test]
    fn traversing_labels_are_rejected_on_read() {
        let dir = tempdir().unwrap();
        let registry = VersionRegistry::new(
            dir.path().join("ext/etcd/etcd-version.txt"),
            VersionLabels::new("2.3.8").reserving(["member", "latest"]),
        );
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();

        fs::write(registry.path(), "ETCD_VERSION=3.3.12\nETCD_PREV_VERSION=..\n").unwrap();
        assert_matches!(registry.read(), Err(LifecycleError::BadParameter(_)));

        fs::write(registry.path(), "ETCD_VERSION=latest\n").unwrap();
        assert_matches!(registry.read(), Err(LifecycleError::BadParameter(_)));

        let release = dir.path().join("release");
        fs::write(&release, "ETCD_VERSION=../..\n").unwrap();
        assert_matches!(
            read_release(&release, registry.labels()),
            Err(LifecycleError::BadParameter(_))
        );
    }
}
