//! ---
//! ems_section: "14-versioning-licensing-system"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Version-scoped binary and data directory symlinks."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Filesystem layout of the store:
//!
//! ```text
//! <store_base>/            legacy data lives directly here (<store_base>/member)
//! <store_base>/<version>/  one directory per tracked version
//! <store_base>/latest  ->  the active one of the above
//! <bin_dir>/etcd       ->  <bin_dir>/etcd-<version>
//! <bin_dir>/etcdctl    ->  <bin_dir>/etcdctl-<version>
//! ```

use std::fs::{self, DirBuilder};
use std::io;
use std::os::unix::fs::{symlink, DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use mstore_common::{IoResultExt, PathsConfig, Result};
use nix::unistd::{chown, Gid, Uid};
use tracing::{debug, info};

use crate::version::{Version, VersionLabels};

/// Repoints binary and data symlinks at version-scoped paths.
#[derive(Debug, Clone)]
pub struct SymlinkSwitcher {
    store_base: PathBuf,
    latest_link: String,
    data_subdir: String,
    bin_dir: PathBuf,
    binaries: Vec<String>,
    labels: VersionLabels,
}

impl SymlinkSwitcher {
    pub fn new(paths: &PathsConfig, labels: VersionLabels) -> Self {
        Self {
            store_base: paths.store_base.clone(),
            latest_link: paths.latest_link.clone(),
            data_subdir: paths.data_subdir.clone(),
            bin_dir: paths.bin_dir.clone(),
            binaries: vec![paths.executable.clone(), paths.client.clone()],
            labels,
        }
    }

    /// Entries of the store base that are not version directories: the data
    /// subdirectory of a legacy install, the `latest` link, and any configured
    /// file or directory placed directly in the base.
    pub fn reserved_names(paths: &PathsConfig) -> Vec<String> {
        let mut names = vec![paths.data_subdir.clone(), paths.latest_link.clone()];
        let siblings = [
            &paths.version_file,
            &paths.proxy_dir,
            &paths.release_file,
            &paths.environment_file,
        ];
        for path in siblings {
            if path.parent() == Some(paths.store_base.as_path()) {
                if let Some(name) = path.file_name().and_then(|name| name.to_str()) {
                    names.push(name.to_owned());
                }
            }
        }
        names
    }

    /// Directory holding the data generation of `version`.
    pub fn resolve_path(&self, version: &Version) -> PathBuf {
        match version {
            Version::Legacy => self.store_base.clone(),
            Version::Release(label) => self.store_base.join(label),
        }
    }

    /// The store's own data directory inside the generation of `version`.
    pub fn data_dir(&self, version: &Version) -> PathBuf {
        self.resolve_path(version).join(&self.data_subdir)
    }

    pub fn latest_path(&self) -> PathBuf {
        self.store_base.join(&self.latest_link)
    }

    /// Point every store binary at its `-<version>` suffixed build.
    pub fn switch_binaries(&self, version: &Version) -> Result<()> {
        let label = self.labels.label(version);
        for name in &self.binaries {
            let link = self.bin_dir.join(name);
            let target = self.bin_dir.join(format!("{name}-{label}"));
            replace_symlink(&target, &link)?;
            debug!(link = %link.display(), target = %target.display(), "binary symlink updated");
        }
        Ok(())
    }

    /// Point the `latest` data symlink at the generation of `version`.
    pub fn switch_data(&self, version: &Version) -> Result<()> {
        let dest = self.resolve_path(version);
        self.ensure_generation_dir(&dest)?;
        let latest = self.latest_path();
        replace_symlink(&dest, &latest)?;
        info!(link = %latest.display(), target = %dest.display(), "data symlink updated");
        Ok(())
    }

    /// Remove the data written by `version`.
    ///
    /// A tracked version owns its whole directory. The legacy generation shares
    /// the base directory with every other version, so only its data
    /// subdirectory is removed.
    pub fn purge(&self, version: &Version) -> Result<()> {
        let target = match version {
            Version::Legacy => self.data_dir(version),
            Version::Release(_) => self.resolve_path(version),
        };
        match fs::remove_dir_all(&target) {
            Ok(()) => {
                info!(path = %target.display(), version = %version, "purged data directory");
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).or_system(|| format!("removing {}", target.display())),
        }
    }

    /// Purge `version` and leave an empty, correctly owned directory behind.
    pub fn reset(&self, version: &Version) -> Result<()> {
        self.purge(version)?;
        self.ensure_generation_dir(&self.resolve_path(version))
    }

    /// Whether an untracked install left data in the base directory.
    pub fn has_legacy_data(&self) -> bool {
        self.data_dir(&Version::Legacy).exists()
    }

    fn ensure_generation_dir(&self, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Ok(());
        }
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(dest)
            .or_system(|| format!("creating {}", dest.display()))?;

        let owner = fs::metadata(&self.store_base)
            .or_system(|| format!("reading owner of {}", self.store_base.display()))?;
        chown(
            dest,
            Some(Uid::from_raw(owner.uid())),
            Some(Gid::from_raw(owner.gid())),
        )
        .map_err(io::Error::from)
        .or_system(|| format!("changing owner of {}", dest.display()))?;
        debug!(path = %dest.display(), uid = owner.uid(), gid = owner.gid(), "created data directory");
        Ok(())
    }
}

fn replace_symlink(target: &Path, link: &Path) -> Result<()> {
    match fs::remove_file(link) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err).or_system(|| format!("removing existing link {}", link.display()))
        }
    }
    if let Some(parent) = link.parent() {
        fs::create_dir_all(parent)
            .or_system(|| format!("creating directory {}", parent.display()))?;
    }
    symlink(target, link).or_system(|| {
        format!(
            "unable to update symlink {} -> {}",
            link.display(),
            target.display()
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn switcher(root: &Path) -> SymlinkSwitcher {
        let paths = PathsConfig::default().rooted_at(root);
        fs::create_dir_all(&paths.store_base).unwrap();
        SymlinkSwitcher::new(&paths, VersionLabels::new("2.3.8"))
    }

    #[test]
    fn reserved_names_cover_base_entries() {
        let dir = tempdir().unwrap();
        let paths = PathsConfig::default().rooted_at(dir.path());
        let reserved = SymlinkSwitcher::reserved_names(&paths);
        for name in ["member", "latest", "etcd-version.txt", "proxy"] {
            assert!(reserved.iter().any(|entry| entry == name), "{name} missing");
        }
        assert!(!reserved.iter().any(|entry| entry == "container-environment"));
    }

    #[test]
    fn legacy_resolves_to_base_directory() {
        let dir = tempdir().unwrap();
        let switcher = switcher(dir.path());
        let base = dir.path().join("ext/etcd");
        assert_eq!(switcher.resolve_path(&Version::Legacy), base);
        assert_eq!(
            switcher.resolve_path(&Version::release("3.3.12")),
            base.join("3.3.12")
        );
    }

    #[test]
    fn binaries_point_at_version_suffix() {
        let dir = tempdir().unwrap();
        let switcher = switcher(dir.path());
        let bin = dir.path().join("usr/bin");

        switcher.switch_binaries(&Version::release("3.3.9")).unwrap();
        switcher.switch_binaries(&Version::Legacy).unwrap();

        assert_eq!(fs::read_link(bin.join("etcd")).unwrap(), bin.join("etcd-2.3.8"));
        assert_eq!(
            fs::read_link(bin.join("etcdctl")).unwrap(),
            bin.join("etcdctl-2.3.8")
        );
    }

    #[test]
    fn data_switch_creates_missing_generation() {
        let dir = tempdir().unwrap();
        let switcher = switcher(dir.path());
        let version = Version::release("3.3.12");

        switcher.switch_data(&version).unwrap();
        switcher.switch_data(&version).unwrap();

        let dest = switcher.resolve_path(&version);
        assert!(dest.is_dir());
        assert_eq!(fs::read_link(switcher.latest_path()).unwrap(), dest);
        let mode = fs::metadata(&dest).unwrap().mode() & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn purge_of_legacy_keeps_other_generations() {
        let dir = tempdir().unwrap();
        let switcher = switcher(dir.path());
        let modern = Version::release("3.3.9");
        fs::create_dir_all(switcher.data_dir(&Version::Legacy)).unwrap();
        fs::create_dir_all(switcher.data_dir(&modern)).unwrap();
        assert!(switcher.has_legacy_data());

        switcher.purge(&Version::Legacy).unwrap();
        switcher.purge(&Version::Legacy).unwrap();

        assert!(!switcher.has_legacy_data());
        assert!(switcher.data_dir(&modern).exists());
    }

    #[test]
    fn reset_leaves_empty_directory() {
        let dir = tempdir().unwrap();
        let switcher = switcher(dir.path());
        let version = Version::release("3.3.12");
        fs::create_dir_all(switcher.data_dir(&version)).unwrap();
        fs::write(switcher.data_dir(&version).join("wal"), b"partial").unwrap();

        switcher.reset(&version).unwrap();

        let dest = switcher.resolve_path(&version);
        assert!(dest.is_dir());
        assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
    }
}
