//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Shared primitives for the metadata store lifecycle manager."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;

use crate::error::{LifecycleError, Result};
use crate::logging::LogFormat;

fn default_release_file() -> PathBuf {
    PathBuf::from("/etc/mstore-release")
}

fn default_version_file() -> PathBuf {
    PathBuf::from("/ext/etcd/etcd-version.txt")
}

fn default_environment_file() -> PathBuf {
    PathBuf::from("/etc/container-environment")
}

fn default_store_base() -> PathBuf {
    PathBuf::from("/ext/etcd")
}

fn default_data_subdir() -> String {
    "member".to_owned()
}

fn default_latest_link() -> String {
    "latest".to_owned()
}

fn default_proxy_dir() -> PathBuf {
    PathBuf::from("/ext/etcd/proxy")
}

fn default_bin_dir() -> PathBuf {
    PathBuf::from("/usr/bin")
}

fn default_executable() -> String {
    "etcd".to_owned()
}

fn default_client() -> String {
    "etcdctl".to_owned()
}

fn default_primary_unit() -> String {
    "etcd.service".to_owned()
}

fn default_upgrade_unit() -> String {
    "etcd-upgrade.service".to_owned()
}

fn default_consumer_unit() -> String {
    "kube-apiserver.service".to_owned()
}

fn default_health_unit() -> String {
    "node-agent.service".to_owned()
}

fn default_systemctl() -> PathBuf {
    PathBuf::from("/bin/systemctl")
}

fn default_legacy_label() -> String {
    "2.3.8".to_owned()
}

fn default_production_endpoint() -> String {
    "https://127.0.0.1:2379".to_owned()
}

fn default_upgrade_endpoint() -> String {
    "https://127.0.0.2:2379".to_owned()
}

fn default_client_cert() -> PathBuf {
    PathBuf::from("/var/state/etcd.cert")
}

fn default_client_key() -> PathBuf {
    PathBuf::from("/var/state/etcd.key")
}

fn default_ca_cert() -> PathBuf {
    PathBuf::from("/var/state/root.cert")
}

fn default_engine() -> PathBuf {
    PathBuf::from("/usr/bin/etcd-backup")
}

fn default_include_prefix() -> String {
    "/".to_owned()
}

fn default_migrate_prefix() -> String {
    "/registry".to_owned()
}

fn default_operation_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

/// Primary configuration object for the lifecycle manager.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LifecycleConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub versions: VersionsConfig,
    #[serde(default)]
    pub endpoints: EndpointsConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LifecycleConfig {
    pub const ENV_CONFIG_PATH: &'static str = "MSTORE_CONFIG";

    /// Load configuration, respecting the `MSTORE_CONFIG` override.
    ///
    /// Falls back to built-in defaults when no candidate exists.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                return Self::from_path(Path::new(&env_path));
            }
        }
        for candidate in candidates {
            if candidate.as_ref().exists() {
                return Self::from_path(candidate.as_ref());
            }
        }
        debug!("no configuration file found, using defaults");
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path).map_err(|err| {
            LifecycleError::Config(format!("unable to read {}: {err}", path.display()))
        })?;
        contents.parse()
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        for (field, unit) in [
            ("services.primary", &self.services.primary),
            ("services.upgrade", &self.services.upgrade),
            ("services.consumer", &self.services.consumer),
            ("services.health", &self.services.health),
        ] {
            if unit.trim().is_empty() {
                return Err(LifecycleError::Config(format!("{field} must not be empty")));
            }
        }
        if self.endpoints.upgrade == self.endpoints.production {
            return Err(LifecycleError::Config(
                "upgrade endpoint must differ from the production endpoint".into(),
            ));
        }
        if self.timeouts.poll_interval.is_zero() {
            return Err(LifecycleError::Config(
                "timeouts.poll_interval must be non-zero".into(),
            ));
        }
        if self.versions.legacy_label.trim().is_empty() {
            return Err(LifecycleError::Config(
                "versions.legacy_label must not be empty".into(),
            ));
        }
        Ok(())
    }
}

impl std::str::FromStr for LifecycleConfig {
    type Err = LifecycleError;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: LifecycleConfig = toml::from_str(content)
            .map_err(|err| LifecycleError::Config(format!("failed to parse: {err}")))?;
        config.validate()?;
        Ok(config)
    }
}

/// Filesystem locations touched by the lifecycle flows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Release descriptor carrying the desired version.
    #[serde(default = "default_release_file")]
    pub release_file: PathBuf,
    /// Version record file.
    #[serde(default = "default_version_file")]
    pub version_file: PathBuf,
    /// Node environment file.
    #[serde(default = "default_environment_file")]
    pub environment_file: PathBuf,
    /// Base storage directory holding one subdirectory per version.
    #[serde(default = "default_store_base")]
    pub store_base: PathBuf,
    /// Name of the store's data directory inside a version directory.
    #[serde(default = "default_data_subdir")]
    pub data_subdir: String,
    /// Name of the symlink in `store_base` pointing at the active version.
    #[serde(default = "default_latest_link")]
    pub latest_link: String,
    /// Data directory used while the node runs in proxy mode.
    #[serde(default = "default_proxy_dir")]
    pub proxy_dir: PathBuf,
    /// Directory holding the executable symlinks.
    #[serde(default = "default_bin_dir")]
    pub bin_dir: PathBuf,
    #[serde(default = "default_executable")]
    pub executable: String,
    #[serde(default = "default_client")]
    pub client: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            release_file: default_release_file(),
            version_file: default_version_file(),
            environment_file: default_environment_file(),
            store_base: default_store_base(),
            data_subdir: default_data_subdir(),
            latest_link: default_latest_link(),
            proxy_dir: default_proxy_dir(),
            bin_dir: default_bin_dir(),
            executable: default_executable(),
            client: default_client(),
        }
    }
}

impl PathsConfig {
    /// Re-root every absolute path under `root`. Used to run against a sandbox.
    pub fn rooted_at(&self, root: &Path) -> Self {
        let reroot = |path: &Path| root.join(path.strip_prefix("/").unwrap_or(path));
        Self {
            release_file: reroot(&self.release_file),
            version_file: reroot(&self.version_file),
            environment_file: reroot(&self.environment_file),
            store_base: reroot(&self.store_base),
            proxy_dir: reroot(&self.proxy_dir),
            bin_dir: reroot(&self.bin_dir),
            ..self.clone()
        }
    }
}

/// Unit names per service role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_primary_unit")]
    pub primary: String,
    #[serde(default = "default_upgrade_unit")]
    pub upgrade: String,
    /// Reader of the store restarted after an upgrade.
    #[serde(default = "default_consumer_unit")]
    pub consumer: String,
    /// Node health reporter restarted after promotion.
    #[serde(default = "default_health_unit")]
    pub health: String,
    /// Process name confirmed gone after a unit is stopped.
    #[serde(default = "default_executable")]
    pub watched_executable: String,
    #[serde(default = "default_systemctl")]
    pub systemctl: PathBuf,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            primary: default_primary_unit(),
            upgrade: default_upgrade_unit(),
            consumer: default_consumer_unit(),
            health: default_health_unit(),
            watched_executable: default_executable(),
            systemctl: default_systemctl(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionsConfig {
    /// Label written to disk for installs that predate version tracking.
    #[serde(default = "default_legacy_label")]
    pub legacy_label: String,
}

impl Default for VersionsConfig {
    fn default() -> Self {
        Self {
            legacy_label: default_legacy_label(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_production_endpoint")]
    pub production: String,
    /// Temporary instance served by the upgrade unit.
    #[serde(default = "default_upgrade_endpoint")]
    pub upgrade: String,
    #[serde(default = "default_client_cert")]
    pub client_cert: PathBuf,
    #[serde(default = "default_client_key")]
    pub client_key: PathBuf,
    #[serde(default = "default_ca_cert")]
    pub ca_cert: PathBuf,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            production: default_production_endpoint(),
            upgrade: default_upgrade_endpoint(),
            client_cert: default_client_cert(),
            client_key: default_client_key(),
            ca_cert: default_ca_cert(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// External engine executable.
    #[serde(default = "default_engine")]
    pub engine: PathBuf,
    #[serde(default = "default_include_prefix")]
    pub include_prefix: String,
    /// Prefix rewritten for the new storage generation on restore.
    #[serde(default = "default_migrate_prefix")]
    pub migrate_prefix: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            include_prefix: default_include_prefix(),
            migrate_prefix: default_migrate_prefix(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Deadline for enable, disable, upgrade and backup operations.
    #[serde(default = "default_operation_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub operation: Duration,
    /// Process table polling tick.
    #[serde(default = "default_poll_interval")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub poll_interval: Duration,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            operation: default_operation_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Rolling log file directory. Stdout only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Prometheus textfile written after every operation.
    #[serde(default)]
    pub textfile: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn empty_document_uses_defaults() {
        let config: LifecycleConfig = "".parse().unwrap();
        assert_eq!(config.services.primary, "etcd.service");
        assert_eq!(config.paths.data_subdir, "member");
        assert_eq!(config.timeouts.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn overrides_are_applied() {
        let config: LifecycleConfig = r#"
            [services]
            consumer = "api.service"

            [timeouts]
            operation = 30
            poll_interval = 250
        "#
        .parse()
        .unwrap();
        assert_eq!(config.services.consumer, "api.service");
        assert_eq!(config.timeouts.operation, Duration::from_secs(30));
        assert_eq!(config.timeouts.poll_interval, Duration::from_millis(250));
    }

    #[test]
    fn shared_endpoint_is_rejected() {
        let err = r#"
            [endpoints]
            production = "https://10.0.0.1:2379"
            upgrade = "https://10.0.0.1:2379"
        "#
        .parse::<LifecycleConfig>()
        .unwrap_err();
        assert_matches!(err, LifecycleError::Config(_));
    }

    #[test]
    fn rooted_paths_stay_inside_sandbox() {
        let root = Path::new("/tmp/sandbox");
        let paths = PathsConfig::default().rooted_at(root);
        assert_eq!(paths.store_base, root.join("ext/etcd"));
        assert_eq!(paths.bin_dir, root.join("usr/bin"));
        assert_eq!(paths.executable, "etcd");
    }

    #[test]
    fn example_configuration_parses() {
        let config: LifecycleConfig = include_str!("../../../configs/mstore.example.toml")
            .parse()
            .unwrap();
        assert_eq!(config.backup.migrate_prefix, "/registry");
        assert_eq!(config.logging.format, LogFormat::StructuredJson);
        assert!(config.metrics.textfile.is_some());
    }
}
