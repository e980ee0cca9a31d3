//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mstore_common::{LifecycleError, Result, ServicesConfig};
use mstore_logging::{mstore_warn, LogContext};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::command::ExternalCommand;
use crate::process::ProcessWatcher;

/// Role a unit plays on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ServiceRole {
    /// Production store instance.
    Primary,
    /// Temporary store instance of the new version used during restore.
    UpgradeShadow,
    /// Reader of the store, restarted after a version switch.
    Consumer,
    /// Node health reporter, restarted after promotion.
    NodeHealth,
}

/// A unit addressed by name together with its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub role: ServiceRole,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>, role: ServiceRole) -> Self {
        Self {
            name: name.into(),
            role,
        }
    }

    /// Resolve the configured unit for `role`.
    pub fn from_config(services: &ServicesConfig, role: ServiceRole) -> Self {
        let name = match role {
            ServiceRole::Primary => &services.primary,
            ServiceRole::UpgradeShadow => &services.upgrade,
            ServiceRole::Consumer => &services.consumer,
            ServiceRole::NodeHealth => &services.health,
        };
        Self::new(name.clone(), role)
    }
}

impl fmt::Display for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Unit activity as reported by the service manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ActiveState {
    Active,
    Reloading,
    Inactive,
    Failed,
    Activating,
    Deactivating,
    Other(String),
}

impl ActiveState {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "active" => ActiveState::Active,
            "reloading" => ActiveState::Reloading,
            "inactive" => ActiveState::Inactive,
            "failed" => ActiveState::Failed,
            "activating" => ActiveState::Activating,
            "deactivating" => ActiveState::Deactivating,
            other => ActiveState::Other(other.to_owned()),
        }
    }

    /// Stopped for good; the only states an upgrade may proceed from.
    pub fn is_quiescent(&self) -> bool {
        matches!(self, ActiveState::Inactive | ActiveState::Failed)
    }

    /// Serving or about to serve.
    pub fn is_running(&self) -> bool {
        matches!(
            self,
            ActiveState::Active | ActiveState::Reloading | ActiveState::Activating
        )
    }
}

impl fmt::Display for ActiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ActiveState::Active => "active",
            ActiveState::Reloading => "reloading",
            ActiveState::Inactive => "inactive",
            ActiveState::Failed => "failed",
            ActiveState::Activating => "activating",
            ActiveState::Deactivating => "deactivating",
            ActiveState::Other(other) => other,
        };
        f.write_str(label)
    }
}

/// One row of a unit listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub name: String,
    pub active_state: ActiveState,
}

/// Narrow view of the local service manager.
#[async_trait]
pub trait ServiceManager: Send + Sync {
    async fn mask(&self, unit: &str) -> Result<()>;
    async fn unmask(&self, unit: &str) -> Result<()>;
    async fn start(&self, unit: &str) -> Result<()>;
    async fn stop(&self, unit: &str) -> Result<()>;
    async fn restart(&self, unit: &str) -> Result<()>;
    /// Reload unit definitions from disk.
    async fn daemon_reload(&self) -> Result<()>;
    /// Status of every loaded unit whose name matches one of `units`.
    async fn list_units(&self, units: &[&str]) -> Result<Vec<UnitStatus>>;
}

/// [`ServiceManager`] driving `systemctl`.
///
/// Unit operations are queued with `--no-block`; callers that need the unit
/// fully down confirm through the process table.
#[derive(Debug, Clone)]
pub struct SystemctlManager {
    systemctl: PathBuf,
}

impl SystemctlManager {
    pub fn new(systemctl: impl Into<PathBuf>) -> Self {
        Self {
            systemctl: systemctl.into(),
        }
    }

    async fn unit_op(&self, operation: &str, unit: &str) -> Result<()> {
        ExternalCommand::new(&self.systemctl)
            .args(["--no-block", operation, unit])
            .run()
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl ServiceManager for SystemctlManager {
    async fn mask(&self, unit: &str) -> Result<()> {
        self.unit_op("mask", unit).await
    }

    async fn unmask(&self, unit: &str) -> Result<()> {
        self.unit_op("unmask", unit).await
    }

    async fn start(&self, unit: &str) -> Result<()> {
        self.unit_op("start", unit).await
    }

    async fn stop(&self, unit: &str) -> Result<()> {
        self.unit_op("stop", unit).await
    }

    async fn restart(&self, unit: &str) -> Result<()> {
        self.unit_op("restart", unit).await
    }

    async fn daemon_reload(&self) -> Result<()> {
        ExternalCommand::new(&self.systemctl)
            .arg("daemon-reload")
            .run()
            .await
            .map(|_| ())
    }

    async fn list_units(&self, units: &[&str]) -> Result<Vec<UnitStatus>> {
        let output = ExternalCommand::new(&self.systemctl)
            .args(["list-units", "--all", "--plain", "--no-legend", "--no-pager"])
            .args(units)
            .run()
            .await?;
        Ok(parse_unit_listing(&output))
    }
}

/// Parse `UNIT LOAD ACTIVE SUB DESCRIPTION` rows.
pub fn parse_unit_listing(output: &str) -> Vec<UnitStatus> {
    output
        .lines()
        .filter_map(|line| {
            let mut columns = line
                .split_whitespace()
                .skip_while(|column| *column == "●" || *column == "*");
            let name = columns.next()?;
            let _load = columns.next()?;
            let active = columns.next()?;
            Some(UnitStatus {
                name: name.to_owned(),
                active_state: ActiveState::parse(active),
            })
        })
        .collect()
}

/// Façade over the service manager used by every flow.
#[derive(Clone)]
pub struct ServiceController {
    manager: Arc<dyn ServiceManager>,
    watcher: ProcessWatcher,
    executable: String,
}

impl ServiceController {
    pub fn new(
        manager: Arc<dyn ServiceManager>,
        watcher: ProcessWatcher,
        executable: impl Into<String>,
    ) -> Self {
        Self {
            manager,
            watcher,
            executable: executable.into(),
        }
    }

    /// Mask and stop `service`, then wait for its process to exit.
    pub async fn disable(
        &self,
        service: &ServiceDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        info!(service = %service, "disabling service");
        self.manager.mask(&service.name).await?;
        self.stop_and_wait(service, timeout, cancel).await
    }

    /// Stop `service` and wait for its process to exit, leaving it unmasked.
    pub async fn stop_and_wait(
        &self,
        service: &ServiceDescriptor,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.manager.stop(&service.name).await?;
        self.watcher
            .wait_for_stopped(&self.executable, timeout, cancel)
            .await
    }

    /// Unmask and start `service`. Readiness is left to the service manager.
    pub async fn enable(&self, service: &ServiceDescriptor) -> Result<()> {
        info!(service = %service, "enabling service");
        self.manager.unmask(&service.name).await?;
        self.manager.start(&service.name).await
    }

    pub async fn start(&self, service: &ServiceDescriptor) -> Result<()> {
        self.manager.start(&service.name).await
    }

    pub async fn restart(&self, service: &ServiceDescriptor) -> Result<()> {
        self.manager.restart(&service.name).await
    }

    pub async fn daemon_reload(&self) -> Result<()> {
        self.manager.daemon_reload().await
    }

    /// Active state of exactly one unit.
    pub async fn status(&self, service: &ServiceDescriptor) -> Result<ActiveState> {
        let mut units = self.manager.list_units(&[service.name.as_str()]).await?;
        if units.len() != 1 {
            return Err(LifecycleError::bad_parameter(format!(
                "unexpected number of status results ({}) when checking service {}",
                units.len(),
                service
            )));
        }
        let unit = units.remove(0);
        Ok(unit.active_state)
    }

    /// Restart `service` if it is running. Failures are logged, never returned.
    pub async fn restart_if_running(&self, service: &ServiceDescriptor) {
        let context = LogContext::new().with_service(&service.name);
        let state = match self.status(service).await {
            Ok(state) => state,
            Err(err) => {
                mstore_warn!(
                    context = context,
                    "unable to query service status, skipping restart: {err}"
                );
                return;
            }
        };
        if !state.is_running() {
            return;
        }
        if let Err(err) = self.manager.restart(&service.name).await {
            mstore_warn!(context = context, "error attempting to restart service: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProcessTable, FakeServiceManager, ServiceCall};
    use assert_matches::assert_matches;

    fn controller(manager: Arc<FakeServiceManager>, table: Arc<FakeProcessTable>) -> ServiceController {
        let watcher = ProcessWatcher::new(table, Duration::from_millis(50));
        ServiceController::new(manager, watcher, "etcd")
    }

    fn primary() -> ServiceDescriptor {
        ServiceDescriptor::new("etcd.service", ServiceRole::Primary)
    }

    #[test]
    fn listing_parser_reads_active_column() {
        let units = parse_unit_listing(
            "etcd.service loaded active running etcd key-value store\n\
             ● etcd-upgrade.service masked failed failed etcd upgrade\n",
        );
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].active_state, ActiveState::Active);
        assert_eq!(units[1].name, "etcd-upgrade.service");
        assert_eq!(units[1].active_state, ActiveState::Failed);
    }

    #[test]
    fn state_classification() {
        assert!(ActiveState::parse("inactive").is_quiescent());
        assert!(ActiveState::parse("failed").is_quiescent());
        assert!(!ActiveState::parse("deactivating").is_quiescent());
        assert!(ActiveState::parse("activating").is_running());
        assert_eq!(ActiveState::parse("maintenance").to_string(), "maintenance");
    }

    #[tokio::test(start_paused = true)]
    async fn disable_masks_stops_then_waits_for_exit() {
        let manager = Arc::new(FakeServiceManager::new());
        let table = Arc::new(FakeProcessTable::new());
        table.push_scan(["etcd"]);
        table.push_scan(["etcd"]);
        let controller = controller(manager.clone(), table.clone());

        controller
            .disable(&primary(), Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            manager.calls(),
            vec![
                ServiceCall::Mask("etcd.service".into()),
                ServiceCall::Stop("etcd.service".into()),
            ]
        );
        assert_eq!(table.scans(), 3);
    }

    #[tokio::test]
    async fn enable_unmasks_then_starts() {
        let manager = Arc::new(FakeServiceManager::new());
        let controller = controller(manager.clone(), Arc::new(FakeProcessTable::new()));
        controller.enable(&primary()).await.unwrap();
        assert_eq!(
            manager.calls(),
            vec![
                ServiceCall::Unmask("etcd.service".into()),
                ServiceCall::Start("etcd.service".into()),
            ]
        );
    }

    #[tokio::test]
    async fn status_requires_exactly_one_unit() {
        let manager = Arc::new(FakeServiceManager::new());
        let controller = controller(manager.clone(), Arc::new(FakeProcessTable::new()));
        assert_matches!(
            controller.status(&primary()).await,
            Err(LifecycleError::BadParameter(_))
        );

        manager.set_state("etcd.service", "active");
        assert_eq!(controller.status(&primary()).await.unwrap(), ActiveState::Active);
    }

    #[tokio::test]
    async fn failed_restart_is_swallowed() {
        let manager = Arc::new(FakeServiceManager::new());
        manager.set_state("kube-apiserver.service", "active");
        manager.fail_on("restart", "kube-apiserver.service");
        let controller = controller(manager.clone(), Arc::new(FakeProcessTable::new()));

        controller
            .restart_if_running(&ServiceDescriptor::new(
                "kube-apiserver.service",
                ServiceRole::Consumer,
            ))
            .await;
        assert!(manager
            .calls()
            .contains(&ServiceCall::Restart("kube-apiserver.service".into())));
    }
}
