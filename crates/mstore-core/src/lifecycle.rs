//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::Path;
use std::sync::Arc;

use mstore_common::environment::ENV_MEMBER_NAME;
use mstore_common::{LifecycleConfig, LifecycleError, NodeEnvironment, Result};
use mstore_logging::{log_lifecycle_event, mstore_info, LifecycleOutcome, LogContext};
use mstore_versioning::{SymlinkSwitcher, Version, VersionLabels, VersionRegistry};
use tokio_util::sync::CancellationToken;

use crate::backup::{BackupEngine, BackupJob, BackupOrchestrator, CommandBackupEngine, RestoreJob};
use crate::metrics::LifecycleMetrics;
use crate::process::{ProcessTable, ProcessWatcher, ProcfsTable};
use crate::promote::{PromotionFlow, PromotionOutcome, PromotionRequest};
use crate::services::{
    ActiveState, ServiceController, ServiceDescriptor, ServiceManager, ServiceRole,
    SystemctlManager,
};
use crate::setup::VersionSetup;
use crate::upgrade::{Transition, TransitionOutcome, TransitionUnits, UpgradeStateMachine};

const ROLES: [ServiceRole; 4] = [
    ServiceRole::Primary,
    ServiceRole::UpgradeShadow,
    ServiceRole::Consumer,
    ServiceRole::NodeHealth,
];

/// Entry point for every node lifecycle operation.
///
/// Operations are meant to run one at a time per node. Each one is counted in
/// [`LifecycleMetrics`] and reported through a lifecycle event.
pub struct Lifecycle {
    config: LifecycleConfig,
    services: ServiceController,
    setup: VersionSetup,
    machine: UpgradeStateMachine,
    backups: BackupOrchestrator,
    promotion: PromotionFlow,
    metrics: LifecycleMetrics,
}

impl Lifecycle {
    pub fn new(
        config: LifecycleConfig,
        manager: Arc<dyn ServiceManager>,
        table: Arc<dyn ProcessTable>,
        engine: Arc<dyn BackupEngine>,
        metrics: LifecycleMetrics,
    ) -> Self {
        let paths = &config.paths;
        let labels = VersionLabels::new(config.versions.legacy_label.clone())
            .reserving(SymlinkSwitcher::reserved_names(paths));
        let registry = VersionRegistry::new(paths.version_file.clone(), labels.clone());
        let switcher = SymlinkSwitcher::new(paths, labels);

        let watcher =
            ProcessWatcher::new(table, config.timeouts.poll_interval).with_metrics(metrics.clone());
        let services = ServiceController::new(
            manager,
            watcher,
            config.services.watched_executable.clone(),
        );
        let descriptor = |role| ServiceDescriptor::from_config(&config.services, role);

        let setup = VersionSetup::new(
            registry.clone(),
            switcher.clone(),
            paths.release_file.clone(),
        );
        let machine = UpgradeStateMachine::new(
            registry,
            switcher,
            services.clone(),
            TransitionUnits {
                primary: descriptor(ServiceRole::Primary),
                shadow: descriptor(ServiceRole::UpgradeShadow),
                consumer: descriptor(ServiceRole::Consumer),
            },
            paths.release_file.clone(),
            paths.environment_file.clone(),
        );
        let backups = BackupOrchestrator::new(
            engine,
            config.endpoints.clone(),
            config.backup.clone(),
            config.timeouts.operation,
        );
        let promotion = PromotionFlow::new(
            services.clone(),
            setup.clone(),
            descriptor(ServiceRole::Primary),
            descriptor(ServiceRole::NodeHealth),
            paths.environment_file.clone(),
            paths.proxy_dir.clone(),
            config.timeouts.operation,
        );

        Self {
            config,
            services,
            setup,
            machine,
            backups,
            promotion,
            metrics,
        }
    }

    /// Wire the production collaborators: `systemctl`, `/proc` and the
    /// configured backup executable.
    pub fn from_config(config: LifecycleConfig) -> Result<Self> {
        let manager = Arc::new(SystemctlManager::new(config.services.systemctl.clone()));
        let engine = Arc::new(CommandBackupEngine::new(config.backup.engine.clone()));
        let metrics = LifecycleMetrics::standalone()?;
        Ok(Self::new(
            config,
            manager,
            Arc::new(ProcfsTable),
            engine,
            metrics,
        ))
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn metrics(&self) -> &LifecycleMetrics {
        &self.metrics
    }

    pub fn descriptor(&self, role: ServiceRole) -> ServiceDescriptor {
        ServiceDescriptor::from_config(&self.config.services, role)
    }

    /// Switch binaries and data to the recorded version, creating the record
    /// on a fresh install.
    pub fn init(&self) -> Result<Version> {
        let result = self.setup.run();
        self.finish("init", None, result, |version| {
            Report::success(format!("running version {version}")).at(version)
        })
    }

    pub async fn upgrade(&self) -> Result<TransitionOutcome> {
        self.transition(Transition::Upgrade).await
    }

    pub async fn rollback(&self) -> Result<TransitionOutcome> {
        self.transition(Transition::Rollback).await
    }

    async fn transition(&self, transition: Transition) -> Result<TransitionOutcome> {
        let result = self.machine.run(transition).await;
        self.finish(transition.as_str(), None, result, |outcome| match outcome {
            TransitionOutcome::ProxyMode => Report::skipped("proxy mode enabled"),
            TransitionOutcome::Unchanged(record) => {
                Report::skipped(format!("version record unchanged at {}", record.current))
                    .at(&record.current)
            }
            TransitionOutcome::Applied { record, .. } => {
                Report::success(format!("version record now at {}", record.current))
                    .at(&record.current)
            }
        })
    }

    pub async fn backup(&self, file: &Path) -> Result<BackupJob> {
        let result = self.backups.backup(file).await;
        self.finish("backup", None, result, |job| {
            Report::success(format!("backup written to {}", job.file.display()))
        })
    }

    pub async fn restore(&self, file: &Path) -> Result<RestoreJob> {
        let result = self.backups.restore(file).await;
        self.finish("restore", None, result, |job| {
            Report::success(format!("restored {}", job.file.display()))
        })
    }

    /// Unmask and start the unit for `role`. The upgrade shadow never runs on
    /// a proxy.
    pub async fn enable(&self, role: ServiceRole) -> Result<()> {
        let service = self.descriptor(role);
        let result = self.enable_unless_proxy(&service).await;
        self.finish("enable", Some(&service), result, |started| {
            if *started {
                Report::success("unit enabled")
            } else {
                Report::skipped("proxy mode enabled")
            }
        })
        .map(|_| ())
    }

    async fn enable_unless_proxy(&self, service: &ServiceDescriptor) -> Result<bool> {
        if service.role == ServiceRole::UpgradeShadow && self.machine.proxy_mode()? {
            mstore_info!(
                context = LogContext::new().with_service(&service.name),
                "proxy mode enabled, not starting upgrade instance"
            );
            return Ok(false);
        }
        self.services.enable(service).await?;
        Ok(true)
    }

    /// Mask and stop the unit for `role`, returning once its process exited.
    pub async fn disable(&self, role: ServiceRole, cancel: &CancellationToken) -> Result<()> {
        let service = self.descriptor(role);
        let result = self
            .services
            .disable(&service, self.config.timeouts.operation, cancel)
            .await;
        self.finish("disable", Some(&service), result, |_| {
            Report::success("unit disabled")
        })
    }

    /// Active state of one of the managed units, addressed by unit name.
    pub async fn status(&self, unit: &str) -> Result<ActiveState> {
        let service = ROLES
            .iter()
            .map(|role| self.descriptor(*role))
            .find(|service| service.name == unit)
            .ok_or_else(|| {
                LifecycleError::bad_parameter(format!("{unit} is not a managed unit"))
            })?;
        self.services.status(&service).await
    }

    pub async fn promote(
        &self,
        request: &PromotionRequest,
        cancel: &CancellationToken,
    ) -> Result<PromotionOutcome> {
        let result = self.promotion.promote(request, cancel).await;
        let primary = self.descriptor(ServiceRole::Primary);
        self.finish("promote", Some(&primary), result, |outcome| match outcome {
            PromotionOutcome::AlreadyMember => Report::skipped("node is already a voting member"),
            PromotionOutcome::Promoted => {
                Report::success(format!("promoted to member {}", request.name))
            }
        })
    }

    fn finish<T>(
        &self,
        operation: &str,
        service: Option<&ServiceDescriptor>,
        result: Result<T>,
        describe: impl FnOnce(&T) -> Report,
    ) -> Result<T> {
        let report = match &result {
            Ok(value) => describe(value),
            Err(err) => Report::fault(err.to_string()),
        };
        self.metrics.record_operation(operation, report.outcome);

        let node = self.member_name();
        let mut context = LogContext::new();
        if let Some(node) = node.as_deref() {
            context = context.with_node(node);
        }
        if let Some(service) = service {
            context = context.with_service(&service.name);
        }
        if let Some(version) = report.version.as_deref() {
            context = context.with_version(version);
        }
        log_lifecycle_event(
            Some(&context),
            &format!("lifecycle.{operation}"),
            &report.message,
            report.outcome,
        );
        result
    }

    /// Member name from the node environment; absent on a node that never
    /// joined as a member.
    fn member_name(&self) -> Option<String> {
        NodeEnvironment::read(&self.config.paths.environment_file)
            .ok()?
            .get(ENV_MEMBER_NAME)
            .map(str::to_owned)
    }
}

/// How a finished operation is reported.
struct Report {
    outcome: LifecycleOutcome,
    message: String,
    version: Option<String>,
}

impl Report {
    fn success(message: impl Into<String>) -> Self {
        Self::with(LifecycleOutcome::Success, message)
    }

    fn skipped(message: impl Into<String>) -> Self {
        Self::with(LifecycleOutcome::Skipped, message)
    }

    fn fault(message: impl Into<String>) -> Self {
        Self::with(LifecycleOutcome::Fault, message)
    }

    fn with(outcome: LifecycleOutcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            version: None,
        }
    }

    fn at(mut self, version: &Version) -> Self {
        self.version = Some(version.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeProcessTable, FakeServiceManager, RecordingEngine};
    use std::fs;
    use tempfile::tempdir;

    fn lifecycle(root: &Path) -> Lifecycle {
        let mut config = LifecycleConfig::default();
        config.paths = config.paths.rooted_at(root);
        Lifecycle::new(
            config,
            Arc::new(FakeServiceManager::new()),
            Arc::new(FakeProcessTable::new()),
            Arc::new(RecordingEngine::new()),
            LifecycleMetrics::standalone().unwrap(),
        )
    }

    #[test]
    fn events_carry_member_name_once_known() {
        let dir = tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        assert_eq!(lifecycle.member_name(), None);

        let env_file = &lifecycle.config().paths.environment_file;
        fs::create_dir_all(env_file.parent().unwrap()).unwrap();
        fs::write(env_file, "ETCD_PROXY=\"off\"\nETCD_MEMBER_NAME=\"node-1\"\n").unwrap();
        assert_eq!(lifecycle.member_name().as_deref(), Some("node-1"));
    }

    #[test]
    fn reports_name_the_resulting_version() {
        let report = Report::success("version record now at 3.3.12")
            .at(&Version::release("3.3.12"));
        assert_eq!(report.outcome, LifecycleOutcome::Success);
        assert_eq!(report.version.as_deref(), Some("3.3.12"));
        assert_eq!(Report::fault("boom").version, None);
    }

    #[test]
    fn labels_reject_reserved_store_entries() {
        let dir = tempdir().unwrap();
        let lifecycle = lifecycle(dir.path());
        let release = &lifecycle.config().paths.release_file;
        fs::create_dir_all(release.parent().unwrap()).unwrap();
        fs::write(release, "ETCD_VERSION=latest\n").unwrap();
        assert!(matches!(
            lifecycle.setup.desired(),
            Err(LifecycleError::BadParameter(_))
        ));
    }
}
