//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mstore_common::{BackupConfig, EndpointsConfig, LifecycleError, Result};
use serde::Serialize;
use tracing::info;

use crate::command::ExternalCommand;

/// Store instance a job connects to, with its client credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobTarget {
    pub endpoints: Vec<String>,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
    pub ca_cert: PathBuf,
}

impl JobTarget {
    fn with_endpoint(endpoints: &EndpointsConfig, endpoint: &str) -> Self {
        Self {
            endpoints: vec![endpoint.to_owned()],
            client_cert: endpoints.client_cert.clone(),
            client_key: endpoints.client_key.clone(),
            ca_cert: endpoints.ca_cert.clone(),
        }
    }
}

/// Snapshot the key space of a running store into `file`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupJob {
    pub target: JobTarget,
    pub include_prefixes: BTreeSet<String>,
    pub file: PathBuf,
    pub deadline: Option<Duration>,
}

/// Load `file` into a store, rewriting the migrate prefixes on the way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestoreJob {
    pub target: JobTarget,
    pub include_prefixes: BTreeSet<String>,
    pub migrate_prefixes: BTreeSet<String>,
    pub file: PathBuf,
}

/// The external engine performing data copies.
#[async_trait]
pub trait BackupEngine: Send + Sync {
    async fn backup(&self, job: &BackupJob) -> Result<()>;
    async fn restore(&self, job: &RestoreJob) -> Result<()>;
}

/// [`BackupEngine`] invoking a backup executable once per job.
#[derive(Debug, Clone)]
pub struct CommandBackupEngine {
    program: PathBuf,
}

impl CommandBackupEngine {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn base_command(&self, verb: &str, target: &JobTarget) -> ExternalCommand {
        ExternalCommand::new(&self.program)
            .arg(verb)
            .arg("--endpoints")
            .arg(target.endpoints.join(","))
            .arg("--cert")
            .arg(&target.client_cert)
            .arg("--key")
            .arg(&target.client_key)
            .arg("--cacert")
            .arg(&target.ca_cert)
    }

    pub fn backup_command(&self, job: &BackupJob) -> ExternalCommand {
        let mut command = self.base_command("backup", &job.target);
        for prefix in &job.include_prefixes {
            command = command.arg("--prefix").arg(prefix);
        }
        if let Some(deadline) = job.deadline {
            command = command
                .arg("--timeout")
                .arg(format!("{}s", deadline.as_secs()));
        }
        command.arg("--file").arg(&job.file)
    }

    pub fn restore_command(&self, job: &RestoreJob) -> ExternalCommand {
        let mut command = self.base_command("restore", &job.target);
        for prefix in &job.include_prefixes {
            command = command.arg("--prefix").arg(prefix);
        }
        for prefix in &job.migrate_prefixes {
            command = command.arg("--migrate-prefix").arg(prefix);
        }
        command.arg("--file").arg(&job.file)
    }
}

#[async_trait]
impl BackupEngine for CommandBackupEngine {
    async fn backup(&self, job: &BackupJob) -> Result<()> {
        self.backup_command(job).run().await.map(|_| ())
    }

    async fn restore(&self, job: &RestoreJob) -> Result<()> {
        self.restore_command(job).run().await.map(|_| ())
    }
}

/// Builds backup and restore jobs for this node and hands them to the engine.
#[derive(Clone)]
pub struct BackupOrchestrator {
    engine: Arc<dyn BackupEngine>,
    endpoints: EndpointsConfig,
    backup: BackupConfig,
    deadline: Duration,
}

impl BackupOrchestrator {
    pub fn new(
        engine: Arc<dyn BackupEngine>,
        endpoints: EndpointsConfig,
        backup: BackupConfig,
        deadline: Duration,
    ) -> Self {
        Self {
            engine,
            endpoints,
            backup,
            deadline,
        }
    }

    /// Back up the production store into `file`, replacing any stale file.
    pub async fn backup(&self, file: &Path) -> Result<BackupJob> {
        match fs::remove_file(file) {
            Ok(()) => info!(file = %file.display(), "removed leftover backup file"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(LifecycleError::system(
                    format!("removing leftover backup {}", file.display()),
                    err,
                ))
            }
        }

        let job = BackupJob {
            target: JobTarget::with_endpoint(&self.endpoints, &self.endpoints.production),
            include_prefixes: BTreeSet::from([self.backup.include_prefix.clone()]),
            file: file.to_path_buf(),
            deadline: Some(self.deadline),
        };
        info!(?job, "submitting backup job");

        match tokio::time::timeout(self.deadline, self.engine.backup(&job)).await {
            Ok(result) => result.map(|()| job),
            Err(_) => Err(LifecycleError::Timeout {
                what: format!("backup into {}", file.display()),
                after: self.deadline,
            }),
        }
    }

    /// Restore `file` into the upgrade-shadow store. Runs without a deadline.
    pub async fn restore(&self, file: &Path) -> Result<RestoreJob> {
        let job = RestoreJob {
            target: JobTarget::with_endpoint(&self.endpoints, &self.endpoints.upgrade),
            include_prefixes: BTreeSet::from([self.backup.include_prefix.clone()]),
            migrate_prefixes: BTreeSet::from([self.backup.migrate_prefix.clone()]),
            file: file.to_path_buf(),
        };
        info!(?job, "submitting restore job");
        self.engine.restore(&job).await?;
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingEngine, SubmittedJob};
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    fn orchestrator(engine: Arc<dyn BackupEngine>, deadline: Duration) -> BackupOrchestrator {
        BackupOrchestrator::new(
            engine,
            EndpointsConfig::default(),
            BackupConfig::default(),
            deadline,
        )
    }

    struct StalledEngine;

    #[async_trait]
    impl BackupEngine for StalledEngine {
        async fn backup(&self, _job: &BackupJob) -> Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }

        async fn restore(&self, _job: &RestoreJob) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn backup_targets_production_and_full_keyspace() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("etcd.backup");
        let engine = Arc::new(RecordingEngine::new());
        let job = orchestrator(engine.clone(), Duration::from_secs(900))
            .backup(&file)
            .await
            .unwrap();

        assert_eq!(job.target.endpoints, vec!["https://127.0.0.1:2379".to_owned()]);
        assert_eq!(job.include_prefixes, BTreeSet::from(["/".to_owned()]));
        assert_eq!(job.deadline, Some(Duration::from_secs(900)));
        assert_eq!(engine.jobs(), vec![SubmittedJob::Backup(job)]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_backup_hits_deadline() {
        let dir = tempdir().unwrap();
        let err = orchestrator(Arc::new(StalledEngine), Duration::from_secs(30))
            .backup(&dir.path().join("etcd.backup"))
            .await
            .unwrap_err();
        assert_matches!(err, LifecycleError::Timeout { after, .. } if after == Duration::from_secs(30));
    }

    #[tokio::test]
    async fn engine_failure_propagates() {
        let dir = tempdir().unwrap();
        let engine = Arc::new(RecordingEngine::new());
        engine.fail_with("snapshot failed");
        let err = orchestrator(engine, Duration::from_secs(900))
            .restore(&dir.path().join("etcd.backup"))
            .await
            .unwrap_err();
        assert_matches!(err, LifecycleError::Engine(ref message) if message == "snapshot failed");
    }

    #[test]
    fn command_line_carries_migration_rule() {
        let engine = CommandBackupEngine::new("/usr/bin/etcd-backup");
        let job = RestoreJob {
            target: JobTarget::with_endpoint(&EndpointsConfig::default(), "https://127.0.0.2:2379"),
            include_prefixes: BTreeSet::from(["/".to_owned()]),
            migrate_prefixes: BTreeSet::from(["/registry".to_owned()]),
            file: PathBuf::from("/tmp/etcd.backup"),
        };
        assert_eq!(
            engine.restore_command(&job).to_string(),
            "/usr/bin/etcd-backup restore --endpoints https://127.0.0.2:2379 \
             --cert /var/state/etcd.cert --key /var/state/etcd.key --cacert /var/state/root.cert \
             --prefix / --migrate-prefix /registry --file /tmp/etcd.backup"
        );
    }
}
