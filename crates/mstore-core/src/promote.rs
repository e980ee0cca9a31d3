//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lifecycle orchestration for the metadata store."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use mstore_common::environment::{
    ENV_INITIAL_CLUSTER, ENV_INITIAL_CLUSTER_STATE, ENV_MEMBER_NAME, ENV_PROXY, PROXY_OFF,
};
use mstore_common::{LifecycleError, NodeEnvironment, Result};
use mstore_logging::{mstore_error, LogContext};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::services::{ServiceController, ServiceDescriptor};
use crate::setup::VersionSetup;

/// Voting member identity handed to a proxy being promoted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromotionRequest {
    pub name: String,
    pub initial_cluster: String,
    pub initial_cluster_state: String,
}

impl PromotionRequest {
    pub fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("member name", &self.name),
            ("initial cluster", &self.initial_cluster),
            ("initial cluster state", &self.initial_cluster_state),
        ] {
            if value.trim().is_empty() {
                return Err(LifecycleError::bad_parameter(format!(
                    "{field} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromotionOutcome {
    /// The node was already a voting member; nothing changed.
    AlreadyMember,
    Promoted,
}

/// Converts a proxy node into a voting member.
#[derive(Clone)]
pub struct PromotionFlow {
    services: ServiceController,
    setup: VersionSetup,
    primary: ServiceDescriptor,
    health: ServiceDescriptor,
    environment_file: PathBuf,
    proxy_dir: PathBuf,
    timeout: Duration,
}

impl PromotionFlow {
    pub fn new(
        services: ServiceController,
        setup: VersionSetup,
        primary: ServiceDescriptor,
        health: ServiceDescriptor,
        environment_file: PathBuf,
        proxy_dir: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            services,
            setup,
            primary,
            health,
            environment_file,
            proxy_dir,
            timeout,
        }
    }

    pub async fn promote(
        &self,
        request: &PromotionRequest,
        cancel: &CancellationToken,
    ) -> Result<PromotionOutcome> {
        let mut environment = NodeEnvironment::read(&self.environment_file)?;
        if environment.proxy_disabled() {
            info!("node is already a voting member");
            return Ok(PromotionOutcome::AlreadyMember);
        }
        request.validate()?;

        environment.upsert(ENV_PROXY, PROXY_OFF);
        environment.upsert(ENV_MEMBER_NAME, request.name.as_str());
        environment.upsert(ENV_INITIAL_CLUSTER, request.initial_cluster.as_str());
        environment.upsert(
            ENV_INITIAL_CLUSTER_STATE,
            request.initial_cluster_state.as_str(),
        );
        environment.write(&self.environment_file)?;
        info!(member = %request.name, "node environment updated for membership");

        self.restart_as_member(cancel).await.inspect_err(|err| {
            mstore_error!(
                context = LogContext::new()
                    .with_node(&request.name)
                    .with_service(&self.primary.name),
                "environment already switched to membership, promotion incomplete: {err}"
            );
        })?;
        info!(member = %request.name, "promotion complete");
        Ok(PromotionOutcome::Promoted)
    }

    async fn restart_as_member(&self, cancel: &CancellationToken) -> Result<()> {
        self.services
            .stop_and_wait(&self.primary, self.timeout, cancel)
            .await?;

        match fs::remove_dir_all(&self.proxy_dir) {
            Ok(()) => info!(path = %self.proxy_dir.display(), "removed proxy data"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(LifecycleError::system(
                    format!("removing proxy data {}", self.proxy_dir.display()),
                    err,
                ))
            }
        }

        self.setup.run()?;
        self.services.daemon_reload().await?;
        self.services.start(&self.primary).await?;
        self.services.restart(&self.health).await
    }
}
