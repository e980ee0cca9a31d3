//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Node-local CLI for the metadata store lifecycle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use mstore_common::LifecycleConfig;
use mstore_core::{Lifecycle, PromotionOutcome, PromotionRequest, ServiceRole, TransitionOutcome};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Lifecycle operations on the local store.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Point binaries and data at the recorded version.
    Init,
    /// Record the release version as current and prepare its data directory.
    Upgrade,
    /// Restore the backup version recorded by the last upgrade.
    Rollback,
    /// Snapshot the production store.
    Backup(FileArgs),
    /// Load a snapshot into the upgrade instance.
    Restore(FileArgs),
    /// Unmask and start a store unit.
    Enable(UnitArgs),
    /// Mask and stop a store unit, waiting for its process to exit.
    Disable(UnitArgs),
    /// Print the active state of a managed unit.
    Status {
        /// Unit name, e.g. etcd.service.
        unit: String,
    },
    /// Turn this proxy into a voting member.
    Promote(PromoteArgs),
}

#[derive(Debug, Args)]
pub struct FileArgs {
    /// Snapshot file.
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct UnitArgs {
    /// Target the upgrade instance instead of the primary store.
    #[arg(long)]
    pub upgrade: bool,
}

impl UnitArgs {
    fn role(&self) -> ServiceRole {
        if self.upgrade {
            ServiceRole::UpgradeShadow
        } else {
            ServiceRole::Primary
        }
    }
}

#[derive(Debug, Args)]
pub struct PromoteArgs {
    /// Member name of this node.
    #[arg(long)]
    pub name: String,
    /// Comma separated `name=peer-url` list.
    #[arg(long)]
    pub initial_cluster: String,
    /// `new` or `existing`.
    #[arg(long)]
    pub initial_cluster_state: String,
}

impl From<PromoteArgs> for PromotionRequest {
    fn from(args: PromoteArgs) -> Self {
        PromotionRequest {
            name: args.name,
            initial_cluster: args.initial_cluster,
            initial_cluster_state: args.initial_cluster_state,
        }
    }
}

/// Execute one command, then publish metrics if a textfile is configured.
pub async fn run(command: Command, config: LifecycleConfig) -> Result<()> {
    let textfile = config.metrics.textfile.clone();
    let lifecycle = Lifecycle::from_config(config)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            trigger.cancel();
        }
    });

    let result = dispatch(&lifecycle, command, &cancel).await;

    if let Some(path) = textfile {
        if let Err(err) = lifecycle.metrics().write_textfile(&path) {
            warn!(path = %path.display(), error = %err, "unable to write metrics textfile");
        }
    }
    result
}

async fn dispatch(lifecycle: &Lifecycle, command: Command, cancel: &CancellationToken) -> Result<()> {
    match command {
        Command::Init => {
            let version = lifecycle.init()?;
            println!("Running version {version}");
        }
        Command::Upgrade => render_transition(lifecycle.upgrade().await?),
        Command::Rollback => render_transition(lifecycle.rollback().await?),
        Command::Backup(args) => {
            lifecycle
                .backup(&args.file)
                .await
                .with_context(|| format!("backup into {}", args.file.display()))?;
            println!("Backup written to {}", args.file.display());
        }
        Command::Restore(args) => {
            lifecycle
                .restore(&args.file)
                .await
                .with_context(|| format!("restore from {}", args.file.display()))?;
            println!("Restored {}", args.file.display());
        }
        Command::Enable(args) => lifecycle.enable(args.role()).await?,
        Command::Disable(args) => lifecycle.disable(args.role(), cancel).await?,
        Command::Status { unit } => {
            let state = lifecycle.status(&unit).await?;
            println!("{state}");
        }
        Command::Promote(args) => {
            let request = PromotionRequest::from(args);
            match lifecycle.promote(&request, cancel).await? {
                PromotionOutcome::AlreadyMember => println!("Node is already a voting member"),
                PromotionOutcome::Promoted => println!("Promoted to member {}", request.name),
            }
        }
    }
    Ok(())
}

fn render_transition(outcome: TransitionOutcome) {
    match outcome {
        TransitionOutcome::ProxyMode => println!("Proxy mode enabled, nothing to do"),
        TransitionOutcome::Unchanged(record) => {
            println!("Version record unchanged (current {})", record.current)
        }
        TransitionOutcome::Applied { previous, record } => println!(
            "Version record updated: {} -> {}",
            previous.current, record.current
        ),
    }
}
