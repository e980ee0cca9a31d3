//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "binary"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Node-local CLI for the metadata store lifecycle."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{ArgAction, CommandFactory, Parser};
use mstore_common::{init_tracing, LifecycleConfig};
use mstore_versioning::BuildInfo;
use tokio::runtime::Builder;
use tracing::info;

mod commands;

use commands::Command;

const DEFAULT_CONFIG: &str = "/etc/mstore/mstore.toml";

#[derive(Debug, Parser)]
#[command(
    name = "mstorectl",
    author,
    disable_version_flag = true,
    about = "Metadata store lifecycle manager for this node",
    long_about = None
)]
struct Cli {
    #[arg(long, global = true, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(
        short = 'V',
        long = "version",
        action = ArgAction::SetTrue,
        help = "Print extended version information and exit"
    )]
    version: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    if cli.version {
        println!("{}", BuildInfo::current().extended());
        return Ok(());
    }
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(());
    };

    let config = load_config(cli.config.as_deref())?;
    init_tracing("mstorectl", &config.logging)?;
    info!(build = %BuildInfo::current().banner(), "starting");

    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(commands::run(command, config))
}

fn load_config(explicit: Option<&Path>) -> Result<LifecycleConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));
    Ok(LifecycleConfig::load(&candidates)?)
}
