//! cfgsyncd: the cluster configuration daemon.
//!
//! One binary for every role:
//! - `locator`: owns the configuration store and serves the locator API
//! - `member`: joins a locator, applies its configuration, accepts pushes
//! - `deploy`, `undeploy`, `import`, `export`, `members`, `leave`: operator
//!   commands against a running locator
//!
//! # Usage
//!
//! ```text
//! cfgsyncd --config sync.toml locator --port 7070
//! cfgsyncd member --groups group1,group2 --locator http://10.0.0.1:7070
//! cfgsyncd deploy --jar target/app.jar --group group1
//! cfgsyncd import --zip-file-name cluster_config.zip
//! cfgsyncd leave --member member-0123456789abcdef
//! ```

mod commands;
mod locator_mode;
mod member_mode;

use std::path::PathBuf;

use cfgsync_core::SyncConfig;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "cfgsyncd",
    about = "Cluster configuration distribution daemon",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to sync.toml. Command-line flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a locator holding the canonical cluster configuration.
    Locator {
        /// Port to serve the locator API on.
        #[arg(long)]
        port: Option<u16>,

        /// Parent directory of the `cluster_config` store.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Load the existing store from `--dir` before accepting joins.
        #[arg(long)]
        load_from_dir: bool,

        /// Acknowledgment timeout for pushed artifacts, e.g. `10s`.
        #[arg(long)]
        ack_timeout: Option<String>,
    },

    /// Run a member that receives configuration from a locator.
    Member {
        /// Comma-separated groups this member belongs to.
        #[arg(long)]
        groups: Option<String>,

        /// Locator API base URL.
        #[arg(long)]
        locator: Option<String>,

        /// Port to accept artifact pushes on.
        #[arg(long)]
        port: Option<u16>,

        /// Directory for installed artifacts.
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Address the locator should use to reach this member.
        #[arg(long)]
        advertise_address: Option<String>,

        /// Start without requesting cluster configuration.
        #[arg(long)]
        no_cluster_configuration: bool,
    },

    /// Deploy an artifact to the cluster or to one group.
    Deploy {
        /// Artifact file to deploy.
        #[arg(long)]
        jar: PathBuf,
        /// Target group (cluster-wide when omitted).
        #[arg(long)]
        group: Option<String>,
        /// Base name to deploy under (defaults to the file name).
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        locator: Option<String>,
    },

    /// Remove every version of an artifact.
    Undeploy {
        /// Base name of the artifact.
        #[arg(long)]
        jar: String,
        #[arg(long)]
        group: Option<String>,
        #[arg(long)]
        locator: Option<String>,
    },

    /// Replace the locator's configuration with a zip archive.
    Import {
        #[arg(long = "zip-file-name")]
        zip_file_name: PathBuf,
        #[arg(long)]
        locator: Option<String>,
    },

    /// Save the locator's configuration as a zip archive.
    Export {
        #[arg(long = "zip-file-name")]
        zip_file_name: PathBuf,
        #[arg(long)]
        locator: Option<String>,
    },

    /// List member sessions known to the locator.
    Members {
        #[arg(long)]
        locator: Option<String>,
    },

    /// Drop a member session, e.g. one left behind by a crashed member.
    Leave {
        /// Member id as shown by `members`.
        #[arg(long)]
        member: String,
        #[arg(long)]
        locator: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,cfgsync=debug")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::default(),
    };
    let default_locator = config.member.locator.clone();
    let locator_url = |flag: Option<String>| flag.unwrap_or_else(|| default_locator.clone());

    match cli.command {
        Command::Locator {
            port,
            dir,
            load_from_dir,
            ack_timeout,
        } => {
            let locator = &mut config.locator;
            if let Some(port) = port {
                locator.port = port;
            }
            if let Some(dir) = dir {
                locator.cluster_configuration_dir = dir;
            }
            if let Some(ack_timeout) = ack_timeout {
                locator.member_ack_timeout = ack_timeout;
            }
            locator.load_cluster_configuration_from_dir |= load_from_dir;
            locator_mode::run_locator(config.locator).await
        }
        Command::Member {
            groups,
            locator,
            port,
            work_dir,
            advertise_address,
            no_cluster_configuration,
        } => {
            let member = &mut config.member;
            if let Some(groups) = groups {
                member.groups = groups;
            }
            if let Some(locator) = locator {
                member.locator = locator;
            }
            if let Some(port) = port {
                member.port = port;
            }
            if let Some(work_dir) = work_dir {
                member.work_dir = work_dir;
            }
            if let Some(advertise_address) = advertise_address {
                member.advertise_address = advertise_address;
            }
            if no_cluster_configuration {
                member.use_cluster_configuration = false;
            }
            member_mode::run_member(config.member).await
        }
        Command::Deploy {
            jar,
            group,
            name,
            locator,
        } => commands::deploy(&locator_url(locator), &jar, group.as_deref(), name.as_deref()).await,
        Command::Undeploy {
            jar,
            group,
            locator,
        } => commands::undeploy(&locator_url(locator), &jar, group.as_deref()).await,
        Command::Import {
            zip_file_name,
            locator,
        } => commands::import(&locator_url(locator), &zip_file_name).await,
        Command::Export {
            zip_file_name,
            locator,
        } => commands::export(&locator_url(locator), &zip_file_name).await,
        Command::Members { locator } => commands::members(&locator_url(locator)).await,
        Command::Leave { member, locator } => commands::leave(&locator_url(locator), &member).await,
    }
}

/// Resolves when the process receives Ctrl-C.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
