//! lbimage - install, enable and prune load balancer images
//!
//! Main entry point: parses the operation, sets up logging, builds the
//! registry client from the environment and hands off to the lifecycle
//! manager. This is the only place that decides the exit status.

use anyhow::{Context, Result};
use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use lbimage_core::{
    Euca2oolsClient, LbImageConfig, LifecycleManager, RegistryConfig, RemovalOptions,
    RemovalScope,
};

mod render;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "lbimage",
    about = "Install, enable and remove load balancer images in the cloud image registry",
    version
)]
struct Cli {
    #[clap(flatten)]
    operation: OperationArgs,

    /// Also remove versions that contain the enabled image
    #[clap(long)]
    force: bool,

    /// Show what would be removed without removing it
    #[clap(long)]
    dry_run: bool,

    /// Print results as JSON
    #[clap(long)]
    json: bool,

    /// Configuration file (defaults to lbimage.yaml in the user config dir)
    #[clap(long)]
    config: Option<PathBuf>,

    /// Set log level
    #[clap(long, default_value = "info")]
    log_level: LogLevel,

    /// Emit logs as JSON
    #[clap(long)]
    log_json: bool,
}

/// Exactly one operation per invocation
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct OperationArgs {
    /// Install and enable the load balancer image from a tarball
    #[clap(short = 't', long, value_name = "TGZ")]
    install_image: Option<PathBuf>,

    /// Install and enable the image shipped with the package
    #[clap(long)]
    install_default: bool,

    /// List installed load balancer images
    #[clap(short, long)]
    list: bool,

    /// Remove every version except the newest
    #[clap(long)]
    remove_old: bool,

    /// Remove every version
    #[clap(long)]
    remove_all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Operation {
    Install(Option<PathBuf>),
    List,
    Remove(RemovalScope),
}

impl OperationArgs {
    fn selected(&self) -> Operation {
        if let Some(path) = &self.install_image {
            Operation::Install(Some(path.clone()))
        } else if self.install_default {
            Operation::Install(None)
        } else if self.list {
            Operation::List
        } else if self.remove_old {
            Operation::Remove(RemovalScope::Old)
        } else {
            Operation::Remove(RemovalScope::All)
        }
    }
}

/// Initialize tracing with CLI flags
fn initialize_tracing(log_level: &LogLevel, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_filter_directive()));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr) // stdout is reserved for results
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    initialize_tracing(&cli.log_level, cli.log_json);

    let operation = cli.operation.selected();
    debug!("Selected operation: {:?}", operation);

    tokio::select! {
        result = run(&cli, operation) => result,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("Interrupted; the registry is left as the last completed step produced it");
            anyhow::bail!("interrupted")
        }
    }
}

async fn run(cli: &Cli, operation: Operation) -> Result<()> {
    let config = LbImageConfig::load(cli.config.as_deref())?;
    let registry = RegistryConfig::from_env()?;
    let client = Euca2oolsClient::new(&registry, &config.tools)?;

    let manager = LifecycleManager::new(client, config.appliance)
        .await
        .context("Failed to read installed load balancer images")?;

    match operation {
        Operation::Install(tarball) => {
            let tarball = tarball.unwrap_or_else(|| manager.settings().default_tarball.clone());
            install_command(&manager, tarball, cli.json).await
        }
        Operation::List => list_command(&manager, cli.json).await,
        Operation::Remove(scope) => {
            let options = RemovalOptions {
                force: cli.force,
                dry_run: cli.dry_run,
            };
            remove_command(&manager, scope, options, cli.json).await
        }
    }
}

async fn install_command(
    manager: &LifecycleManager<Euca2oolsClient>,
    tarball: PathBuf,
    json: bool,
) -> Result<()> {
    if !tarball.is_file() {
        anyhow::bail!("Image tarball not found: {}", tarball.display());
    }

    let outcome = manager.install_and_enable(&tarball).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        render::print_install(&outcome);
    }
    Ok(())
}

async fn list_command(manager: &LifecycleManager<Euca2oolsClient>, json: bool) -> Result<()> {
    let inventory = manager.inventory().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&inventory)?);
    } else {
        render::print_inventory(&inventory);
    }
    Ok(())
}

async fn remove_command(
    manager: &LifecycleManager<Euca2oolsClient>,
    scope: RemovalScope,
    options: RemovalOptions,
    json: bool,
) -> Result<()> {
    let report = manager.remove(scope, options).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        render::print_removal(&report, options.dry_run);
    }

    if !report.is_success() {
        anyhow::bail!(
            "{} image(s) could not be removed",
            report.failures.len()
        );
    }
    Ok(())
}
