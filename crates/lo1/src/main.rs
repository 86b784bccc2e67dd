use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use lo1_config::ServiceMode;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "lo1")]
#[command(about = "Local multi-service development orchestrator")]
#[command(version)]
struct Cli {
    /// Manifest path, relative to the workspace directory
    #[arg(short, long, global = true, default_value = "lo1.yaml")]
    config: PathBuf,

    /// Workspace directory
    #[arg(short, long, global = true, default_value = ".")]
    workspace: PathBuf,

    /// Emit machine-readable JSON instead of formatted output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone the repositories listed in the manifest
    Init {
        /// Abort on the first clone failure
        #[arg(long)]
        fail_fast: bool,
    },

    /// Bring the workspace up
    Up {
        /// Start only these services (and their dependencies)
        #[arg(long, value_delimiter = ',')]
        services: Option<Vec<String>>,

        /// Force every service into this mode
        #[arg(long)]
        mode: Option<ModeArg>,

        /// Return once the workspace is ready instead of staying attached
        #[arg(short, long)]
        detach: bool,

        /// On Ctrl-C, exit without tearing the workspace down
        #[arg(long)]
        skip_teardown: bool,

        /// On teardown, also remove volumes and orphan containers
        #[arg(long)]
        clean: bool,
    },

    /// Tear the workspace down
    Down {
        /// Also remove volumes and orphan containers
        #[arg(long)]
        clean: bool,
    },

    /// Show the state of the current workspace
    Status,

    /// Manage the workspace's hosts-file block
    Hosts {
        /// Write the block into the system hosts file
        #[arg(long)]
        apply: bool,

        /// Remove the block from the system hosts file
        #[arg(long)]
        remove: bool,
    },

    /// Install the proxy's root certificate into the host trust store
    TlsSetup,

    /// Show captured service logs
    Logs {
        /// Service to show; all services when omitted
        service: Option<String>,

        /// List services with captured logs
        #[arg(long)]
        list: bool,
    },
}

/// Service mode override for `up --mode`
#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Dev,
    Container,
    Skip,
}

impl From<ModeArg> for ServiceMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Dev => ServiceMode::Dev,
            ModeArg::Container => ServiceMode::Container,
            ModeArg::Skip => ServiceMode::Skip,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LO1_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let json = cli.json;

    let outcome = smol::block_on(run(cli));
    if let Err(error) = outcome {
        if json {
            println!("{}", output::error_json(&error));
        } else {
            eprintln!("{} {}", "error:".red().bold(), error);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let workspace = cli.workspace.clone();
    let config_path = workspace.join(&cli.config);

    match cli.command {
        Commands::Init { fail_fast } => {
            commands::init::run(&workspace, &config_path, fail_fast).await
        }
        Commands::Up {
            services,
            mode,
            detach,
            skip_teardown,
            clean,
        } => {
            commands::up::run(
                &workspace,
                &config_path,
                cli.json,
                commands::up::UpArgs {
                    services,
                    mode: mode.map(Into::into),
                    detach,
                    skip_teardown,
                    clean,
                },
            )
            .await
        }
        Commands::Down { clean } => {
            commands::down::run(&workspace, &config_path, cli.json, clean).await
        }
        Commands::Status => commands::status::run(&workspace, cli.json).await,
        Commands::Hosts { apply, remove } => {
            commands::hosts::run(&workspace, &config_path, apply, remove).await
        }
        Commands::TlsSetup => commands::tls::run(&workspace, &config_path).await,
        Commands::Logs { service, list } => commands::logs::run(&workspace, service, list).await,
    }
}
