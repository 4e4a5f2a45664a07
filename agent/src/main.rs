//! piped - Entry Point
//!
//! Runs the deployment agent against a control plane using the configuration
//! given on the command line.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, warn};

use piped::app::options::{AppOptions, ControlPlaneOptions, LifecycleOptions, StorageOptions};
use piped::app::run::run;
use piped::logs::{init_logging, LogLevel, LogOptions};
use piped::storage::layout::StorageLayout;
use piped::storage::source::ConfigSource;
use piped::utils::version_info;

/// A continuous deployment agent running inside the deployment target network
#[derive(Parser)]
#[command(name = "piped", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start running piped
    Start(StartArgs),

    /// Print build information
    Version,
}

#[derive(Args, Debug)]
struct StartArgs {
    /// Path to the piped configuration file
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Base64 encoded piped configuration
    #[arg(long, env = "PIPED_CONFIG_DATA")]
    config_data: Option<String>,

    /// Name of a GCP secret holding the configuration
    #[arg(long)]
    config_gcp_secret: Option<String>,

    /// Name of an AWS secret holding the configuration
    #[arg(long)]
    config_aws_secret: Option<String>,

    /// Connect to the control plane without TLS
    #[arg(long)]
    insecure: bool,

    /// PEM certificate trusted for the control plane connection
    #[arg(long)]
    cert_file: Option<PathBuf>,

    /// Port of the admin server
    #[arg(long, default_value_t = 9085)]
    admin_port: u16,

    /// Port of the service plugins call back into
    #[arg(long, default_value_t = 9087)]
    plugin_service_port: u16,

    /// Directory installed tools are kept in
    #[arg(long)]
    tools_dir: Option<PathBuf>,

    /// Directory downloaded plugins are kept in
    #[arg(long)]
    plugins_dir: Option<PathBuf>,

    /// Root of the working directories
    #[arg(long)]
    workspace_dir: Option<PathBuf>,

    /// How long in-flight work gets to finish on shutdown
    #[arg(long, value_parser = humantime::parse_duration, default_value = "30s")]
    grace_period: Duration,

    /// Overrides the log level of the configuration
    #[arg(long)]
    log_level: Option<LogLevel>,

    /// Write logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Version => match serde_json::to_string_pretty(&version_info()) {
            Ok(v) => {
                println!("{}", v);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to print version: {}", e);
                ExitCode::FAILURE
            }
        },
        Commands::Start(args) => match start(args).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("piped exited with error: {:#}", e);
                eprintln!("piped exited with error: {:#}", e);
                ExitCode::FAILURE
            }
        },
    }
}

async fn start(args: StartArgs) -> anyhow::Result<()> {
    let source = ConfigSource::select(
        args.config_file.clone(),
        args.config_data.clone(),
        args.config_gcp_secret.clone(),
        args.config_aws_secret.clone(),
    )?;
    let spec = source.load().await.context("failed to load piped configuration")?;
    spec.validate().context("invalid piped configuration")?;

    let mut layout = StorageLayout::default();
    if let Some(dir) = args.workspace_dir {
        layout.workspace_dir = dir;
    }
    layout.tools_dir = args.tools_dir;
    layout.plugins_dir = args.plugins_dir;

    // Hold the guard so buffered log lines are flushed on exit
    let _log_guard = init_logging(LogOptions {
        log_level: args.log_level.unwrap_or(spec.log_level),
        stdout: true,
        log_dir: Some(layout.logs_dir().path().to_path_buf()),
        json_format: args.log_json || spec.log_format.eq_ignore_ascii_case("json"),
    })
    .context("failed to initialize logging")?;

    let mut options = AppOptions {
        lifecycle: LifecycleOptions {
            max_shutdown_delay: args.grace_period * 2,
        },
        storage: StorageOptions { layout },
        control_plane: ControlPlaneOptions {
            insecure: args.insecure,
            cert_file: args.cert_file,
        },
        plugin_grace_period: args.grace_period,
        ..Default::default()
    };
    options.admin_server.port = args.admin_port;
    options.plugin_service.port = args.plugin_service_port;

    let version = version_info();
    info!(version = %version.version, git_hash = %version.git_hash, "Starting piped");
    match spec.redacted() {
        Ok(config) => info!("Loaded configuration:\n{}", config),
        Err(e) => warn!("Failed to render the configuration: {}", e),
    }
    run(version.version, spec, options, await_shutdown_signal()).await?;
    Ok(())
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
