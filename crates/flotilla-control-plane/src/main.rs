use clap::{Parser, Subcommand};
use flotilla_control_plane::features::scaling::controller::render_ps;
use flotilla_control_plane::shared::config::Config;
use flotilla_control_plane::shared::types::{DependencyMode, ScaleCommand};
use flotilla_control_plane::ControlPlane;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "flotilla",
    about = "Flotilla - multi-service orchestrator",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project directory (default: FLOTILLA_PROJECT_DIRECTORY or the current directory)
    #[arg(long, global = true)]
    project_directory: Option<PathBuf>,
    /// Project file, relative to the project directory
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,
    /// Project name used to prefix container names
    #[arg(short = 'p', long, global = true)]
    project_name: Option<String>,
    /// Print Prometheus metrics to stderr when the command finishes
    #[arg(long, global = true)]
    metrics: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set the number of running instances of services
    Scale {
        /// Don't start linked services
        #[arg(long)]
        no_deps: bool,
        /// How dependencies of scaled services are handled:
        /// ensure-running or converge-to-default
        #[arg(long)]
        dependency_mode: Option<DependencyMode>,
        /// Per-operation runtime timeout in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,
        /// SERVICE=REPLICAS pairs
        #[arg(value_name = "SERVICE=REPLICAS", required = true)]
        entries: Vec<String>,
    },
    /// List the instances of services
    Ps {
        services: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    let mut config = Config::from_env()?;
    if let Some(directory) = cli.project_directory {
        config = config.with_project_directory(directory)?;
    }
    if let Some(file) = cli.file {
        config = config.with_project_file(file);
    }
    if let Some(name) = cli.project_name.as_deref() {
        config = config.with_project_name(name)?;
    }

    let exit = match cli.command {
        Commands::Scale {
            no_deps,
            dependency_mode,
            timeout,
            entries,
        } => {
            if let Some(secs) = timeout {
                config = config.with_operation_timeout(Duration::from_secs(secs));
            }
            let control_plane = ControlPlane::from_config(config)?;

            let mut command = ScaleCommand::new(entries);
            command.no_deps = no_deps;
            command.dependency_mode = dependency_mode;

            let cancel = CancellationToken::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, finishing in-flight operations");
                    on_interrupt.cancel();
                }
            });

            let exit = match control_plane.scaling().scale(command, cancel).await {
                Ok(response) => {
                    let report = control_plane.scaling().render(&response);
                    for line in &report.stdout {
                        println!("{line}");
                    }
                    for line in &report.stderr {
                        eprintln!("{line}");
                    }
                    if response.is_success() {
                        ExitCode::SUCCESS
                    } else {
                        ExitCode::FAILURE
                    }
                }
                Err(error) => {
                    eprintln!("Error: {}", error.message);
                    ExitCode::FAILURE
                }
            };
            print_metrics(&control_plane, cli.metrics);
            exit
        }
        Commands::Ps { services } => {
            let control_plane = ControlPlane::from_config(config)?;
            match control_plane.scaling().ps(&services).await {
                Ok(summaries) => {
                    for row in render_ps(&summaries) {
                        println!("{row}");
                    }
                    ExitCode::SUCCESS
                }
                Err(error) => {
                    eprintln!("Error: {}", error.message);
                    ExitCode::FAILURE
                }
            }
        }
    };

    info!("Done");
    Ok(exit)
}

fn print_metrics(control_plane: &ControlPlane, enabled: bool) {
    if !enabled {
        return;
    }
    match control_plane.observability().render_metrics() {
        Ok(rendered) => eprint!("{rendered}"),
        Err(error) => warn!(%error, "Failed to render metrics"),
    }
}
