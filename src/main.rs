use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use printfleet::cli::{Cli, Command};
use printfleet::config::FleetConfig;
use printfleet::fleet;
use printfleet::state_machine::Filament;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "printfleet=debug"
    } else {
        "printfleet=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = FleetConfig::load(cli.config.as_deref())?;

    match cli.command {
        Command::Run => fleet::run(&config).await,
        Command::Probe => fleet::probe(&config).await,
        Command::AddJob {
            filename,
            color,
            material,
            process,
            time,
        } => {
            let filament = Filament {
                color,
                material,
                process,
            };
            let job = fleet::single_file_job(&filename, filament, time);
            fleet::add_job(&config.jobs_file, job).await.map(|_| ())
        }
    }
}
