use anyhow::Context;
use clap::{Parser, Subcommand};
use relay_core::config::AppConfig;

mod commands;
mod logging;

use commands::{
    handle_config_command, handle_spec_command, run_simulation, ConfigCommands, SimulateArgs,
    SpecCommands,
};

#[derive(Parser)]
#[command(name = "relay-cli")]
#[command(about = "Relay CLI - Operator tooling for the consumer session manager")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (falls back to RELAY_CONFIG, then config/relay.toml)
    #[arg(long, global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a pairing schedule against a simulated relay workload
    Simulate(SimulateArgs),

    /// Configuration Management
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Spec governance proposals
    #[command(subcommand)]
    Spec(SpecCommands),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;
    logging::init_logging(&config);

    match cli.command {
        Commands::Simulate(args) => {
            config.validate().map_err(anyhow::Error::msg)?;
            run_simulation(args, &config).await?;
        }

        Commands::Config(config_command) => {
            handle_config_command(config_command)?;
        }

        Commands::Spec(spec_command) => {
            handle_spec_command(spec_command)?;
        }
    }

    Ok(())
}
