use clap::Subcommand;
use relay_core::config::AppConfig;
use std::path::Path;

use super::utils::{print_error, print_info, print_success, CliError, CliResult};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long, default_value = "config/relay.toml")]
        file: String,
    },

    /// Show the effective configuration (file plus RELAY__* overrides)
    Show {
        /// Path to config file
        #[arg(short, long, default_value = "config/relay.toml")]
        file: String,
    },

    /// Write the default configuration to a file
    Generate {
        /// Output path for the config file
        #[arg(short, long, default_value = "config/relay.toml")]
        output: String,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_config_command(command: ConfigCommands) -> CliResult<()> {
    match command {
        ConfigCommands::Validate { file } => validate_config(&file),
        ConfigCommands::Show { file } => show_config(&file),
        ConfigCommands::Generate { output, force } => generate_config(&output, force),
    }
}

fn validate_config(file: &str) -> CliResult<()> {
    if !Path::new(file).exists() {
        print_error(&format!("Configuration file not found: {file}"));
        return Err(CliError::Config(format!("File not found: {file}")));
    }

    print_info(&format!("Loading configuration from {file}..."));
    let config = AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;

    print_info("Validating configuration...");
    config.validate().map_err(CliError::Config)?;

    print_success("Configuration is valid!");

    println!("Configuration Summary:");
    println!("  Sessions per endpoint: {}", config.session.sessions_per_endpoint);
    match config.session.provider_failure_threshold {
        Some(threshold) => println!("  Provider failure threshold: {threshold}"),
        None => println!("  Provider failure threshold: disabled"),
    }
    println!(
        "  Health checks: {}",
        if config.health_check.enabled { "enabled" } else { "disabled" }
    );
    println!("  Metrics: {}", if config.metrics.enabled { "enabled" } else { "disabled" });

    Ok(())
}

fn show_config(file: &str) -> CliResult<()> {
    let config = AppConfig::from_file(file).map_err(|e| CliError::Config(e.to_string()))?;

    println!("Configuration from {file}:");

    println!("\n[Session]");
    println!("  Sessions Per Endpoint: {}", config.session.sessions_per_endpoint);
    println!("  Provider Failure Threshold: {:?}", config.session.provider_failure_threshold);

    println!("\n[Health Check]");
    println!("  Enabled: {}", config.health_check.enabled);
    println!("  Interval: {}s", config.health_check.interval_seconds);
    println!("  Probe Timeout: {}ms", config.health_check.probe_timeout_ms);

    println!("\n[Metrics]");
    println!("  Enabled: {}", config.metrics.enabled);

    println!("\n[Logging]");
    println!("  Level: {}", config.logging.level);
    println!("  Format: {}", config.logging.format);

    Ok(())
}

fn generate_config(output: &str, force: bool) -> CliResult<()> {
    if Path::new(output).exists() && !force {
        return Err(CliError::Config(format!(
            "File {output} already exists. Use --force to overwrite."
        )));
    }

    let rendered = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| CliError::Config(e.to_string()))?;
    let sample = format!("# Consumer session manager configuration\n\n{rendered}");

    if let Some(parent) = Path::new(output).parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(output, sample)?;

    print_success(&format!("Default configuration generated: {output}"));
    print_info("Environment variables such as RELAY__SESSION__SESSIONS_PER_ENDPOINT override it");

    Ok(())
}
