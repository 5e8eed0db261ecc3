// Entrypoint for the connector CLI.
// - Without a subcommand it opens the interactive menu (`ui::main_menu`).
// - `run`, `health` and `forward` are scriptable and print JSON on stdout.
// - Logs go to stderr, filtered by `RUST_LOG` (default `warn`).

use anyhow::Context;
use clap::{Parser, Subcommand};
use qradar_connector::config::AppConfig;
use qradar_connector::operations::{self, Connector, Params};
use qradar_connector::platform::PlatformClient;
use qradar_connector::ui::main_menu;
use serde_json::json;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "qradar-connector", version)]
#[command(about = "QRadar connector and offense forwarding bridge", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(long, global = true, env = "QRADAR_CONNECTOR_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Open the interactive menu (default)
    Menu,
    /// List the available operations
    Operations,
    /// Run an operation against QRadar
    Run {
        operation: String,
        /// JSON object, or @path to read it from a file
        #[arg(long, short, default_value = "{}")]
        params: String,
    },
    /// Check the QRadar connection
    Health,
    /// Forward an offense id to the incident platform
    Forward { offense_id: String },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(AppConfig::default_path);

    match cli.command.unwrap_or(Commands::Menu) {
        Commands::Menu => main_menu(&config_path)?,
        Commands::Operations => {
            for name in operations::operation_names() {
                println!("{}", name);
            }
        }
        Commands::Run { operation, params } => {
            let config = AppConfig::load(&config_path)?;
            let params = read_params(&params)?;
            let connector = Connector::new(config.qradar()?.clone());
            let value = connector
                .execute(&operation, &params)
                .with_context(|| format!("Operation {} failed", operation))?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        Commands::Health => {
            let config = AppConfig::load(&config_path)?;
            Connector::new(config.qradar()?.clone())
                .check_health()
                .context("QRadar health check failed")?;
            println!("{}", json!({ "healthy": true }));
        }
        Commands::Forward { offense_id } => {
            let config = AppConfig::load(&config_path)?;
            let client = PlatformClient::new(&config.platform)?;
            let message = client.send_offense_id(&offense_id)?;
            println!("{}", json!({ "message": message }));
        }
    }
    Ok(())
}

/// Parse `--params`: inline JSON, or `@file` holding JSON.
fn read_params(raw: &str) -> anyhow::Result<Params> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read parameters from {}", path))?,
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Parameters must be a JSON object")
}
