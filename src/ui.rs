// UI layer: an interactive menu built on `dialoguer`. Each entry is a small
// synchronous flow that prompts, calls into the library and reports the
// outcome. Settings are saved as soon as they change.

use crate::config::{AppConfig, ConnectorConfig};
use crate::operations::{self, Connector, Params};
use crate::platform::PlatformClient;
use anyhow::Result;
use crossterm::style::{style, Stylize};
use dialoguer::{Confirm, Input, Password, Select};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;

/// Main interactive menu. Loads the config from `config_path` and runs a
/// select loop until the user chooses "Exit".
pub fn main_menu(config_path: &Path) -> Result<()> {
    let mut config = AppConfig::load(config_path)?;
    loop {
        let items = vec![
            "Configure QRadar connection",
            "Configure incident platform",
            "Check QRadar health",
            "Run operation",
            "Forward offense",
            "Exit",
        ];
        let selection = Select::new().items(&items).default(0).interact()?;
        match selection {
            0 => {
                handle_configure_qradar(&mut config)?;
                config.save(config_path)?;
                success("Configurations have been saved.");
            }
            1 => {
                handle_configure_platform(&mut config)?;
                config.save(config_path)?;
                success("Configurations have been saved.");
            }
            2 => handle_health(&config),
            3 => handle_run(&config)?,
            4 => handle_forward(&config)?,
            5 => break,
            _ => {}
        }
    }
    Ok(())
}

/// Prompt for the QRadar address, token, TLS flag and API version. A blank
/// token keeps the stored one.
fn handle_configure_qradar(config: &mut AppConfig) -> Result<()> {
    let current = config.qradar.clone();
    let address: String = Input::new()
        .with_prompt("QRadar address")
        .with_initial_text(current.as_ref().map(|c| c.address.clone()).unwrap_or_default())
        .interact_text()?;
    let token = Password::new()
        .with_prompt("Authorized service token (blank keeps current)")
        .allow_empty_password(true)
        .interact()?;
    let token = match (token.trim().is_empty(), &current) {
        (true, Some(c)) => c.token.clone(),
        _ => token.trim().to_string(),
    };
    let verify_ssl = Confirm::new()
        .with_prompt("Verify TLS certificates?")
        .default(current.as_ref().map(|c| c.verify_ssl).unwrap_or(true))
        .interact()?;
    let api_version: String = Input::new()
        .with_prompt("API version")
        .default(
            current
                .as_ref()
                .map(|c| c.api_version.clone())
                .unwrap_or_else(|| "6.0".into()),
        )
        .interact_text()?;

    let mut qradar = ConnectorConfig::new(address.trim(), token);
    qradar.verify_ssl = verify_ssl;
    qradar.api_version = api_version;
    config.qradar = Some(qradar);
    Ok(())
}

/// Only non-blank answers overwrite the stored platform settings.
fn handle_configure_platform(config: &mut AppConfig) -> Result<()> {
    let url: String = Input::new()
        .with_prompt(format!(
            "Incident platform server [{}]",
            config.platform.cyops_url
        ))
        .allow_empty(true)
        .interact_text()?;
    let username: String = Input::new()
        .with_prompt(format!("Username [{}]", config.platform.username))
        .allow_empty(true)
        .interact_text()?;
    let password = Password::new()
        .with_prompt("Password (blank keeps current)")
        .allow_empty_password(true)
        .interact()?;
    let verify_ssl = Confirm::new()
        .with_prompt("Verify the platform's TLS certificate?")
        .default(config.platform.verify_ssl)
        .interact()?;
    config.platform.apply_form([
        ("cyops_url", url),
        ("username", username),
        ("password", password),
        ("verify_ssl", verify_ssl.to_string()),
    ]);
    Ok(())
}

fn handle_health(config: &AppConfig) {
    let Some(qradar) = config.qradar.clone() else {
        failure("Configure the QRadar connection first.");
        return;
    };
    let spinner = spinner("Checking QRadar...");
    let outcome = Connector::new(qradar).check_health();
    spinner.finish_and_clear();
    match outcome {
        Ok(()) => success("QRadar connection is healthy."),
        Err(e) => failure(&format!("Health check failed: {}", e)),
    }
}

/// Pick an operation, read its parameters as JSON and print the result.
fn handle_run(config: &AppConfig) -> Result<()> {
    let Some(qradar) = config.qradar.clone() else {
        failure("Configure the QRadar connection first.");
        return Ok(());
    };
    let names: Vec<&str> = operations::operation_names().collect();
    let operation = names[Select::new().items(&names).default(0).interact()?];
    let raw: String = Input::new()
        .with_prompt("Parameters (JSON object)")
        .default("{}".into())
        .interact_text()?;
    let params: Params = match serde_json::from_str(&raw) {
        Ok(params) => params,
        Err(e) => {
            failure(&format!("Parameters must be a JSON object: {}", e));
            return Ok(());
        }
    };

    let spinner = spinner(&format!("Running {}...", operation));
    let progress = spinner.clone();
    let connector = Connector::new(qradar).on_search_poll(move |status, waited| {
        progress.set_message(format!("Search {} ({}s elapsed)", status, waited.as_secs()));
    });
    let outcome = connector.execute(operation, &params);
    spinner.finish_and_clear();

    match outcome {
        Ok(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        Err(e) => failure(&format!("{} failed: {}", operation, e)),
    }
    Ok(())
}

fn handle_forward(config: &AppConfig) -> Result<()> {
    let offense_id: String = Input::new().with_prompt("Offense ID").interact_text()?;
    let client = match PlatformClient::new(&config.platform) {
        Ok(client) => client,
        Err(e) => {
            failure(&e.to_string());
            return Ok(());
        }
    };
    let spinner = spinner("Forwarding offense...");
    let outcome = client.send_offense_id(offense_id.trim());
    spinner.finish_and_clear();
    match outcome {
        Ok(message) => success(&message),
        Err(e) => failure(&format!("Forward failed: {}", e)),
    }
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

fn success(message: &str) {
    println!("{}", style(message).green());
}

fn failure(message: &str) {
    println!("{}", style(message).red());
}
