//! Config command - configuration utilities.

use anyhow::Result;
use std::path::{Path, PathBuf};

use crate::cli::{load_config, ConfigAction};
use crate::config;
use crate::types::TestType;

/// Run the config command.
pub async fn run(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Validate => validate_config(config_path),
        ConfigAction::Show => show_config(config_path),
        ConfigAction::Path => {
            println!("{}", resolve_path(config_path).display());
            Ok(())
        }
    }
}

fn resolve_path(config_path: Option<&Path>) -> PathBuf {
    config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(config::paths::config_file)
}

fn validate_config(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_path(config_path);

    println!();
    println!("Validating configuration...");
    println!("Path: {}", path.display());
    println!();

    if !path.exists() {
        println!("No configuration file; built-in defaults apply.");
        println!();
        println!("Create one at:");
        println!("  {}", path.display());
        println!();
        println!("Or specify a custom path with --config");
        println!();
        return Ok(());
    }

    match load_config(Some(&path)) {
        Ok(config) => {
            println!("Configuration is valid.");
            println!();
            println!("Summary:");
            println!("  Workstation: {}", config.agent.resolved_workstation_id());
            println!("  Backend endpoint: {}", config.backend.endpoint);
            println!(
                "  API token: {}",
                if config.backend.api_token.is_some() {
                    "configured"
                } else {
                    "(not configured)"
                }
            );
            println!("  Strict parsing: {}", config.ingest.strict);
            println!("  Leakage unit: {}", config.ingest.leakage_unit);
            println!("  Tolerances:");
            for test in TestType::ALL {
                let marker = if config.tolerances.contains_key(test.slug()) {
                    " (override)"
                } else {
                    ""
                };
                println!(
                    "    {:<34} {}{}",
                    test.slug(),
                    config.tolerance_for(test),
                    marker
                );
            }
        }
        Err(e) => {
            println!("ERROR: Configuration is invalid");
            println!();
            println!("Details: {:#}", e);
            println!();
            println!("Fix the configuration and run 'qaingest config validate' again.");
            println!();
            anyhow::bail!("invalid configuration");
        }
    }

    println!();
    Ok(())
}

/// Print the effective configuration, defaults included, with the token masked.
fn show_config(config_path: Option<&Path>) -> Result<()> {
    let mut config = load_config(config_path)?;
    if config.backend.api_token.is_some() {
        config.backend.api_token = Some("********".to_string());
    }

    println!("# {}", config.path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
