//! Write a starter configuration file.

use anyhow::Result;
use std::path::Path;

use homesync_client::HubConfig;

use crate::config;

/// Run the init command.
pub async fn run(
    path: &Path,
    endpoint: Option<String>,
    token: Option<String>,
    force: bool,
) -> Result<()> {
    if !force && tokio::fs::try_exists(path).await.unwrap_or(false) {
        anyhow::bail!(
            "Configuration already exists at {}. Use --force to overwrite.",
            path.display()
        );
    }

    let mut hub = HubConfig::default();
    config::apply_overrides(&mut hub, endpoint, token);
    hub.validate()?;
    config::save(&hub, path).await?;

    println!("Configuration written!");
    println!();
    println!("  Path:     {}", path.display());
    println!("  Endpoint: {}", hub.connection.endpoint);
    println!(
        "  Token:    {}",
        if hub.connection.token.is_some() { "stored" } else { "not set" }
    );
    println!();
    println!("Next steps:");
    println!("  1. Check it: homesync check-config");
    println!("  2. Watch live updates: homesync watch");

    Ok(())
}
