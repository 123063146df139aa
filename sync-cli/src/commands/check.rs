//! Validate and print the effective configuration.

use anyhow::Result;
use std::path::Path;

use homesync_client::HubConfig;

/// Run the check-config command.
pub fn run(path: &Path, config: &HubConfig) -> Result<()> {
    config.validate()?;

    println!("=== homesync configuration ===");
    println!();
    println!("File: {}", path.display());
    println!();
    println!("Connection:");
    println!("  Endpoint:      {}", config.connection.endpoint);
    println!(
        "  Token:         {}",
        if config.connection.token.is_some() { "set" } else { "not set" }
    );
    println!("  Ping interval: {}s", config.connection.ping_interval_secs);
    println!(
        "  Backoff:       {}ms doubling to {}ms, {} attempts",
        config.connection.reconnect_base_ms,
        config.connection.reconnect_cap_ms,
        config.connection.max_reconnect_attempts
    );
    println!();
    println!("Echo suppression:");
    println!("  Mark TTL:      {}ms", config.echo.ttl_ms);
    println!("  Window:        {}ms", config.echo.suppress_window_ms);
    println!();
    println!("Cache batching:  {}ms debounce", config.batch.debounce_ms);
    println!("Write timeout:   {}s", config.writes.timeout_secs);
    println!();
    println!("OK");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        assert!(run(Path::new("config.toml"), &HubConfig::default()).is_ok());
    }

    #[test]
    fn invalid_window_fails() {
        let mut config = HubConfig::default();
        config.echo.suppress_window_ms = config.echo.ttl_ms;
        assert!(run(Path::new("config.toml"), &config).is_err());
    }
}
