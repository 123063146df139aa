//! Configuration file handling for the homesync CLI.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use homesync_client::HubConfig;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE: &str = "config.toml";

/// Get the default configuration file path.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("io", "homecast", "homesync")
        .context("Could not determine home directory")?;
    Ok(dirs.config_dir().join(CONFIG_FILE))
}

/// Load configuration, falling back to defaults when the file is absent.
pub async fn load(path: &Path) -> Result<HubConfig> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Ok(HubConfig::default());
    }
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("Invalid configuration in {}", path.display()))
}

/// Save configuration. The file may hold a token, so it is owner-only.
pub async fn save(config: &HubConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create config directory")?;
        set_dir_permissions_0700(parent).await?;
    }
    let contents = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    tokio::fs::write(path, contents)
        .await
        .context("Failed to save configuration")?;
    set_file_permissions_0600(path).await?;
    Ok(())
}

/// Apply command-line overrides on top of the file.
pub fn apply_overrides(config: &mut HubConfig, endpoint: Option<String>, token: Option<String>) {
    if let Some(endpoint) = endpoint {
        config.connection.endpoint = endpoint;
    }
    if let Some(token) = token {
        config.connection.token = Some(token);
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .await
            .context("Failed to set file permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load(&dir.path().join(CONFIG_FILE)).await.unwrap();
        assert_eq!(config.connection.endpoint, "ws://localhost:8090/ws");
        assert!(config.connection.token.is_none());
    }

    #[tokio::test]
    async fn save_then_load_keeps_settings() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join(CONFIG_FILE);
        let mut config = HubConfig::default();
        config.connection.endpoint = "wss://hub.example.com/ws".into();
        config.batch.debounce_ms = 250;

        save(&config, &path).await.unwrap();
        let loaded = load(&path).await.unwrap();

        assert_eq!(loaded.connection.endpoint, "wss://hub.example.com/ws");
        assert_eq!(loaded.batch.debounce_ms, 250);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "[connection\nendpoint = ").await.unwrap();

        assert!(load(&path).await.is_err());
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = HubConfig::default();
        apply_overrides(&mut config, Some("ws://10.0.0.2:8090/ws".into()), None);
        assert_eq!(config.connection.endpoint, "ws://10.0.0.2:8090/ws");
        assert!(config.connection.token.is_none());

        apply_overrides(&mut config, None, Some("tok".into()));
        assert_eq!(config.connection.endpoint, "ws://10.0.0.2:8090/ws");
        assert_eq!(config.connection.token.as_deref(), Some("tok"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn config_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = HubConfig::default();
        config.connection.token = Some("secret".into());
        save(&config, &path).await.unwrap();

        let perms = tokio::fs::metadata(&path).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }
}
