//! Configuration handling for the router daemon

use crate::vpn::mode::DEFAULT_MODE_FILE;
use crate::vpn::restore::RestorePolicy;
use crate::vpn::routing::RoutingSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/tailscale-router.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
    /// Directory holding index.html, login.html and the static assets
    pub web_root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub mode_file: PathBuf,
    pub vpn_interface: String,
    pub fallback_wan_interface: String,
    pub direct_probe_address: String,
    pub command_timeout_secs: u64,
    pub conntrack_tcp_established_secs: u32,
    pub conntrack_udp_stream_secs: u32,
    pub restore_attempts: u32,
    pub restore_interval_ms: u64,
    pub background_workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".to_string(),
            web_root: PathBuf::from("./templates"),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        let routing = RoutingSettings::default();
        Self {
            mode_file: PathBuf::from(DEFAULT_MODE_FILE),
            vpn_interface: routing.vpn_interface,
            fallback_wan_interface: routing.fallback_wan_interface,
            direct_probe_address: routing.direct_probe_address,
            command_timeout_secs: 30,
            conntrack_tcp_established_secs: routing.conntrack_tcp_established_secs,
            conntrack_udp_stream_secs: routing.conntrack_udp_stream_secs,
            restore_attempts: 10,
            restore_interval_ms: 1000,
            background_workers: 4,
        }
    }
}

impl RouterConfig {
    pub fn routing_settings(&self) -> RoutingSettings {
        RoutingSettings {
            vpn_interface: self.vpn_interface.clone(),
            fallback_wan_interface: self.fallback_wan_interface.clone(),
            direct_probe_address: self.direct_probe_address.clone(),
            conntrack_tcp_established_secs: self.conntrack_tcp_established_secs,
            conntrack_udp_stream_secs: self.conntrack_udp_stream_secs,
        }
    }

    pub fn restore_policy(&self) -> RestorePolicy {
        RestorePolicy {
            attempts: self.restore_attempts,
            interval: Duration::from_millis(self.restore_interval_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            info!("Loading config from {}", path.display());
            Self::load(path)
        } else {
            info!("No config file at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply `AUTH_USERNAME` / `AUTH_PASSWORD` overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides using a custom getter (for testing)
    pub fn with_overrides_from<F>(mut self, get_var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(username) = get_var("AUTH_USERNAME").filter(|v| !v.is_empty()) {
            self.auth.username = username;
        }
        if let Some(password) = get_var("AUTH_PASSWORD").filter(|v| !v.is_empty()) {
            self.auth.password = password;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.listen, "0.0.0.0:5000");
        assert_eq!(config.router.mode_file, PathBuf::from("/etc/tailscale-mode.json"));
        assert_eq!(config.router.vpn_interface, "tailscale0");
        assert_eq!(config.router.restore_attempts, 10);
        assert_eq!(config.router.restore_policy().interval, Duration::from_secs(1));
        assert_eq!(config.router.command_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [router]
            vpn_interface = "ts0"
            restore_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.router.vpn_interface, "ts0");
        assert_eq!(config.router.restore_attempts, 3);
        assert_eq!(config.router.fallback_wan_interface, "eth0");
        assert_eq!(config.auth.username, "admin");
        assert_eq!(config.router.routing_settings().vpn_interface, "ts0");
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tailscale-router.toml");

        let mut config = Config::default();
        config.server.listen = "127.0.0.1:8080".to_string();
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.listen, "127.0.0.1:8080");
        assert_eq!(loaded.router.background_workers, 4);
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load_or_default(&temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.server.listen, "0.0.0.0:5000");
    }

    #[test]
    fn test_invalid_toml() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.toml");
        std::fs::write(&path, "[router\nvpn_interface = 1").unwrap();
        assert!(matches!(Config::load(&path), Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::default().with_overrides_from(|key| match key {
            "AUTH_USERNAME" => Some("operator".to_string()),
            "AUTH_PASSWORD" => Some(String::new()),
            _ => None,
        });
        assert_eq!(config.auth.username, "operator");
        assert_eq!(config.auth.password, "admin");
    }
}
