use std::path::{Path, PathBuf};
use serde::Deserialize;
use anyhow::{Context, Result};
use crate::error::AdminError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/cloud-admin/cloud-admin.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub controller: ControllerConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub ssh: SshOptions,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub api: ApiConfig,
    pub log_level: Option<String>,
}

/// How to reach the cloud controller. Everything except `hostname` is also
/// used for every other host in the inventory.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub hostname: String,
    #[serde(default = "default_username")]
    pub username: String,
    pub port: Option<u16>,
    pub keypath: Option<PathBuf>,
    pub proxy_hostname: Option<String>,
    #[serde(default = "default_username")]
    pub proxy_username: String,
    pub proxy_keypath: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialsConfig {
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    /// Local eucarc file, or a directory containing one
    pub credpath: Option<PathBuf>,
    /// eucarc path on the controller, read over SSH as a last resort
    pub remote_eucarc: Option<String>,
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_user")]
    pub user: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_services_command")]
    pub services_command: String,
    #[serde(default = "default_nodes_command")]
    pub nodes_command: String,
    /// Port of the controller's service endpoint exported to admin commands
    #[serde(default = "default_endpoint_port")]
    pub endpoint_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshOptions {
    #[serde(default = "default_ssh_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub strict_host_key_checking: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    /// Maximum number of hosts probed for metrics at once
    #[serde(default = "default_probe_concurrency")]
    pub probe_concurrency: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_username() -> String {
    "root".to_string()
}

fn default_account() -> String {
    "eucalyptus".to_string()
}

fn default_user() -> String {
    "admin".to_string()
}

fn default_services_command() -> String {
    "euserv-describe-services --all --expert".to_string()
}

fn default_nodes_command() -> String {
    "euserv-describe-node-controllers".to_string()
}

fn default_endpoint_port() -> u16 {
    8773
}

fn default_ssh_timeout() -> u64 {
    30
}

fn default_probe_concurrency() -> usize {
    8
}

fn default_listen() -> String {
    "127.0.0.1:8780".to_string()
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            access_key: None,
            secret_key: None,
            credpath: None,
            remote_eucarc: None,
            account: default_account(),
            user: default_user(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            services_command: default_services_command(),
            nodes_command: default_nodes_command(),
            endpoint_port: default_endpoint_port(),
        }
    }
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_ssh_timeout(),
            strict_host_key_checking: false,
        }
    }
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            probe_concurrency: default_probe_concurrency(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

impl ControllerConfig {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            username: default_username(),
            port: None,
            keypath: None,
            proxy_hostname: None,
            proxy_username: default_username(),
            proxy_keypath: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults for everything but the controller address
    pub fn for_controller(hostname: impl Into<String>) -> Self {
        Self {
            controller: ControllerConfig::new(hostname),
            credentials: CredentialsConfig::default(),
            discovery: DiscoveryConfig::default(),
            ssh: SshOptions::default(),
            inventory: InventoryConfig::default(),
            api: ApiConfig::default(),
            log_level: None,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), AdminError> {
        if self.controller.hostname.trim().is_empty() {
            return Err(AdminError::Configuration("controller.hostname is empty".to_string()));
        }
        if self.inventory.probe_concurrency == 0 {
            return Err(AdminError::Configuration(
                "inventory.probe_concurrency must be at least 1".to_string(),
            ));
        }
        if let Some(level) = &self.log_level {
            parse_log_level(level)?;
        }
        Ok(())
    }
}

/// Translate a level name or a numeric level (10 = debug ... 50 = critical)
/// into a tracing filter directive.
pub fn parse_log_level(level: &str) -> std::result::Result<&'static str, AdminError> {
    let level = level.trim();
    if let Ok(n) = level.parse::<u32>() {
        return match n {
            0..=9 => Ok("trace"),
            10..=19 => Ok("debug"),
            20..=29 => Ok("info"),
            30..=39 => Ok("warn"),
            40..=59 => Ok("error"),
            _ => Err(AdminError::Configuration(format!("Invalid log level: {}", level))),
        };
    }
    match level.to_lowercase().as_str() {
        "trace" | "notset" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warn" | "warning" => Ok("warn"),
        "error" | "critical" | "fatal" => Ok("error"),
        _ => Err(AdminError::Configuration(format!("Invalid log level: {}", level))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse("[controller]\nhostname = \"10.1.1.1\"\n").unwrap();

        assert_eq!(config.controller.username, "root");
        assert_eq!(config.credentials.account, "eucalyptus");
        assert_eq!(config.credentials.user, "admin");
        assert_eq!(config.discovery.endpoint_port, 8773);
        assert_eq!(config.ssh.timeout_secs, 30);
        assert_eq!(config.inventory.probe_concurrency, 8);
        assert_eq!(config.api.listen, "127.0.0.1:8780");
    }

    #[test]
    fn test_full_config() {
        let config = Config::parse(
            r#"
            log_level = "debug"

            [controller]
            hostname = "clc.example.com"
            keypath = "/root/.ssh/id_rsa"
            proxy_hostname = "bastion.example.com"

            [credentials]
            credpath = "/root/creds"

            [inventory]
            probe_concurrency = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.controller.proxy_hostname.as_deref(), Some("bastion.example.com"));
        assert_eq!(config.controller.proxy_username, "root");
        assert_eq!(config.credentials.credpath, Some(PathBuf::from("/root/creds")));
        assert_eq!(config.inventory.probe_concurrency, 2);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(Config::parse("[controller]\nhostname = \"\"\n").is_err());
        assert!(Config::parse("log_level = \"loud\"\n[controller]\nhostname = \"h\"\n").is_err());
        assert!(Config::parse("[controller]\nhostname = \"h\"\n[inventory]\nprobe_concurrency = 0\n").is_err());
    }

    #[test]
    fn test_log_levels() {
        assert_eq!(parse_log_level("INFO").unwrap(), "info");
        assert_eq!(parse_log_level("warning").unwrap(), "warn");
        assert_eq!(parse_log_level("critical").unwrap(), "error");
        assert_eq!(parse_log_level("10").unwrap(), "debug");
        assert_eq!(parse_log_level("30").unwrap(), "warn");
        assert!(parse_log_level("99").is_err());
        assert!(parse_log_level("verbose").is_err());
    }
}
