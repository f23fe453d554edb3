//! Configuration management for LedgerLink

use crate::error::{RemoteError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const CONFIG_ENV_VAR: &str = "LEDGERLINK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "ledgerlink.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub trusted: bool,
    #[serde(default = "default_local_signing")]
    pub local_signing: bool,
    #[serde(default)]
    pub local_sequence: bool,
    #[serde(default)]
    pub local_fee: bool,
    #[serde(default = "default_fee_cushion")]
    pub fee_cushion: f64,
    #[serde(default = "default_submit_missing")]
    pub submit_missing_ledgers: u32,
    #[serde(default = "default_submit_lost")]
    pub submit_lost_ledgers: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    #[serde(default)]
    pub accounts: HashMap<String, AccountSecret>,
}

/// One configured endpoint. `pool` connections are opened against it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default = "default_pool")]
    pub pool: usize,
    #[serde(default)]
    pub primary: bool,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16, secure: bool) -> Self {
        Self {
            host: host.into(),
            port,
            secure,
            pool: default_pool(),
            primary: false,
        }
    }

    pub fn url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSecret {
    pub account: String,
    pub secret: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            trusted: false,
            local_signing: default_local_signing(),
            local_sequence: false,
            local_fee: false,
            fee_cushion: default_fee_cushion(),
            submit_missing_ledgers: default_submit_missing(),
            submit_lost_ledgers: default_submit_lost(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            accounts: HashMap::new(),
        }
    }
}

impl RemoteConfig {
    pub fn with_servers(servers: Vec<ServerConfig>) -> Self {
        Self {
            servers,
            ..Self::default()
        }
    }

    /// Local signing implies local fees and sequences.
    pub fn normalized(mut self) -> Self {
        if self.local_signing {
            self.local_sequence = true;
            self.local_fee = true;
        }
        self
    }

    /// Checks option values. An empty server list is allowed here; the pool
    /// reports it when asked to connect or send.
    pub fn validate(&self) -> Result<()> {
        if let Some(server) = self.servers.iter().find(|s| s.port == 0) {
            return Err(RemoteError::Config(format!(
                "server {} has no port",
                server.host
            )));
        }
        if self.fee_cushion < 1.0 {
            return Err(RemoteError::Config(format!(
                "fee_cushion must be at least 1.0, got {}",
                self.fee_cushion
            )));
        }
        if self.submit_lost_ledgers <= self.submit_missing_ledgers {
            return Err(RemoteError::Config(
                "submit_lost_ledgers must exceed submit_missing_ledgers".to_string(),
            ));
        }
        Ok(())
    }
}

pub fn load_config(path: impl AsRef<Path>) -> Result<RemoteConfig> {
    let config_str = fs::read_to_string(path.as_ref()).map_err(|e| {
        RemoteError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
    })?;
    let config: RemoteConfig = toml::from_str(&config_str)?;
    if config.servers.is_empty() {
        return Err(RemoteError::Config(format!(
            "{} lists no servers",
            path.as_ref().display()
        )));
    }
    config.validate()?;
    Ok(config.normalized())
}

/// Reads the file named by `LEDGERLINK_CONFIG`, falling back to a single
/// public server when no file exists.
pub fn load_config_from_env() -> Result<RemoteConfig> {
    let path = std::env::var(CONFIG_ENV_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    if Path::new(&path).exists() {
        return load_config(&path);
    }

    let config = RemoteConfig::with_servers(vec![ServerConfig::new("s1.ripple.com", 443, true)]);
    config.validate()?;
    Ok(config.normalized())
}

fn default_local_signing() -> bool {
    true
}

fn default_fee_cushion() -> f64 {
    1.5
}

fn default_submit_missing() -> u32 {
    4
}

fn default_submit_lost() -> u32 {
    8
}

fn default_reconnect_delay() -> u64 {
    500
}

fn default_max_reconnect_delay() -> u64 {
    30_000
}

fn default_pool() -> usize {
    1
}
