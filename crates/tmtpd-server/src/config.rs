//! Server configuration file.

use std::path::Path;

use serde::Deserialize;

use crate::error::ServerResult;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "tmtpd.config";

/// Top-level configuration, a JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Config {
    /// Time acquisition settings.
    pub ntp: NtpConfig,
    /// Listener settings.
    pub listen: ListenConfig,
}

/// NTP hosts to query at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NtpConfig {
    /// Hosts tried in order.
    pub hosts: Vec<String>,
    /// Attempts per host.
    pub retries: u8,
}

/// TCP listener and TLS material.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListenConfig {
    /// Network name; only "tcp" is meaningful here.
    pub net: String,
    /// Listen address, host:port.
    pub laddr: String,
    /// Path to the PEM server certificate chain.
    pub cert_path: String,
    /// Path to the PEM private key.
    pub key_path: String,
}

impl Config {
    /// Loads and parses the configuration file.
    pub fn load(path: impl AsRef<Path>) -> ServerResult<Config> {
        let buf = std::fs::read(path)?;
        Ok(serde_json::from_slice(&buf)?)
    }
}
