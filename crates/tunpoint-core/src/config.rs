//! Controller settings
//!
//! Static settings of one control plane instance. Per-run inputs (engine
//! configuration text, server domain, DNS/IPv6 flags) travel in a
//! [`RunRequest`](crate::RunRequest) instead.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::assets::AssetConfig;
use crate::error::{Error, Result};

/// Default HTTP endpoint for latency probing; must answer 204
pub const DEFAULT_PROBE_URL: &str = "http://www.google.com/generate_204";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Host application package, e.g. `com.example.vpn`
    pub package_name: String,
    /// Directory holding the helper binary and its fd socket.
    /// Defaults to `/data/data/<package_name>/files`.
    pub data_dir: Option<PathBuf>,
    /// Asset search root for engine resource files
    pub asset_root: Option<PathBuf>,
    /// Helper binary name inside `data_dir`
    pub helper_binary: String,
    /// Engine SOCKS inbound the helper forwards captured traffic to
    pub socks_port: u16,
    pub mtu: u16,
    /// Engine DNS inbound used as the helper's DNS gateway
    pub local_dns_port: u16,
    pub resolve_max_retries: u32,
    pub resolve_retry_delay_ms: u64,
    pub probe_url: String,
    pub helper_max_restarts: u32,
    pub helper_restart_delay_ms: u64,
    pub fd_handoff_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            package_name: String::new(),
            data_dir: None,
            asset_root: None,
            helper_binary: "tun2socks".to_string(),
            socks_port: 10808,
            mtu: 1500,
            local_dns_port: 10853,
            resolve_max_retries: 10,
            resolve_retry_delay_ms: 2000,
            probe_url: DEFAULT_PROBE_URL.to_string(),
            helper_max_restarts: 42,
            helper_restart_delay_ms: 500,
            fd_handoff_delay_ms: 1000,
        }
    }
}

impl ControllerConfig {
    pub fn new(package_name: impl Into<String>) -> Self {
        Self {
            package_name: package_name.into(),
            ..Self::default()
        }
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::Settings(e.to_string()))
    }

    /// Load settings from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Effective data directory for a package
    pub fn data_dir_for(&self, package_name: &str) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("/data/data/{}/files", package_name)))
    }

    /// Asset mapping; the root defaults to the package data directory
    pub fn asset_config(&self) -> AssetConfig {
        AssetConfig::new(
            self.asset_root
                .clone()
                .unwrap_or_else(|| self.data_dir_for(&self.package_name)),
        )
    }

    pub fn resolve_retry_delay(&self) -> Duration {
        Duration::from_millis(self.resolve_retry_delay_ms)
    }

    pub fn helper_restart_delay(&self) -> Duration {
        Duration::from_millis(self.helper_restart_delay_ms)
    }

    pub fn fd_handoff_delay(&self) -> Duration {
        Duration::from_millis(self.fd_handoff_delay_ms)
    }
}
