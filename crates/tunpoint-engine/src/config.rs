//! Engine configuration
//!
//! The host hands the control plane the engine's native JSON configuration as
//! text. Only the parts the control plane reasons about are typed; everything
//! else is carried through untouched for the engine.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{EngineError, Result};

/// Log section of the engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loglevel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A local listener of the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sniffing: Option<Value>,
}

/// An upstream the engine forwards through
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub protocol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_settings: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mux: Option<Value>,
}

/// Parsed engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<LogConfig>,
    #[serde(default)]
    pub inbounds: Vec<InboundConfig>,
    #[serde(default)]
    pub outbounds: Vec<OutboundConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
    /// Top-level sections the control plane does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EngineConfig {
    /// Parse and validate configuration text
    pub fn from_json(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|e| EngineError::Config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        debug!(
            "Parsed engine config: {} inbound(s), {} outbound(s)",
            config.inbounds.len(),
            config.outbounds.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut tags = HashSet::new();
        for (idx, inbound) in self.inbounds.iter().enumerate() {
            if inbound.protocol.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "inbound #{} has an empty protocol",
                    idx
                )));
            }
            if inbound.port == 0 {
                return Err(EngineError::Config(format!(
                    "inbound #{} has no port",
                    idx
                )));
            }
            if let Some(tag) = &inbound.tag {
                if !tags.insert(tag.as_str()) {
                    return Err(EngineError::Config(format!(
                        "duplicate inbound tag: {}",
                        tag
                    )));
                }
            }
        }

        for (idx, outbound) in self.outbounds.iter().enumerate() {
            if outbound.protocol.trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "outbound #{} has an empty protocol",
                    idx
                )));
            }
        }

        Ok(())
    }

    /// Whether the engine should expose traffic counters
    pub fn stats_enabled(&self) -> bool {
        self.stats.is_some()
    }

    /// Tags of all tagged inbounds, in declaration order
    pub fn inbound_tags(&self) -> impl Iterator<Item = &str> {
        self.inbounds.iter().filter_map(|i| i.tag.as_deref())
    }
}
