//! Agent configuration (`tracer-agent.toml`).
//!
//! Every key is optional; a missing file section falls back to defaults.
//!
//! ```toml
//! inspector_url = "ws://127.0.0.1:9222/devtools/page/1"
//! reconnect_delay_ms = 2000
//!
//! [relay]
//! command = "node"
//! args = ["relay/server.js"]
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{AgentError, Result};

pub const DEFAULT_INSPECTOR_URL: &str = "ws://127.0.0.1:9222/devtools/page/1";
pub const DEFAULT_TRACER_EXPRESSION: &str = "tracer.connect()";
/// DOM attribute the page writes script-discovery payloads into
pub const SCRIPTS_ADDED_ATTRIBUTE: &str = "data-tracer-scripts-added";

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    /// CDP WebSocket endpoint of the inspected page
    pub inspector_url: String,
    /// WebSocket connect timeout (default: 5000)
    pub connect_timeout_ms: u64,
    /// Per-request timeout for CDP calls (default: 30000)
    pub request_timeout_ms: u64,
    /// Pause between inspector reconnect attempts (default: 2000)
    pub reconnect_delay_ms: u64,
    /// Expression evaluated in the page to obtain the tracer handle
    pub tracer_expression: String,
    /// Attribute name carrying `{nodes: [...]}` payloads
    pub scripts_added_attribute: String,
    pub relay: RelayConfig,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            inspector_url: DEFAULT_INSPECTOR_URL.to_string(),
            connect_timeout_ms: 5000,
            request_timeout_ms: 30_000,
            reconnect_delay_ms: 2000,
            tracer_expression: DEFAULT_TRACER_EXPRESSION.to_string(),
            scripts_added_attribute: SCRIPTS_ADDED_ATTRIBUTE.to_string(),
            relay: RelayConfig::default(),
        }
    }
}

/// How to reach the relay: spawn `command`, or use a running one at `address`
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
    /// `host:port` of an already running relay
    pub address: Option<String>,
}

impl AgentConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| AgentError::config(format!("reading {}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "Loaded agent config");
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AgentConfig =
            toml::from_str(text).map_err(|e| AgentError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.inspector_url.starts_with("ws://") && !self.inspector_url.starts_with("wss://") {
            return Err(AgentError::config(format!(
                "inspector_url must be a ws:// or wss:// URL, got {}",
                self.inspector_url
            )));
        }
        if self.relay.command.is_none() && self.relay.address.is_none() {
            return Err(AgentError::config(
                "[relay] needs either `command` or `address`",
            ));
        }
        if self.tracer_expression.trim().is_empty() {
            return Err(AgentError::config("tracer_expression is empty"));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
