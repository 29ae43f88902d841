//! Relay process startup.
//!
//! The relay is a small helper process the page's instrumented scripts are
//! served through. The agent only needs to start it and learn its address.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::RelayConfig;
use crate::error::{AgentError, Result};

/// Address the relay listens on
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayAddress {
    #[serde(alias = "host")]
    pub address: String,
    pub port: u16,
}

impl RelayAddress {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Base URL for relay-mediated requests
    pub fn prefix(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    /// Parse `{"address": .., "port": ..}` or a bare `host:port`
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        if line.starts_with('{') {
            return serde_json::from_str(line)
                .map_err(|e| AgentError::relay_start(format!("bad relay address {line:?}: {e}")));
        }
        let (host, port) = line
            .rsplit_once(':')
            .ok_or_else(|| AgentError::relay_start(format!("bad relay address {line:?}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|e| AgentError::relay_start(format!("bad relay port {port:?}: {e}")))?;
        if host.is_empty() {
            return Err(AgentError::relay_start(format!("bad relay address {line:?}")));
        }
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for RelayAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Relay startup collaborator
#[async_trait]
pub trait RelayLauncher: Send + Sync {
    async fn start(&self) -> Result<RelayAddress>;
}

/// Build the launcher described by the config
pub fn launcher_from_config(config: &RelayConfig) -> Result<Box<dyn RelayLauncher>> {
    if let Some(command) = &config.command {
        Ok(Box::new(CommandRelay::new(command.clone(), config.args.clone())))
    } else if let Some(address) = &config.address {
        Ok(Box::new(FixedRelay::new(RelayAddress::parse(address)?)))
    } else {
        Err(AgentError::config(
            "relay needs either `command` or `address`",
        ))
    }
}

// ============================================================================
// Fixed Relay
// ============================================================================

/// A relay that is already running somewhere
pub struct FixedRelay {
    address: RelayAddress,
}

impl FixedRelay {
    pub fn new(address: RelayAddress) -> Self {
        Self { address }
    }
}

#[async_trait]
impl RelayLauncher for FixedRelay {
    async fn start(&self) -> Result<RelayAddress> {
        Ok(self.address.clone())
    }
}

// ============================================================================
// Command Relay
// ============================================================================

/// Spawns the relay and reads its address from the first stdout line.
///
/// The child is killed when the launcher is dropped or started again.
pub struct CommandRelay {
    program: String,
    args: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandRelay {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RelayLauncher for CommandRelay {
    async fn start(&self) -> Result<RelayAddress> {
        let mut slot = self.child.lock().await;
        if let Some(mut previous) = slot.take() {
            debug!(program = %self.program, "Stopping previous relay");
            if let Err(e) = previous.kill().await {
                warn!(error = %e, "Failed to stop previous relay");
            }
        }

        debug!(program = %self.program, args = ?self.args, "Starting relay");
        let mut child = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentError::relay_start(format!("{}: {}", self.program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::relay_start("relay stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let line = lines
            .next_line()
            .await
            .map_err(|e| AgentError::relay_start(e.to_string()))?
            .ok_or_else(|| AgentError::relay_start("relay exited before reporting its address"))?;

        let address = RelayAddress::parse(&line)?;
        info!(pid = ?child.id(), address = %address, "Relay listening");

        // Keep draining so the relay never blocks on a full pipe.
        tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "tracer_agent::relay", "[relay] {}", line);
            }
        });

        *slot = Some(child);
        Ok(address)
    }
}

// ============================================================================
// Tests
// ============================================================================
