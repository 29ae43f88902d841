//! Error types for the tracer agent.
//!
//! Error codes: 9800-9899

use thiserror::Error;

// ============================================================================
// Error Types (Error codes 9800-9899)
// ============================================================================

/// Error codes for agent operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum AgentErrorCode {
    /// Generic agent error
    Generic = 9800,
    /// No tracer handle is attached
    NotConnected = 9801,
    /// The remote call threw inside the page
    RemoteException = 9802,
    /// WebSocket or CDP transport failure
    Transport = 9803,
    /// Request did not complete in time
    Timeout = 9804,
    /// Relay process could not be started
    RelayStart = 9805,
    /// Payload from the page could not be decoded
    MalformedPayload = 9806,
    /// Invalid configuration
    Config = 9807,
    /// Unexpected protocol message
    Protocol = 9808,
}

/// Tracer agent errors
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("[{code}] Agent error: {message}")]
    Generic { code: u32, message: String },

    #[error("[{code}] Not connected: {message}")]
    NotConnected { code: u32, message: String },

    #[error("[{code}] Remote exception: {message}")]
    RemoteException { code: u32, message: String },

    #[error("[{code}] Transport error: {message}")]
    Transport { code: u32, message: String },

    #[error("[{code}] Timeout: {message}")]
    Timeout { code: u32, message: String },

    #[error("[{code}] Relay start failed: {message}")]
    RelayStart { code: u32, message: String },

    #[error("[{code}] Malformed payload: {message}")]
    MalformedPayload { code: u32, message: String },

    #[error("[{code}] Config error: {message}")]
    Config { code: u32, message: String },

    #[error("[{code}] Protocol error: {message}")]
    Protocol { code: u32, message: String },
}

impl AgentError {
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            code: AgentErrorCode::Generic as u32,
            message: message.into(),
        }
    }

    pub fn not_connected(message: impl Into<String>) -> Self {
        Self::NotConnected {
            code: AgentErrorCode::NotConnected as u32,
            message: message.into(),
        }
    }

    pub fn remote_exception(message: impl Into<String>) -> Self {
        Self::RemoteException {
            code: AgentErrorCode::RemoteException as u32,
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            code: AgentErrorCode::Transport as u32,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            code: AgentErrorCode::Timeout as u32,
            message: message.into(),
        }
    }

    pub fn relay_start(message: impl Into<String>) -> Self {
        Self::RelayStart {
            code: AgentErrorCode::RelayStart as u32,
            message: message.into(),
        }
    }

    pub fn malformed_payload(message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            code: AgentErrorCode::MalformedPayload as u32,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            code: AgentErrorCode::Config as u32,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            code: AgentErrorCode::Protocol as u32,
            message: message.into(),
        }
    }

    /// Numeric code carried by every variant
    pub fn code(&self) -> u32 {
        match self {
            Self::Generic { code, .. }
            | Self::NotConnected { code, .. }
            | Self::RemoteException { code, .. }
            | Self::Transport { code, .. }
            | Self::Timeout { code, .. }
            | Self::RelayStart { code, .. }
            | Self::MalformedPayload { code, .. }
            | Self::Config { code, .. }
            | Self::Protocol { code, .. } => *code,
        }
    }
}

pub type Result<T, E = AgentError> = std::result::Result<T, E>;

// ============================================================================
// Tests
// ============================================================================
