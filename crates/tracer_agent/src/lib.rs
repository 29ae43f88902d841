//! Tracer Agent - connection lifecycle and instrumentation cache for an
//! in-page tracer reached over the inspector protocol.
//!
//! The agent attaches to a page's inspector, waits for the page's tracer
//! object to become reachable, starts hit tracking, and caches the
//! instrumentation metadata the page reports as scripts load.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────┐  notifications  ┌─────────────────────────────┐
//! │ InspectorLink│────────────────►│ Agent worker                │
//! │ (cdp)        │                 │  ConnectionMachine + Store  │
//! └──────┬───────┘                 └──────┬──────────────┬───────┘
//!        │ attach/detach                  │ effects      │ events
//! ┌──────▼───────┐   callFunctionOn ┌─────▼──────┐ ┌─────▼──────┐
//! │ CdpRuntime   │◄─────────────────│ Gateway    │ │ Emitter    │
//! └──────────────┘                  └────────────┘ └────────────┘
//! ```
//!
//! # Connection States
//!
//! `waitingForProxy` → `disconnected` → `waitingForPage` →
//! `initializingTracer` → `initializingHits` → `connected`.
//! See [`machine`] for the full transition table.
//!
//! # Modules
//!
//! - [`agent`] - Public handle: cached lookups, remote fetches, events
//! - [`machine`] - Pure connection state machine
//! - [`store`] - Nodes, invocations and hit-count totals
//! - [`gateway`] - Calls on the in-page tracer object
//! - [`cdp`] - WebSocket inspector client and reconnect loop
//! - [`relay`] - Relay process startup
//! - [`config`] - TOML configuration

pub mod agent;
pub mod cdp;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod machine;
pub mod relay;
pub mod runtime;
pub mod store;

#[cfg(test)]
mod testing;

pub use agent::Agent;
pub use config::{AgentConfig, RelayConfig};
pub use error::{AgentError, AgentErrorCode, Result};
pub use events::AgentEvent;
pub use machine::ConnectionState;
pub use relay::{launcher_from_config, RelayAddress, RelayLauncher};
pub use runtime::{InspectorNotification, InspectorRuntime};
pub use store::{HitCounts, Invocation, Node, NodeKind, Position};
