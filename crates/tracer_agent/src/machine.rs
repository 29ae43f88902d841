//! Connection lifecycle state machine.
//!
//! Sequences the four handshakes between the agent and the page:
//!
//! ```text
//! waitingForProxy --proxyStarted--> disconnected --inspectorConnected--> waitingForPage
//!     --gotDocument--> initializingTracer --tracerConnected--> initializingHits
//!     --trackingHits--> connected
//! ```
//!
//! `gotDocument` from any state past `waitingForPage` restarts at
//! `initializingTracer`; `inspectorDisconnected` from any state past
//! `waitingForProxy` drops back to `disconnected`. Failed handshakes also land
//! in `disconnected` and wait for the next `inspectorConnected`.
//!
//! The machine is synchronous and does no I/O. [`ConnectionMachine::handle`]
//! applies a trigger, resets the store where an entry action demands it, and
//! returns the [`Effect`]s the caller must carry out. Async effects report
//! back with a trigger carrying the attempt number they were issued under;
//! completions from superseded attempts are dropped.

use serde_json::Value;
use tracing::{debug, error, info};

use crate::events::AgentEvent;
use crate::relay::RelayAddress;
use crate::store::InstrumentationStore;

// ============================================================================
// States, Triggers, Effects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    WaitingForProxy,
    Disconnected,
    WaitingForPage,
    InitializingTracer,
    InitializingHits,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::WaitingForProxy => "waitingForProxy",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::WaitingForPage => "waitingForPage",
            ConnectionState::InitializingTracer => "initializingTracer",
            ConnectionState::InitializingHits => "initializingHits",
            ConnectionState::Connected => "connected",
        }
    }
}

/// Handshake attempt counter, bumped on every entry into a handshake state
pub type Attempt = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    ProxyStarted(RelayAddress),
    ProxyFailed(String),
    InspectorConnected,
    InspectorDisconnected,
    GotDocument,
    TracerConnected { attempt: Attempt, object_id: String },
    TracerConnectFailed { attempt: Attempt },
    TrackingHits { attempt: Attempt, handle: Value },
    TrackingHitsFailed { attempt: Attempt },
}

impl Trigger {
    pub fn name(&self) -> &'static str {
        match self {
            Trigger::ProxyStarted(_) => "proxyStarted",
            Trigger::ProxyFailed(_) => "proxyFailed",
            Trigger::InspectorConnected => "inspectorConnected",
            Trigger::InspectorDisconnected => "inspectorDisconnected",
            Trigger::GotDocument => "gotDocument",
            Trigger::TracerConnected { .. } => "tracerConnected",
            Trigger::TracerConnectFailed { .. } => "tracerConnectFailed",
            Trigger::TrackingHits { .. } => "trackingHits",
            Trigger::TrackingHitsFailed { .. } => "trackingHitsFailed",
        }
    }
}

/// Work requested by a transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the relay; answer with `ProxyStarted` or `ProxyFailed`
    StartRelay,
    /// Obtain the tracer handle; answer with `TracerConnected` or `TracerConnectFailed`
    ConnectTracer { attempt: Attempt },
    /// Begin hit tracking; answer with `TrackingHits` or `TrackingHitsFailed`
    TrackHits {
        attempt: Attempt,
        tracer: Option<String>,
    },
    Emit(AgentEvent),
}

/// Connection-scoped fields, cleared together on every reset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionFields {
    pub tracer_object_id: Option<String>,
    pub default_tracking_handle: Option<Value>,
    pub queued_scripts: Vec<String>,
}

// ============================================================================
// Machine
// ============================================================================

#[derive(Debug)]
pub struct ConnectionMachine {
    state: ConnectionState,
    relay: Option<RelayAddress>,
    fields: ConnectionFields,
    attempt: Attempt,
}

impl Default for ConnectionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionMachine {
    /// A machine sitting in `waitingForProxy` whose entry action has not run yet
    pub fn new() -> Self {
        Self {
            state: ConnectionState::WaitingForProxy,
            relay: None,
            fields: ConnectionFields::default(),
            attempt: 0,
        }
    }

    /// (Re-)enter `waitingForProxy`, running its entry action
    pub fn start(&mut self, store: &mut InstrumentationStore) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.goto(ConnectionState::WaitingForProxy, store, &mut effects);
        effects
    }

    pub fn handle(&mut self, trigger: Trigger, store: &mut InstrumentationStore) -> Vec<Effect> {
        use ConnectionState::*;

        let mut effects = Vec::new();
        let name = trigger.name();

        let next = match (self.state, trigger) {
            (WaitingForProxy, Trigger::ProxyStarted(address)) => {
                info!(prefix = %address.prefix(), "Relay started");
                self.relay = Some(address);
                Some(Disconnected)
            }
            (WaitingForProxy, Trigger::ProxyFailed(reason)) => {
                error!(reason = %reason, "Relay failed to start");
                effects.push(Effect::Emit(AgentEvent::RelayFailed(reason)));
                None
            }
            (Disconnected, Trigger::InspectorConnected) => Some(WaitingForPage),
            (WaitingForPage, Trigger::GotDocument) => Some(InitializingTracer),
            (InitializingTracer, Trigger::TracerConnected { attempt, object_id })
                if attempt == self.attempt =>
            {
                self.fields.tracer_object_id = Some(object_id);
                Some(InitializingHits)
            }
            (InitializingTracer, Trigger::TracerConnectFailed { attempt })
                if attempt == self.attempt =>
            {
                Some(Disconnected)
            }
            (InitializingHits, Trigger::TrackingHits { attempt, handle })
                if attempt == self.attempt =>
            {
                self.fields.default_tracking_handle = Some(handle);
                Some(Connected)
            }
            (InitializingHits, Trigger::TrackingHitsFailed { attempt })
                if attempt == self.attempt =>
            {
                Some(Disconnected)
            }
            (InitializingTracer | InitializingHits | Connected, Trigger::GotDocument) => {
                Some(InitializingTracer)
            }
            (
                Disconnected | WaitingForPage | InitializingTracer | InitializingHits | Connected,
                Trigger::InspectorDisconnected,
            ) => Some(Disconnected),
            (state, _) => {
                debug!(
                    state = state.as_str(),
                    trigger = name,
                    attempt = self.attempt,
                    "Ignoring trigger"
                );
                None
            }
        };

        if let Some(next) = next {
            debug!(
                from = self.state.as_str(),
                to = next.as_str(),
                trigger = name,
                "Connection transition"
            );
            self.goto(next, store, &mut effects);
        }
        effects
    }

    fn goto(
        &mut self,
        next: ConnectionState,
        store: &mut InstrumentationStore,
        effects: &mut Vec<Effect>,
    ) {
        if self.state == ConnectionState::Connected {
            info!("Tracer disconnected");
            effects.push(Effect::Emit(AgentEvent::Disconnect));
        }
        self.state = next;
        self.enter(store, effects);
    }

    fn enter(&mut self, store: &mut InstrumentationStore, effects: &mut Vec<Effect>) {
        match self.state {
            ConnectionState::WaitingForProxy => {
                self.relay = None;
                self.reset_connection(store);
                effects.push(Effect::StartRelay);
            }
            ConnectionState::Disconnected | ConnectionState::WaitingForPage => {
                self.reset_connection(store);
            }
            ConnectionState::InitializingTracer => {
                self.reset_connection(store);
                self.attempt += 1;
                effects.push(Effect::ConnectTracer {
                    attempt: self.attempt,
                });
            }
            ConnectionState::InitializingHits => {
                self.attempt += 1;
                effects.push(Effect::TrackHits {
                    attempt: self.attempt,
                    tracer: self.fields.tracer_object_id.clone(),
                });
            }
            ConnectionState::Connected => {
                info!("Tracer connected");
                effects.push(Effect::Emit(AgentEvent::Connect));
                for path in self.fields.queued_scripts.drain(..) {
                    effects.push(Effect::Emit(AgentEvent::ReceivedScriptInfo(path)));
                }
            }
        }
    }

    fn reset_connection(&mut self, store: &mut InstrumentationStore) {
        self.fields = ConnectionFields::default();
        store.reset();
    }

    /// Emit script info now when connected, otherwise queue it for `connected`
    pub fn announce_script(&mut self, path: String) -> Option<Effect> {
        if self.is_ready() {
            Some(Effect::Emit(AgentEvent::ReceivedScriptInfo(path)))
        } else {
            debug!(path = %path, state = self.state.as_str(), "Queueing script info");
            self.fields.queued_scripts.push(path);
            None
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn attempt(&self) -> Attempt {
        self.attempt
    }

    pub fn relay(&self) -> Option<&RelayAddress> {
        self.relay.as_ref()
    }

    pub fn fields(&self) -> &ConnectionFields {
        &self.fields
    }
}

// ============================================================================
// Tests
// ============================================================================
