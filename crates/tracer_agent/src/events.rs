//! Events surfaced to consumers of the agent.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::trace;

/// Notifications emitted by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The tracer handshake finished and hit tracking is running
    Connect,
    /// The agent left the connected state
    Disconnect,
    /// Function and call-site data for a file has been received
    ReceivedScriptInfo(String),
    /// The relay could not be started; nothing will happen until reinitialized
    RelayFailed(String),
}

impl AgentEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AgentEvent::Connect => "connect",
            AgentEvent::Disconnect => "disconnect",
            AgentEvent::ReceivedScriptInfo(_) => "receivedScriptInfo",
            AgentEvent::RelayFailed(_) => "relayFailed",
        }
    }
}

type Handler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

/// Synchronous event dispatch with an optional broadcast tap.
///
/// Handlers registered with [`EventEmitter::on`] run inline, in registration
/// order, on the thread that emits. Async consumers can [`subscribe`] instead
/// and see the same events in the same order.
///
/// [`subscribe`]: EventEmitter::subscribe
pub struct EventEmitter {
    handlers: Mutex<Vec<Handler>>,
    event_tx: broadcast::Sender<AgentEvent>,
}

impl Default for EventEmitter {
    fn default() -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            handlers: Mutex::new(Vec::new()),
            event_tx,
        }
    }
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on<F>(&self, handler: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(handler));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.event_tx.subscribe()
    }

    pub fn emit(&self, event: AgentEvent) {
        trace!(event = event.name(), "Emitting agent event");
        // Clone out so handlers may register further handlers.
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for handler in &handlers {
            handler(&event);
        }
        if self.event_tx.receiver_count() > 0 {
            let _ = self.event_tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handlers_run_in_order() {
        let emitter = EventEmitter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = seen.clone();
        emitter.on(move |e| first.lock().unwrap().push(format!("1:{}", e.name())));
        let second = seen.clone();
        emitter.on(move |e| second.lock().unwrap().push(format!("2:{}", e.name())));

        emitter.emit(AgentEvent::Connect);
        emitter.emit(AgentEvent::ReceivedScriptInfo("a.js".to_string()));

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "1:connect",
                "2:connect",
                "1:receivedScriptInfo",
                "2:receivedScriptInfo"
            ]
        );
    }

    #[test]
    fn test_subscribers_see_events() {
        let emitter = EventEmitter::new();
        let mut rx = emitter.subscribe();

        emitter.emit(AgentEvent::Connect);
        emitter.emit(AgentEvent::Disconnect);

        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Connect);
        assert_eq!(rx.try_recv().unwrap(), AgentEvent::Disconnect);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_without_listeners_is_noop() {
        let emitter = EventEmitter::new();
        emitter.emit(AgentEvent::RelayFailed("boom".to_string()));
    }
}
