//! The agent: public handle over the connection machine and the store.
//!
//! All machine triggers, whether inspector notifications or completions of
//! the agent's own async handshake steps, go through one queue and are
//! applied one at a time by a single worker task. The machine and the store
//! sit behind one lock so a transition and the store reset it causes are
//! observed together. Events are dispatched after the lock is released, so
//! handlers may call back into the agent.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::events::{AgentEvent, EventEmitter};
use crate::gateway::RemoteCallGateway;
use crate::machine::{ConnectionMachine, ConnectionState, Effect, Trigger};
use crate::relay::RelayLauncher;
use crate::runtime::{InspectorNotification, InspectorRuntime};
use crate::store::{HitCounts, InstrumentationStore, Invocation, Node};

/// Payload of the scripts-added attribute
#[derive(Debug, Deserialize)]
struct ScriptsAdded {
    nodes: Vec<Node>,
}

enum Input {
    Start,
    Notification(InspectorNotification),
    Trigger(Trigger),
}

struct Core {
    machine: ConnectionMachine,
    store: InstrumentationStore,
    /// Page/DOM listeners are installed between inspector connect and disconnect
    listening: bool,
    /// A document was reported during the current inspector session
    document_loaded: bool,
}

struct Inner {
    config: AgentConfig,
    core: Mutex<Core>,
    gateway: RemoteCallGateway,
    runtime: Arc<dyn InspectorRuntime>,
    relay: Arc<dyn RelayLauncher>,
    events: EventEmitter,
    input_tx: mpsc::UnboundedSender<Input>,
    input_rx: Mutex<Option<mpsc::UnboundedReceiver<Input>>>,
}

/// Handle to the tracer connection. Cheap to clone.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Inner>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        runtime: Arc<dyn InspectorRuntime>,
        relay: Arc<dyn RelayLauncher>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                config,
                core: Mutex::new(Core {
                    machine: ConnectionMachine::new(),
                    store: InstrumentationStore::new(),
                    listening: false,
                    document_loaded: false,
                }),
                gateway: RemoteCallGateway::new(runtime.clone()),
                runtime,
                relay,
                events: EventEmitter::new(),
                input_tx,
                input_rx: Mutex::new(Some(input_rx)),
            }),
        }
    }

    /// Start the worker and begin consuming inspector notifications.
    ///
    /// Enters `waitingForProxy`, which starts the relay. Must be called from
    /// within a tokio runtime, once.
    pub fn init(
        &self,
        mut notifications: mpsc::UnboundedReceiver<InspectorNotification>,
    ) -> Result<JoinHandle<()>> {
        let input_rx = self
            .inner
            .input_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| AgentError::generic("agent already initialized"))?;

        let input_tx = self.inner.input_tx.clone();
        tokio::spawn(async move {
            while let Some(notification) = notifications.recv().await {
                if input_tx.send(Input::Notification(notification)).is_err() {
                    break;
                }
            }
            debug!("Inspector notification stream ended");
        });

        self.inner.send(Input::Start);
        Ok(tokio::spawn(Inner::run(self.inner.clone(), input_rx)))
    }

    /// Re-enter `waitingForProxy`: full reset and a fresh relay start
    pub fn reinitialize(&self) {
        self.inner.send(Input::Start);
    }

    /// Register a synchronous event handler
    pub fn on<F>(&self, handler: F)
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.inner.events.on(handler);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.inner.core().machine.is_ready()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.inner.core().machine.state()
    }

    /// `http://host:port` of the relay, once started
    pub fn relay_prefix(&self) -> Option<String> {
        self.inner.core().machine.relay().map(|r| r.prefix())
    }

    // ------------------------------------------------------------------------
    // Cached data
    // ------------------------------------------------------------------------

    pub fn function_with_id(&self, id: &str) -> Option<Node> {
        self.inner.core().store.function_with_id(id).cloned()
    }

    pub fn functions_in_file(&self, path: &str) -> Vec<Node> {
        self.inner
            .core()
            .store
            .functions_in_file(path)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Functions containing the position, innermost last
    pub fn functions_containing(&self, path: &str, line: u32, column: u32) -> Vec<Node> {
        self.inner
            .core()
            .store
            .functions_containing(path, line, column)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn invocation_with_id(&self, id: &str) -> Option<Invocation> {
        self.inner.core().store.invocation_with_id(id).cloned()
    }

    /// Snapshot of the running hit-count totals
    pub fn cached_hit_counts(&self) -> HitCounts {
        self.inner.core().store.hit_counts().clone()
    }

    /// Borrow the live totals under the agent lock
    pub fn with_cached_hit_counts<R>(&self, f: impl FnOnce(&HitCounts) -> R) -> R {
        f(self.inner.core().store.hit_counts())
    }

    // ------------------------------------------------------------------------
    // Remote fetches
    // ------------------------------------------------------------------------

    pub async fn track_hits(&self) -> Result<Value> {
        let tracer = self.inner.tracer();
        self.inner.gateway.track_hits(tracer.as_deref()).await
    }

    /// Fetch new hit counts for the default tracking session and merge them.
    ///
    /// Returns `(totals, deltas)`. Deltas arriving after the connection was
    /// reset are dropped and the call fails with `NotConnected`.
    pub async fn refresh_hit_counts(&self) -> Result<(HitCounts, HitCounts)> {
        let (tracer, handle) = {
            let core = self.inner.core();
            let fields = core.machine.fields();
            (
                fields.tracer_object_id.clone(),
                fields.default_tracking_handle.clone(),
            )
        };
        let handle =
            handle.ok_or_else(|| AgentError::not_connected("hit tracking has not started"))?;

        let deltas = self
            .inner
            .gateway
            .hit_count_deltas(tracer.as_deref(), &handle)
            .await?;

        let mut core = self.inner.core();
        let fields = core.machine.fields();
        if fields.tracer_object_id != tracer
            || fields.default_tracking_handle.as_ref() != Some(&handle)
        {
            debug!("Discarding hit count deltas from a previous connection");
            return Err(AgentError::not_connected("connection was reset"));
        }
        core.store.merge_hit_count_deltas(&deltas);
        Ok((core.store.hit_counts().clone(), deltas))
    }

    pub async fn track_logs(&self, query: Value) -> Result<Value> {
        let tracer = self.inner.tracer();
        self.inner.gateway.track_logs(tracer.as_deref(), query).await
    }

    pub async fn refresh_logs(&self, handle: &Value, max_results: u32) -> Result<Value> {
        let tracer = self.inner.tracer();
        self.inner
            .gateway
            .log_delta(tracer.as_deref(), handle, max_results)
            .await
    }

    pub async fn backtrace(&self, options: Value) -> Result<Value> {
        let tracer = self.inner.tracer();
        self.inner.gateway.backtrace(tracer.as_deref(), options).await
    }
}

// ============================================================================
// Worker
// ============================================================================

impl Inner {
    fn core(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn tracer(&self) -> Option<String> {
        self.core().machine.fields().tracer_object_id.clone()
    }

    fn send(&self, input: Input) {
        if self.input_tx.send(input).is_err() {
            debug!("Agent worker has stopped, dropping input");
        }
    }

    async fn run(self: Arc<Self>, mut input_rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = input_rx.recv().await {
            self.process(input);
        }
    }

    fn process(self: &Arc<Self>, input: Input) {
        let effects = {
            let mut guard = self.core();
            let core = &mut *guard;
            match input {
                Input::Start => core.machine.start(&mut core.store),
                Input::Trigger(trigger) => {
                    let relay_started = matches!(trigger, Trigger::ProxyStarted(_))
                        && core.machine.state() == ConnectionState::WaitingForProxy;
                    let mut effects = core.machine.handle(trigger, &mut core.store);
                    if relay_started {
                        catch_up(core, &mut effects);
                    }
                    effects
                }
                Input::Notification(notification) => self.on_notification(core, notification),
            }
        };

        for effect in effects {
            self.run_effect(effect);
        }
    }

    fn on_notification(&self, core: &mut Core, notification: InspectorNotification) -> Vec<Effect> {
        match notification {
            InspectorNotification::Connected => {
                core.listening = true;
                core.document_loaded = false;
                core.machine.handle(Trigger::InspectorConnected, &mut core.store)
            }
            InspectorNotification::Disconnected => {
                core.listening = false;
                core.document_loaded = false;
                core.machine.handle(Trigger::InspectorDisconnected, &mut core.store)
            }
            InspectorNotification::DocumentLoaded if core.listening => {
                core.document_loaded = true;
                core.machine.handle(Trigger::GotDocument, &mut core.store)
            }
            InspectorNotification::AttributeModified { name, value }
                if core.listening && name == self.config.scripts_added_attribute =>
            {
                self.on_scripts_added(core, &value)
            }
            _ => Vec::new(),
        }
    }

    fn on_scripts_added(&self, core: &mut Core, value: &str) -> Vec<Effect> {
        let added: ScriptsAdded = match serde_json::from_str(value) {
            Ok(added) => added,
            Err(e) => {
                warn!(error = %e, "Dropping malformed scripts-added payload");
                return Vec::new();
            }
        };

        let paths: Vec<String> = {
            let mut seen = HashSet::new();
            added
                .nodes
                .iter()
                .filter(|n| seen.insert(n.path.as_str()))
                .map(|n| n.path.clone())
                .collect()
        };

        debug!(nodes = added.nodes.len(), files = paths.len(), "Scripts added");
        core.store.add_nodes(added.nodes);

        paths
            .into_iter()
            .filter_map(|path| core.machine.announce_script(path))
            .collect()
    }

    fn run_effect(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::Emit(event) => self.events.emit(event),
            Effect::StartRelay => {
                let inner = self.clone();
                tokio::spawn(async move {
                    let trigger = match inner.relay.start().await {
                        Ok(address) => Trigger::ProxyStarted(address),
                        Err(e) => Trigger::ProxyFailed(e.to_string()),
                    };
                    inner.send(Input::Trigger(trigger));
                });
            }
            Effect::ConnectTracer { attempt } => {
                let inner = self.clone();
                tokio::spawn(async move {
                    let expression = inner.config.tracer_expression.as_str();
                    let object_id = match inner.runtime.evaluate(expression).await {
                        Ok(res) if !res.was_thrown => res.result.and_then(|r| r.object_id),
                        Ok(res) => {
                            warn!(result = ?res.result, "Failed to get tracer instance");
                            None
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to get tracer instance");
                            None
                        }
                    };
                    let trigger = match object_id {
                        Some(object_id) => Trigger::TracerConnected { attempt, object_id },
                        None => Trigger::TracerConnectFailed { attempt },
                    };
                    inner.send(Input::Trigger(trigger));
                });
            }
            Effect::TrackHits { attempt, tracer } => {
                let inner = self.clone();
                tokio::spawn(async move {
                    let trigger = match inner.gateway.track_hits(tracer.as_deref()).await {
                        Ok(handle) => Trigger::TrackingHits { attempt, handle },
                        Err(_) => Trigger::TrackingHitsFailed { attempt },
                    };
                    inner.send(Input::Trigger(trigger));
                });
            }
        }
    }
}

/// Replay an inspector session that came up while the relay was starting.
///
/// `waitingForProxy` ignores inspector triggers, so a link that connected
/// first would otherwise leave the machine in `disconnected` until the next
/// reconnect.
fn catch_up(core: &mut Core, effects: &mut Vec<Effect>) {
    if !core.listening || core.machine.state() != ConnectionState::Disconnected {
        return;
    }
    debug!(document = core.document_loaded, "Inspector connected before relay, catching up");
    effects.extend(core.machine.handle(Trigger::InspectorConnected, &mut core.store));
    if core.document_loaded {
        effects.extend(core.machine.handle(Trigger::GotDocument, &mut core.store));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{FixedRelay, RelayAddress};
    use crate::runtime::RemoteResult;
    use crate::testing::{FailingRelay, ScriptedRuntime, SlowRelay};
    use serde_json::json;
    use std::time::Duration;

    const ATTR: &str = "data-tracer-scripts-added";

    struct Harness {
        agent: Agent,
        runtime: Arc<ScriptedRuntime>,
        tx: mpsc::UnboundedSender<InspectorNotification>,
        events: Arc<Mutex<Vec<AgentEvent>>>,
    }

    impl Harness {
        fn new() -> Self {
            let runtime = Arc::new(ScriptedRuntime::new());
            runtime.respond_eval("tracer.connect()", RemoteResult::object("tracer-1"));
            runtime.respond("tracer.trackHits", RemoteResult::value(json!("hits-1")));
            Self::with(runtime, Arc::new(FixedRelay::new(RelayAddress::new("127.0.0.1", 8123))))
        }

        fn with(runtime: Arc<ScriptedRuntime>, relay: Arc<dyn RelayLauncher>) -> Self {
            let agent = Agent::new(AgentConfig::default(), runtime.clone(), relay);
            let events = Arc::new(Mutex::new(Vec::new()));
            let sink = events.clone();
            agent.on(move |e| sink.lock().unwrap().push(e.clone()));

            let (tx, rx) = mpsc::unbounded_channel();
            agent.init(rx).unwrap();
            Self {
                agent,
                runtime,
                tx,
                events,
            }
        }

        fn notify(&self, n: InspectorNotification) {
            self.tx.send(n).unwrap();
        }

        fn scripts_added(&self, nodes: Value) {
            self.notify(InspectorNotification::AttributeModified {
                name: ATTR.to_string(),
                value: json!({ "nodes": nodes }).to_string(),
            });
        }

        fn events(&self) -> Vec<AgentEvent> {
            self.events.lock().unwrap().clone()
        }

        async fn wait_for_state(&self, state: ConnectionState) {
            self.wait_until(|| self.agent.current_state() == state).await;
        }

        async fn wait_until(&self, mut cond: impl FnMut() -> bool) {
            for _ in 0..200 {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!(
                "condition not reached; state = {:?}, events = {:?}",
                self.agent.current_state(),
                self.events()
            );
        }

        async fn connect(&self) {
            self.wait_for_state(ConnectionState::Disconnected).await;
            self.notify(InspectorNotification::Connected);
            self.notify(InspectorNotification::DocumentLoaded);
            self.wait_for_state(ConnectionState::Connected).await;
        }
    }

    fn node(id: &str, path: &str, start: u32, end: u32) -> Value {
        json!({
            "id": id,
            "path": path,
            "start": {"line": 0, "column": start},
            "end": {"line": 0, "column": end},
            "type": "function",
            "name": id,
        })
    }

    #[tokio::test]
    async fn test_happy_path_connects() {
        let h = Harness::new();
        h.connect().await;

        assert!(h.agent.is_ready());
        assert_eq!(h.events(), vec![AgentEvent::Connect]);
        assert_eq!(h.agent.relay_prefix().as_deref(), Some("http://127.0.0.1:8123"));
        assert_eq!(h.runtime.evaluations(), vec!["tracer.connect()".to_string()]);
    }

    #[tokio::test]
    async fn test_init_twice_fails() {
        let h = Harness::new();
        let (_tx, rx) = mpsc::unbounded_channel();
        assert!(h.agent.init(rx).is_err());
    }

    #[tokio::test]
    async fn test_inspector_up_before_relay_still_connects() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.respond_eval("tracer.connect()", RemoteResult::object("tracer-1"));
        runtime.respond("tracer.trackHits", RemoteResult::value(json!("hits-1")));
        let relay = SlowRelay::new(
            RelayAddress::new("127.0.0.1", 8123),
            Duration::from_millis(50),
        );
        let h = Harness::with(runtime, Arc::new(relay));

        h.notify(InspectorNotification::Connected);
        h.notify(InspectorNotification::DocumentLoaded);
        h.wait_until(|| h.agent.relay_prefix().is_some()).await;
        h.wait_for_state(ConnectionState::Connected).await;

        assert_eq!(h.events(), vec![AgentEvent::Connect]);
        assert_eq!(h.runtime.evaluations().len(), 1);
    }

    #[tokio::test]
    async fn test_inspector_up_before_relay_without_document_waits_for_page() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let relay = SlowRelay::new(
            RelayAddress::new("127.0.0.1", 8123),
            Duration::from_millis(50),
        );
        let h = Harness::with(runtime, Arc::new(relay));

        h.notify(InspectorNotification::Connected);
        h.wait_for_state(ConnectionState::WaitingForPage).await;
        assert!(h.agent.relay_prefix().is_some());
        assert!(h.runtime.evaluations().is_empty());
    }

    #[tokio::test]
    async fn test_scripts_before_connect_are_queued() {
        let h = Harness::new();
        h.runtime.pause();
        h.wait_for_state(ConnectionState::Disconnected).await;
        h.notify(InspectorNotification::Connected);
        h.notify(InspectorNotification::DocumentLoaded);
        h.wait_for_state(ConnectionState::InitializingHits).await;

        h.scripts_added(json!([
            node("a1", "a.js", 0, 10),
            node("b1", "b.js", 0, 10),
            node("a2", "a.js", 20, 30),
        ]));
        h.wait_until(|| h.agent.functions_in_file("a.js").len() == 2).await;
        assert!(h.events().is_empty());

        h.runtime.resume();
        h.wait_for_state(ConnectionState::Connected).await;
        assert_eq!(
            h.events(),
            vec![
                AgentEvent::Connect,
                AgentEvent::ReceivedScriptInfo("a.js".to_string()),
                AgentEvent::ReceivedScriptInfo("b.js".to_string()),
            ]
        );
        assert_eq!(h.agent.functions_in_file("b.js").len(), 1);
    }

    #[tokio::test]
    async fn test_reload_drops_queued_scripts() {
        let h = Harness::new();
        h.runtime.pause();
        h.wait_for_state(ConnectionState::Disconnected).await;
        h.notify(InspectorNotification::Connected);
        h.notify(InspectorNotification::DocumentLoaded);
        h.wait_for_state(ConnectionState::InitializingHits).await;
        h.scripts_added(json!([node("a1", "a.js", 0, 10)]));
        h.wait_until(|| h.agent.function_with_id("a1").is_some()).await;

        h.notify(InspectorNotification::DocumentLoaded);
        h.wait_until(|| h.agent.function_with_id("a1").is_none()).await;
        h.runtime.resume();
        h.wait_for_state(ConnectionState::Connected).await;
        assert_eq!(h.events(), vec![AgentEvent::Connect]);
    }

    #[tokio::test]
    async fn test_script_info_when_connected() {
        let h = Harness::new();
        h.connect().await;

        h.scripts_added(json!([
            node("a1", "a.js", 0, 100),
            node("a2", "a.js", 10, 50),
            node("b1", "b.js", 0, 10),
        ]));
        h.wait_until(|| h.events().len() == 3).await;

        assert_eq!(
            h.events(),
            vec![
                AgentEvent::Connect,
                AgentEvent::ReceivedScriptInfo("a.js".to_string()),
                AgentEvent::ReceivedScriptInfo("b.js".to_string()),
            ]
        );
        let ids: Vec<String> = h
            .agent
            .functions_containing("a.js", 0, 20)
            .into_iter()
            .map(|n| n.id)
            .collect();
        assert_eq!(ids, vec!["a1", "a2"]);
        assert_eq!(h.agent.function_with_id("b1").unwrap().path, "b.js");
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() {
        let h = Harness::new();
        h.connect().await;

        h.notify(InspectorNotification::AttributeModified {
            name: ATTR.to_string(),
            value: "{not json".to_string(),
        });
        h.notify(InspectorNotification::AttributeModified {
            name: "data-unrelated".to_string(),
            value: json!({"nodes": [node("x", "x.js", 0, 1)]}).to_string(),
        });
        h.scripts_added(json!([node("ok", "ok.js", 0, 1)]));
        h.wait_until(|| h.events().len() == 2).await;

        assert!(h.agent.is_ready());
        assert!(h.agent.function_with_id("x").is_none());
        assert!(h.agent.function_with_id("ok").is_some());
    }

    #[tokio::test]
    async fn test_disconnect_resets_everything() {
        let h = Harness::new();
        h.connect().await;
        h.runtime.respond(
            "tracer.hitCountDeltas",
            RemoteResult::value(json!({"functions": {"a1": 3}})),
        );
        h.scripts_added(json!([node("a1", "a.js", 0, 10)]));
        h.wait_until(|| h.agent.function_with_id("a1").is_some()).await;
        h.agent.refresh_hit_counts().await.unwrap();
        assert_eq!(h.agent.cached_hit_counts().total("a1"), 3);

        h.notify(InspectorNotification::Disconnected);
        h.wait_for_state(ConnectionState::Disconnected).await;

        assert_eq!(
            h.events(),
            vec![
                AgentEvent::Connect,
                AgentEvent::ReceivedScriptInfo("a.js".to_string()),
                AgentEvent::Disconnect,
            ]
        );
        assert!(h.agent.function_with_id("a1").is_none());
        assert!(h.agent.functions_in_file("a.js").is_empty());
        assert!(h.agent.cached_hit_counts().is_empty());

        // Page notifications are ignored while the inspector is down.
        h.notify(InspectorNotification::DocumentLoaded);
        h.scripts_added(json!([node("late", "late.js", 0, 1)]));
        h.notify(InspectorNotification::Connected);
        h.wait_for_state(ConnectionState::WaitingForPage).await;
        assert!(h.agent.function_with_id("late").is_none());
    }

    #[tokio::test]
    async fn test_refresh_hit_counts_accumulates() {
        let h = Harness::new();
        h.connect().await;
        h.runtime.respond(
            "tracer.hitCountDeltas",
            RemoteResult::value(json!({"functions": {"n1": 3}})),
        );
        h.runtime.respond(
            "tracer.hitCountDeltas",
            RemoteResult::value(json!({"functions": {"n1": 2, "n2": 5}, "callSites": {"c1": 1}})),
        );

        let (_, first) = h.agent.refresh_hit_counts().await.unwrap();
        assert_eq!(first.functions["n1"], 3);
        let (totals, deltas) = h.agent.refresh_hit_counts().await.unwrap();
        assert_eq!(deltas.functions["n1"], 2);
        assert_eq!(totals.functions["n1"], 5);
        assert_eq!(totals.functions["n2"], 5);
        assert_eq!(totals.call_sites["c1"], 1);
        h.agent
            .with_cached_hit_counts(|live| assert_eq!(live.total("n2"), 5));

        let call = h.runtime.calls().pop().unwrap();
        assert_eq!(call.declaration, "tracer.hitCountDeltas");
        assert_eq!(call.object_id, "tracer-1");
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_store_untouched() {
        let h = Harness::new();
        h.connect().await;
        h.runtime.respond("tracer.hitCountDeltas", RemoteResult::thrown());

        assert!(h.agent.refresh_hit_counts().await.is_err());
        assert!(h.agent.cached_hit_counts().is_empty());
    }

    #[tokio::test]
    async fn test_remote_fetches_fail_when_not_connected() {
        let h = Harness::new();
        h.wait_for_state(ConnectionState::Disconnected).await;

        assert!(h.agent.track_hits().await.is_err());
        assert!(h.agent.refresh_hit_counts().await.is_err());
        assert!(h.agent.track_logs(json!({"ids": ["n1"]})).await.is_err());
        assert!(h.agent.refresh_logs(&json!("logs-1"), 10).await.is_err());
        assert!(h.agent.backtrace(json!({"invocationId": "i1"})).await.is_err());
        assert!(h.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_log_and_backtrace_pass_through() {
        let h = Harness::new();
        h.connect().await;
        h.runtime.respond("tracer.trackLogs", RemoteResult::value(json!("logs-1")));
        h.runtime.respond("tracer.logDelta", RemoteResult::value(json!([{"id": "i1"}])));
        h.runtime.respond("tracer.backtrace", RemoteResult::value(json!([{"id": "i0"}])));

        let handle = h.agent.track_logs(json!({"ids": ["a1"]})).await.unwrap();
        assert_eq!(handle, json!("logs-1"));
        let entries = h.agent.refresh_logs(&handle, 50).await.unwrap();
        assert_eq!(entries, json!([{"id": "i1"}]));
        let frames = h
            .agent
            .backtrace(json!({"invocationId": "i1", "range": [0, 10]}))
            .await
            .unwrap();
        assert_eq!(frames, json!([{"id": "i0"}]));
    }

    #[tokio::test]
    async fn test_tracer_missing_falls_back_to_disconnected() {
        let runtime = Arc::new(ScriptedRuntime::new());
        runtime.respond_eval("tracer.connect()", RemoteResult::thrown());
        let h = Harness::with(
            runtime,
            Arc::new(FixedRelay::new(RelayAddress::new("127.0.0.1", 1))),
        );
        h.wait_for_state(ConnectionState::Disconnected).await;
        h.notify(InspectorNotification::Connected);
        h.notify(InspectorNotification::DocumentLoaded);
        h.wait_until(|| h.runtime.evaluations().len() == 1).await;
        h.wait_for_state(ConnectionState::Disconnected).await;
        assert!(h.events().is_empty());
    }

    #[tokio::test]
    async fn test_relay_failure_surfaces_event() {
        let runtime = Arc::new(ScriptedRuntime::new());
        let h = Harness::with(runtime, Arc::new(FailingRelay));
        h.wait_until(|| !h.events().is_empty()).await;

        match &h.events()[0] {
            AgentEvent::RelayFailed(reason) => assert!(reason.contains("9805")),
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(h.agent.current_state(), ConnectionState::WaitingForProxy);
        assert!(h.agent.relay_prefix().is_none());
    }

    #[tokio::test]
    async fn test_reload_while_connected_reconnects() {
        let h = Harness::new();
        h.connect().await;

        h.notify(InspectorNotification::DocumentLoaded);
        h.wait_until(|| h.events().len() == 3).await;
        assert_eq!(
            h.events(),
            vec![AgentEvent::Connect, AgentEvent::Disconnect, AgentEvent::Connect]
        );
        assert_eq!(h.runtime.evaluations().len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let h = Harness::new();
        let mut rx = h.agent.subscribe();
        h.connect().await;
        assert_eq!(rx.recv().await.unwrap(), AgentEvent::Connect);
    }
}
