//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::{AgentError, Result};
use crate::relay::{RelayAddress, RelayLauncher};
use crate::runtime::{CallArgument, InspectorRuntime, RemoteResult};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub object_id: String,
    pub declaration: String,
    pub args: Vec<CallArgument>,
}

/// Runtime answering from per-key response queues.
///
/// Remote calls are keyed by declaration, evaluations by expression. The
/// last response queued for a key keeps answering once the others are used
/// up. A key with no responses fails with a transport error.
pub struct ScriptedRuntime {
    calls: Mutex<Vec<RecordedCall>>,
    evaluations: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, VecDeque<RemoteResult>>>,
    eval_responses: Mutex<HashMap<String, VecDeque<RemoteResult>>>,
    paused: watch::Sender<bool>,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            evaluations: Mutex::new(Vec::new()),
            responses: Mutex::new(HashMap::new()),
            eval_responses: Mutex::new(HashMap::new()),
            paused: watch::Sender::new(false),
        }
    }

    pub fn respond(&self, declaration: &str, result: RemoteResult) {
        push(&self.responses, declaration, result);
    }

    pub fn respond_eval(&self, expression: &str, result: RemoteResult) {
        push(&self.eval_responses, expression, result);
    }

    /// Hold remote calls until [`resume`](Self::resume)
    pub fn pause(&self) {
        self.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.paused.send_replace(false);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn evaluations(&self) -> Vec<String> {
        self.evaluations.lock().unwrap().clone()
    }
}

fn push(map: &Mutex<HashMap<String, VecDeque<RemoteResult>>>, key: &str, result: RemoteResult) {
    map.lock()
        .unwrap()
        .entry(key.to_string())
        .or_default()
        .push_back(result);
}

fn next(map: &Mutex<HashMap<String, VecDeque<RemoteResult>>>, key: &str) -> Result<RemoteResult> {
    let mut map = map.lock().unwrap();
    let queue = map
        .get_mut(key)
        .filter(|q| !q.is_empty())
        .ok_or_else(|| AgentError::transport(format!("no scripted response for {}", key)))?;
    if queue.len() > 1 {
        Ok(queue.pop_front().unwrap())
    } else {
        Ok(queue[0].clone())
    }
}

#[async_trait]
impl InspectorRuntime for ScriptedRuntime {
    async fn evaluate(&self, expression: &str) -> Result<RemoteResult> {
        self.evaluations.lock().unwrap().push(expression.to_string());
        next(&self.eval_responses, expression)
    }

    async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        args: Vec<CallArgument>,
    ) -> Result<RemoteResult> {
        self.calls.lock().unwrap().push(RecordedCall {
            object_id: object_id.to_string(),
            declaration: declaration.to_string(),
            args,
        });
        let mut paused = self.paused.subscribe();
        let _ = paused.wait_for(|p| !*p).await;
        next(&self.responses, declaration)
    }

    async fn request_document(&self) -> Result<()> {
        Ok(())
    }
}

/// Relay whose start always fails
pub struct FailingRelay;

#[async_trait]
impl RelayLauncher for FailingRelay {
    async fn start(&self) -> Result<RelayAddress> {
        Err(AgentError::relay_start("relay exited before reporting an address"))
    }
}

/// Relay that reports its address after a delay
pub struct SlowRelay {
    address: RelayAddress,
    delay: Duration,
}

impl SlowRelay {
    pub fn new(address: RelayAddress, delay: Duration) -> Self {
        Self { address, delay }
    }
}

#[async_trait]
impl RelayLauncher for SlowRelay {
    async fn start(&self) -> Result<RelayAddress> {
        tokio::time::sleep(self.delay).await;
        Ok(self.address.clone())
    }
}
