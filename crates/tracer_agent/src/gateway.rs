//! Remote calls on the attached tracer object.
//!
//! Every call names a property of the in-page tracer and is issued with
//! `Runtime.callFunctionOn` against the tracer handle. A call that throws or
//! has no handle to call on yields `Err`, as does one whose result carries no
//! value at all (a remote `undefined`). A `null` result is a value. Errors are
//! logged here and never escalate further.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{trace, warn};

use crate::error::{AgentError, Result};
use crate::runtime::{CallArgument, InspectorRuntime};
use crate::store::HitCounts;

/// Tracer operation names
pub mod ops {
    pub const TRACK_HITS: &str = "trackHits";
    pub const HIT_COUNT_DELTAS: &str = "hitCountDeltas";
    pub const TRACK_LOGS: &str = "trackLogs";
    pub const LOG_DELTA: &str = "logDelta";
    pub const BACKTRACE: &str = "backtrace";
}

#[derive(Clone)]
pub struct RemoteCallGateway {
    runtime: Arc<dyn InspectorRuntime>,
}

impl RemoteCallGateway {
    pub fn new(runtime: Arc<dyn InspectorRuntime>) -> Self {
        Self { runtime }
    }

    /// Invoke `tracer.<function_name>(args...)` on the tracer handle
    pub async fn invoke(
        &self,
        tracer: Option<&str>,
        function_name: &str,
        args: Vec<Value>,
    ) -> Result<Value> {
        let Some(object_id) = tracer else {
            warn!(function = %function_name, "No tracer handle, skipping remote call");
            return Err(AgentError::not_connected(format!(
                "no tracer handle for {}",
                function_name
            )));
        };

        let declaration = format!("tracer.{}", function_name);
        let args: Vec<CallArgument> = args.into_iter().map(CallArgument::from).collect();
        trace!(function = %function_name, argc = args.len(), "Invoking tracer");

        let res = match self
            .runtime
            .call_function_on(object_id, &declaration, args)
            .await
        {
            Ok(res) => res,
            Err(e) => {
                warn!(function = %function_name, error = %e, "Runtime.callFunctionOn failed");
                return Err(e);
            }
        };

        if res.was_thrown {
            warn!(
                function = %function_name,
                result = ?res.result,
                "Runtime.callFunctionOn exception"
            );
            return Err(AgentError::remote_exception(format!(
                "tracer.{} threw",
                function_name
            )));
        }

        match res.result.and_then(|r| r.value) {
            Some(value) => Ok(value),
            None => {
                warn!(function = %function_name, "Tracer returned no value");
                Err(AgentError::remote_exception(format!(
                    "tracer.{} returned no value",
                    function_name
                )))
            }
        }
    }

    /// Start a hit-tracking session, returning its handle
    pub async fn track_hits(&self, tracer: Option<&str>) -> Result<Value> {
        self.invoke(tracer, ops::TRACK_HITS, vec![]).await
    }

    /// Hit counts accumulated since the last call for `handle`
    pub async fn hit_count_deltas(
        &self,
        tracer: Option<&str>,
        handle: &Value,
    ) -> Result<HitCounts> {
        let value = self
            .invoke(tracer, ops::HIT_COUNT_DELTAS, vec![handle.clone()])
            .await?;
        serde_json::from_value(value).map_err(|e| {
            warn!(error = %e, "Undecodable hit count deltas");
            AgentError::malformed_payload(e.to_string())
        })
    }

    pub async fn track_logs(&self, tracer: Option<&str>, query: Value) -> Result<Value> {
        self.invoke(tracer, ops::TRACK_LOGS, vec![query]).await
    }

    pub async fn log_delta(
        &self,
        tracer: Option<&str>,
        handle: &Value,
        max_results: u32,
    ) -> Result<Value> {
        self.invoke(
            tracer,
            ops::LOG_DELTA,
            vec![handle.clone(), json!(max_results)],
        )
        .await
    }

    pub async fn backtrace(&self, tracer: Option<&str>, options: Value) -> Result<Value> {
        self.invoke(tracer, ops::BACKTRACE, vec![options]).await
    }
}

// ============================================================================
// Tests
// ============================================================================
