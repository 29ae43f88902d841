//! Inspector link: the [`InspectorRuntime`] implementation over CDP and the
//! connect/reconnect loop that turns page activity into notifications.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::{methods, CdpEvent, InspectorClient};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::runtime::{
    CallArgument, InspectorNotification, InspectorRuntime, RemoteObject, RemoteResult,
};

// ============================================================================
// CdpRuntime
// ============================================================================

/// [`InspectorRuntime`] backed by whichever CDP client is currently attached.
///
/// Calls made while no client is attached fail with `NotConnected`.
#[derive(Default)]
pub struct CdpRuntime {
    client: RwLock<Option<Arc<InspectorClient>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteResponse {
    #[serde(default)]
    result: Option<RemoteObject>,
    #[serde(default)]
    exception_details: Option<Value>,
    #[serde(default)]
    was_thrown: Option<bool>,
}

/// Decode a `Runtime.evaluate`/`Runtime.callFunctionOn` result
pub(crate) fn parse_remote_result(value: Value) -> Result<RemoteResult> {
    let response: RemoteResponse = serde_json::from_value(value)
        .map_err(|e| AgentError::protocol(format!("unexpected runtime result: {}", e)))?;
    Ok(RemoteResult {
        was_thrown: response.was_thrown.unwrap_or(false) || response.exception_details.is_some(),
        result: response.result,
    })
}

impl CdpRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn attach(&self, client: Arc<InspectorClient>) {
        *self.client.write().await = Some(client);
    }

    pub async fn detach(&self) {
        *self.client.write().await = None;
    }

    async fn client(&self) -> Result<Arc<InspectorClient>> {
        self.client
            .read()
            .await
            .clone()
            .ok_or_else(|| AgentError::not_connected("inspector not connected"))
    }
}

#[async_trait]
impl InspectorRuntime for CdpRuntime {
    async fn evaluate(&self, expression: &str) -> Result<RemoteResult> {
        let client = self.client().await?;
        let value = client
            .send_method(
                methods::RUNTIME_EVALUATE,
                json!({ "expression": expression }),
            )
            .await?;
        parse_remote_result(value)
    }

    async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        args: Vec<CallArgument>,
    ) -> Result<RemoteResult> {
        let client = self.client().await?;
        let value = client
            .send_method(
                methods::RUNTIME_CALL_FUNCTION_ON,
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration,
                    "arguments": args,
                    "returnByValue": true,
                    "silent": true,
                }),
            )
            .await?;
        parse_remote_result(value)
    }

    async fn request_document(&self) -> Result<()> {
        let client = self.client().await?;
        client
            .send_method(methods::DOM_GET_DOCUMENT, json!({ "depth": -1 }))
            .await?;
        Ok(())
    }
}

// ============================================================================
// InspectorLink
// ============================================================================

/// Map a CDP event to the notification the agent cares about
pub(crate) fn notification_for(event: &CdpEvent) -> Option<InspectorNotification> {
    match event.method.as_str() {
        methods::PAGE_LOAD_EVENT_FIRED => Some(InspectorNotification::DocumentLoaded),
        methods::DOM_ATTRIBUTE_MODIFIED => {
            let name = event.params.get("name")?.as_str()?;
            let value = event.params.get("value")?.as_str()?;
            Some(InspectorNotification::AttributeModified {
                name: name.to_string(),
                value: value.to_string(),
            })
        }
        _ => None,
    }
}

/// Keeps an inspector connection up and reports its lifecycle.
///
/// Each session sends `Connected`, an initial `DocumentLoaded`, then page
/// notifications, and finally `Disconnected` when the socket closes. The
/// loop reconnects after `reconnect_delay` until the receiver is dropped.
pub struct InspectorLink {
    url: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    reconnect_delay: Duration,
    runtime: Arc<CdpRuntime>,
}

impl InspectorLink {
    pub fn new(config: &AgentConfig, runtime: Arc<CdpRuntime>) -> Self {
        Self {
            url: config.inspector_url.clone(),
            connect_timeout: config.connect_timeout(),
            request_timeout: config.request_timeout(),
            reconnect_delay: config.reconnect_delay(),
            runtime,
        }
    }

    pub fn spawn(self, tx: mpsc::UnboundedSender<InspectorNotification>) -> JoinHandle<()> {
        tokio::spawn(self.run(tx))
    }

    pub async fn run(self, tx: mpsc::UnboundedSender<InspectorNotification>) {
        loop {
            match InspectorClient::connect(&self.url, self.connect_timeout, self.request_timeout)
                .await
            {
                Ok((client, events)) => {
                    info!(url = %self.url, "Inspector connected");
                    if let Err(e) = self.session(Arc::new(client), events, &tx).await {
                        warn!(url = %self.url, error = %e, "Inspector session ended");
                    }
                }
                Err(e) => {
                    debug!(url = %self.url, error = %e, "Inspector not reachable");
                }
            }

            if tx.is_closed() {
                debug!("Notification receiver dropped, stopping inspector link");
                break;
            }
            tokio::time::sleep(self.reconnect_delay).await;
        }
    }

    async fn session(
        &self,
        client: Arc<InspectorClient>,
        mut events: mpsc::Receiver<CdpEvent>,
        tx: &mpsc::UnboundedSender<InspectorNotification>,
    ) -> Result<()> {
        for method in [methods::PAGE_ENABLE, methods::DOM_ENABLE] {
            if let Err(e) = client.send_method(method, json!({})).await {
                client.close().await;
                return Err(e);
            }
        }
        self.runtime.attach(client.clone()).await;

        let _ = tx.send(InspectorNotification::Connected);
        self.document_loaded(tx).await;

        while let Some(event) = events.recv().await {
            match notification_for(&event) {
                Some(InspectorNotification::DocumentLoaded) => self.document_loaded(tx).await,
                Some(notification) => {
                    if tx.send(notification).is_err() {
                        break;
                    }
                }
                None => trace!(method = %event.method, "Unhandled inspector event"),
            }
        }

        self.runtime.detach().await;
        client.close().await;
        info!(url = %self.url, "Inspector disconnected");
        let _ = tx.send(InspectorNotification::Disconnected);
        Ok(())
    }

    /// Request the DOM so attribute events flow, then report the document
    async fn document_loaded(&self, tx: &mpsc::UnboundedSender<InspectorNotification>) {
        if let Err(e) = self.runtime.request_document().await {
            warn!(error = %e, "DOM.getDocument failed");
        }
        let _ = tx.send(InspectorNotification::DocumentLoaded);
    }
}

// ============================================================================
// Tests
// ============================================================================
