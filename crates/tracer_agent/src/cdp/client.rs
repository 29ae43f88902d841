//! CDP WebSocket client.
//!
//! One client per inspector connection. Requests are correlated with their
//! responses by id; events are forwarded on the channel returned from
//! [`InspectorClient::connect`], which closes when the socket does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, trace, warn};

use super::{CdpEvent, CdpIncoming, CdpRequest};
use crate::error::{AgentError, Result};

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

pub struct InspectorClient {
    ws_tx: mpsc::Sender<Message>,
    pending: PendingMap,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
}

impl InspectorClient {
    /// Connect to the inspector WebSocket at `url`
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<(Self, mpsc::Receiver<CdpEvent>)> {
        debug!(url = %url, "Connecting to inspector");

        let ws_stream = timeout(connect_timeout, connect_async(url))
            .await
            .map_err(|_| AgentError::timeout(format!("connecting to {}", url)))?
            .map_err(|e| AgentError::transport(e.to_string()))?
            .0;

        let (mut ws_write, mut ws_read) = ws_stream.split();

        let (ws_tx, mut ws_rx) = mpsc::channel::<Message>(64);
        let (event_tx, event_rx) = mpsc::channel::<CdpEvent>(256);

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let connected = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(msg) = ws_rx.recv().await {
                if let Err(e) = ws_write.send(msg).await {
                    warn!(error = %e, "Inspector socket write failed");
                    break;
                }
            }
        });

        let reader_pending = pending.clone();
        let reader_connected = connected.clone();
        tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        if !dispatch(&text, &reader_pending, &event_tx).await {
                            debug!("Inspector event receiver dropped");
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Inspector closed the socket");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Inspector socket read failed");
                        break;
                    }
                }
            }

            reader_connected.store(false, Ordering::SeqCst);
            for (_, reply) in reader_pending.lock().await.drain() {
                let _ = reply.send(Err(AgentError::transport("connection closed")));
            }
        });

        debug!("Connected to inspector");

        Ok((
            Self {
                ws_tx,
                pending,
                next_id: AtomicU64::new(1),
                connected,
                request_timeout,
            },
            event_rx,
        ))
    }

    /// Send a CDP method call and wait for its result
    pub async fn send_method(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(AgentError::transport("connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = CdpRequest {
            id,
            method: method.to_string(),
            params: if params.is_null() || params == serde_json::json!({}) {
                None
            } else {
                Some(params)
            },
        };
        let json = serde_json::to_string(&request)
            .map_err(|e| AgentError::protocol(e.to_string()))?;

        trace!(id = id, method = %method, "Sending inspector request");

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = self.ws_tx.send(Message::Text(json)).await {
            self.pending.lock().await.remove(&id);
            return Err(AgentError::transport(e.to_string()));
        }

        match timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(AgentError::transport("connection closed")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(AgentError::timeout(format!("{} (id {})", method, id)))
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.ws_tx.send(Message::Close(None)).await;
    }
}

/// Route one text frame to its waiting request or to the event channel.
///
/// Returns false once the event receiver is gone.
async fn dispatch(text: &str, pending: &PendingMap, event_tx: &mpsc::Sender<CdpEvent>) -> bool {
    trace!(len = text.len(), "Inspector frame");
    let incoming: CdpIncoming = match serde_json::from_str(text) {
        Ok(incoming) => incoming,
        Err(e) => {
            warn!(error = %e, "Unparseable inspector frame");
            return true;
        }
    };

    match (incoming.id, incoming.method) {
        (Some(id), _) => {
            let Some(reply) = pending.lock().await.remove(&id) else {
                trace!(id, "Response for an abandoned request");
                return true;
            };
            let result = match incoming.error {
                Some(err) => Err(AgentError::protocol(format!("{} ({})", err.message, err.code))),
                None => Ok(incoming.result.unwrap_or(Value::Null)),
            };
            let _ = reply.send(result);
            true
        }
        (None, Some(method)) => {
            let event = CdpEvent {
                method,
                params: incoming.params.unwrap_or(Value::Null),
            };
            event_tx.send(event).await.is_ok()
        }
        (None, None) => true,
    }
}
