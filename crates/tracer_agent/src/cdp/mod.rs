//! Chrome DevTools Protocol link to the inspected page.
//!
//! - [`client`] - WebSocket transport with request/response correlation
//! - [`link`] - [`CdpRuntime`] and the reconnecting [`InspectorLink`] pump

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod client;
pub mod link;

pub use client::InspectorClient;
pub use link::{CdpRuntime, InspectorLink};

// ============================================================================
// CDP Message Types
// ============================================================================

/// CDP message sent to the inspector
#[derive(Debug, Clone, Serialize)]
pub struct CdpRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Any message from the inspector: a response (has `id`) or an event (has `method`)
#[derive(Debug, Clone, Deserialize)]
pub struct CdpIncoming {
    pub id: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<CdpError>,
    pub method: Option<String>,
    pub params: Option<Value>,
}

/// CDP error in response
#[derive(Debug, Clone, Deserialize)]
pub struct CdpError {
    pub code: i32,
    pub message: String,
}

/// Inspector event
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub params: Value,
}

/// Method and event names used by the link
pub mod methods {
    pub const PAGE_ENABLE: &str = "Page.enable";
    pub const DOM_ENABLE: &str = "DOM.enable";
    pub const DOM_GET_DOCUMENT: &str = "DOM.getDocument";
    pub const RUNTIME_EVALUATE: &str = "Runtime.evaluate";
    pub const RUNTIME_CALL_FUNCTION_ON: &str = "Runtime.callFunctionOn";

    pub const PAGE_LOAD_EVENT_FIRED: &str = "Page.loadEventFired";
    pub const DOM_ATTRIBUTE_MODIFIED: &str = "DOM.attributeModified";
}
