//! Interface to the inspected runtime.
//!
//! The agent never talks to a transport directly. Expression evaluation and
//! remote function calls go through [`InspectorRuntime`], which the CDP link
//! implements for real pages and tests implement with scripted responses.

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Remote object reference returned by evaluation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteObject {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    /// `Some(Value::Null)` for a remote `null`, `None` when the field is absent
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// Outcome of `Runtime.evaluate` / `Runtime.callFunctionOn`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteResult {
    /// The expression or function threw inside the page
    pub was_thrown: bool,
    pub result: Option<RemoteObject>,
}

impl RemoteResult {
    pub fn value(value: Value) -> Self {
        Self {
            was_thrown: false,
            result: Some(RemoteObject {
                value: Some(value),
                ..Default::default()
            }),
        }
    }

    pub fn object(object_id: impl Into<String>) -> Self {
        Self {
            was_thrown: false,
            result: Some(RemoteObject {
                kind: Some("object".to_string()),
                object_id: Some(object_id.into()),
                value: None,
            }),
        }
    }

    pub fn thrown() -> Self {
        Self {
            was_thrown: true,
            result: None,
        }
    }
}

/// One positional argument for a remote call, sent as `{value: ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallArgument {
    pub value: Value,
}

impl From<Value> for CallArgument {
    fn from(value: Value) -> Self {
        Self { value }
    }
}

/// Remote runtime collaborator
#[async_trait]
pub trait InspectorRuntime: Send + Sync {
    /// Evaluate an expression in the page's global scope
    async fn evaluate(&self, expression: &str) -> Result<RemoteResult>;

    /// Call `declaration` with `this` bound to the remote object
    async fn call_function_on(
        &self,
        object_id: &str,
        declaration: &str,
        args: Vec<CallArgument>,
    ) -> Result<RemoteResult>;

    /// Ask the page for its document so DOM notifications are delivered
    async fn request_document(&self) -> Result<()>;
}

/// Notifications from the inspector link, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InspectorNotification {
    /// The inspector link came up
    Connected,
    /// The inspector link went away
    Disconnected,
    /// The page loaded a new document
    DocumentLoaded,
    /// `DOM.attributeModified`
    AttributeModified { name: String, value: String },
}
