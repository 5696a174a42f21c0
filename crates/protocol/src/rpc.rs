//! JSON-RPC 2.0 framing
//!
//! Requests carry a client-allocated numeric id; responses echo it.
//! Push notifications have no envelope id — their subscription token
//! rides inside `params.id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string sent on every outbound frame.
pub const JSONRPC_VERSION: &str = "2.0";

/// An outbound request frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Request {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// Error body of a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound response frame. Exactly one of `result` / `error` is set
/// on a well-formed frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

/// A server-initiated push frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub params: Value,
}

impl Notification {
    /// The subscription token this push is addressed to, if present.
    pub fn subscription_id(&self) -> Option<&str> {
        self.params.get("id").and_then(Value::as_str)
    }
}

/// Any frame the server may send. Responses carry an `id` at the
/// envelope level; notifications carry a `method` and no envelope id.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Response(Response),
    Notification(Notification),
}

/// Parse a raw text frame into an inbound message.
pub fn parse_inbound(raw: &str) -> Result<Inbound, serde_json::Error> {
    serde_json::from_str(raw)
}
