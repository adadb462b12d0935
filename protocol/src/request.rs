//! JSON-RPC request construction and reply parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

/// An outgoing request: `{"id": n, "method": "...", "params": [...]}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    pub id: u64,
    pub method: String,
    pub params: Vec<Value>,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            id,
            method: method.into(),
            params,
        }
    }

    /// Serialize to the wire form: one JSON object followed by `\n`.
    pub fn to_frame(&self) -> Result<String, ProtocolError> {
        let mut frame = serde_json::to_string(self)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        frame.push('\n');
        Ok(frame)
    }
}

/// A reply to a request we issued.
#[derive(Clone, Debug)]
pub struct Response {
    pub id: u64,
    pub result: Value,
}

/// A server-initiated event (subscription push). Carries a method name
/// instead of an id.
#[derive(Clone, Debug)]
pub struct Notification {
    pub method: String,
    pub params: Vec<Value>,
}

/// Any inbound frame.
#[derive(Clone, Debug)]
pub enum Frame {
    Response(Response),
    Notification(Notification),
}

/// Parse one inbound frame.
///
/// Frames with an `error` member become [`ProtocolError::Server`] carrying
/// the server's message text verbatim; downstream error classification
/// matches on those exact strings.
pub fn parse_frame(raw: &str) -> Result<Frame, ProtocolError> {
    let value: Value =
        serde_json::from_str(raw.trim()).map_err(|e| ProtocolError::Malformed(e.to_string()))?;

    let obj = value
        .as_object()
        .ok_or_else(|| ProtocolError::Malformed("frame is not a JSON object".into()))?;

    if let Some(err) = obj.get("error") {
        if !err.is_null() {
            let message = match err {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            return Err(ProtocolError::Server(message));
        }
    }

    match obj.get("id").and_then(Value::as_u64) {
        Some(id) => Ok(Frame::Response(Response {
            id,
            result: obj.get("result").cloned().unwrap_or(Value::Null),
        })),
        None => {
            let method = obj
                .get("method")
                .and_then(Value::as_str)
                .ok_or_else(|| ProtocolError::Malformed("frame has neither id nor method".into()))?
                .to_string();
            let params = obj
                .get("params")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            Ok(Frame::Notification(Notification { method, params }))
        }
    }
}
