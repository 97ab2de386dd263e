//! Minimal JSON-RPC 2.0 envelope used by every transport.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// Outgoing request or notification (no `id`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn request(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method: method.to_string(),
            params,
        }
    }

    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// Any incoming message: response, server request or notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcMessage {
    /// True when this is the response to request `id`.
    pub fn answers(&self, id: u64) -> bool {
        if self.method.is_some() {
            return false;
        }
        match &self.id {
            Some(Value::Number(n)) => n.as_u64() == Some(id),
            Some(Value::String(s)) => s.parse::<u64>().ok() == Some(id),
            _ => false,
        }
    }

    pub fn into_result(self) -> Result<Value, TransportError> {
        if let Some(error) = self.error {
            return Err(TransportError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// Find the response to `id` in a JSON body holding one message or a batch.
pub fn response_in_body(body: &str, id: u64) -> Result<Option<JsonRpcMessage>, TransportError> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| TransportError::Protocol(format!("response is not JSON: {e}")))?;

    let candidates = match value {
        Value::Array(items) => items,
        other => vec![other],
    };

    for candidate in candidates {
        if let Ok(message) = serde_json::from_value::<JsonRpcMessage>(candidate)
            && message.answers(id)
        {
            return Ok(Some(message));
        }
    }
    Ok(None)
}
