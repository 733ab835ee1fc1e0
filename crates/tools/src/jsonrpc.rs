//! JSON-RPC 2.0 framing for line-delimited stdio transports.

use proto::TransportError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Code returned when the peer calls a method this client does not serve.
pub const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Serialize)]
struct OutgoingRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OutgoingNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Debug, Serialize)]
struct OutgoingError<'a> {
    jsonrpc: &'static str,
    id: &'a Value,
    error: RpcError,
}

/// Error object carried by a failed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcError> for TransportError {
    fn from(err: RpcError) -> Self {
        TransportError::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// A decoded message received from the peer
#[derive(Debug, PartialEq)]
pub enum Incoming {
    /// Answer to one of our requests.
    Response {
        id: u64,
        outcome: Result<Value, RpcError>,
    },
    /// The peer asks us to do something.
    Request { id: Value, method: String },
    /// Fire-and-forget message from the peer.
    Notification { method: String },
}

/// Encodes a request as one line, newline included.
pub fn encode_request(
    id: u64,
    method: &str,
    params: Option<Value>,
) -> Result<String, TransportError> {
    to_line(&OutgoingRequest {
        jsonrpc: JSONRPC_VERSION,
        id,
        method,
        params,
    })
}

/// Encodes a notification as one line, newline included.
pub fn encode_notification(method: &str, params: Option<Value>) -> Result<String, TransportError> {
    to_line(&OutgoingNotification {
        jsonrpc: JSONRPC_VERSION,
        method,
        params,
    })
}

/// Encodes an error reply to a peer request.
pub fn encode_error(id: &Value, code: i64, message: impl Into<String>) -> Result<String, TransportError> {
    to_line(&OutgoingError {
        jsonrpc: JSONRPC_VERSION,
        id,
        error: RpcError {
            code,
            message: message.into(),
            data: None,
        },
    })
}

fn to_line<T: Serialize>(message: &T) -> Result<String, TransportError> {
    let mut line =
        serde_json::to_string(message).map_err(|e| TransportError::Codec(e.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Decodes one line received from the peer.
pub fn decode_line(line: &str) -> Result<Incoming, TransportError> {
    let value: Value =
        serde_json::from_str(line).map_err(|e| TransportError::Codec(e.to_string()))?;
    let Value::Object(mut object) = value else {
        return Err(TransportError::Codec("message is not an object".to_string()));
    };

    if let Some(method) = object.get("method").and_then(Value::as_str) {
        let method = method.to_string();
        return Ok(match object.remove("id") {
            Some(id) if !id.is_null() => Incoming::Request { id, method },
            _ => Incoming::Notification { method },
        });
    }

    let id = object
        .get("id")
        .and_then(response_id)
        .ok_or_else(|| TransportError::Codec("response without a usable id".to_string()))?;

    if let Some(error) = object.remove("error") {
        let error: RpcError =
            serde_json::from_value(error).map_err(|e| TransportError::Codec(e.to_string()))?;
        return Ok(Incoming::Response {
            id,
            outcome: Err(error),
        });
    }

    let result = object.remove("result").unwrap_or(Value::Null);
    Ok(Incoming::Response {
        id,
        outcome: Ok(result),
    })
}

// Some servers echo numeric ids back as strings.
fn response_id(id: &Value) -> Option<u64> {
    match id {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}
