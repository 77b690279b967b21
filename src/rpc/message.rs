//! JSON-RPC 2.0 frame shapes and classification.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::AppError;

/// Standard JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32_700;
    /// The frame is not a valid request object.
    pub const INVALID_REQUEST: i64 = -32_600;
    /// The method does not exist or is not handled.
    pub const METHOD_NOT_FOUND: i64 = -32_601;
    /// Invalid method parameters.
    pub const INVALID_PARAMS: i64 = -32_602;
    /// Internal error while handling the request.
    pub const INTERNAL_ERROR: i64 = -32_603;
}

/// Identifier of a request in either direction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id. Outbound requests always use this form.
    Number(i64),
    /// String id, as some agents send for their own requests.
    String(String),
}

impl RequestId {
    /// Pending-table key, if this id could have been allocated by us.
    #[must_use]
    pub fn as_local(&self) -> Option<u64> {
        match self {
            Self::Number(n) => u64::try_from(*n).ok(),
            Self::String(s) => s.parse().ok(),
        }
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

impl Display for RequestId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s}"),
        }
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        i64::try_from(id).map_or_else(|_| Self::String(id.to_string()), Self::Number)
    }
}

/// `error` member of a response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    /// Error code.
    pub code: i64,
    /// Short description.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<RpcErrorObject> for AppError {
    fn from(err: RpcErrorObject) -> Self {
        Self::Rpc {
            code: err.code,
            message: err.message,
        }
    }
}

/// Request initiated by the agent that expects a reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerRequest {
    /// Id to echo in the reply.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Parameters, `Value::Null` when absent.
    pub params: Value,
}

/// Fire-and-forget message from the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Method name.
    pub method: String,
    /// Parameters, `Value::Null` when absent.
    pub params: Value,
}

/// Classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    /// Carries both `method` and a non-null `id`.
    Request(ServerRequest),
    /// Carries `method` and no `id`.
    Notification(Notification),
    /// Carries an `id` and no `method`.
    Response {
        /// Echoed request id.
        id: RequestId,
        /// `result` on success, the `error` object otherwise.
        outcome: std::result::Result<Value, RpcErrorObject>,
    },
    /// Anything else: a response with a null id, or no recognisable shape.
    Invalid(Value),
}

/// Sort one inbound frame into request, notification, or response.
#[must_use]
pub fn classify(mut frame: Value) -> Incoming {
    let method = frame
        .get("method")
        .and_then(Value::as_str)
        .map(str::to_owned);
    let id = frame.get("id").and_then(RequestId::from_value);
    let params = frame
        .get_mut("params")
        .map(Value::take)
        .unwrap_or(Value::Null);

    match (method, id) {
        (Some(method), Some(id)) => Incoming::Request(ServerRequest { id, method, params }),
        (Some(method), None) => Incoming::Notification(Notification { method, params }),
        (None, Some(id)) => {
            let outcome = match frame.get_mut("error").map(Value::take) {
                Some(error) if !error.is_null() => Err(parse_error_object(error)),
                _ => Ok(frame
                    .get_mut("result")
                    .map(Value::take)
                    .unwrap_or(Value::Null)),
            };
            Incoming::Response { id, outcome }
        }
        (None, None) => Incoming::Invalid(frame),
    }
}

fn parse_error_object(error: Value) -> RpcErrorObject {
    serde_json::from_value(error.clone()).unwrap_or_else(|_| RpcErrorObject {
        code: error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(codes::INTERNAL_ERROR),
        message: error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_owned(),
        data: None,
    })
}

/// Build a request frame.
#[must_use]
pub fn request_frame(id: u64, method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params })
}

/// Build a notification frame.
#[must_use]
pub fn notification_frame(method: &str, params: Value) -> Value {
    json!({ "jsonrpc": "2.0", "method": method, "params": params })
}

/// Build a success response frame.
#[must_use]
pub fn response_frame(id: &RequestId, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build an error response frame.
#[must_use]
pub fn error_frame(id: &RequestId, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}
