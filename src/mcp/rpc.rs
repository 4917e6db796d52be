//! JSON-RPC 2.0 envelopes exchanged with browser clients
//!
//! Inbound frames are decoded into [`Inbound`] requests or notifications; replies are built
//! as [`Response`] values whose payload is either a result or an error, never both.

use rust_mcp_sdk::schema::{self, JsonrpcMessage, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::error;

pub const JSONRPC_VERSION: &str = "2.0";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Client-chosen request identifier. Only unique among one client's outstanding requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl RequestId {
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(string_id) = value.as_str() {
            return Some(Self::String(string_id.to_string()));
        }

        value.as_i64().map(Self::Integer)
    }

    fn from_schema(id: schema::RequestId) -> Self {
        match id {
            schema::RequestId::Integer(value) => Self::Integer(value),
            schema::RequestId::String(value) => Self::String(value),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Integer(value) => Value::Number((*value).into()),
            Self::String(value) => Value::String(value.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Request(Request),
    Notification(Notification),
}

#[derive(Debug, Error, PartialEq)]
pub enum EnvelopeError {
    #[error("message is not a JSON object")]
    NotAnObject,
    #[error("jsonrpc version is missing or not \"2.0\"")]
    VersionMismatch { id: Option<RequestId> },
    #[error("request id must be a string or an integer")]
    InvalidId,
    #[error("message is neither a request nor a notification")]
    Malformed { id: Option<RequestId> },
}

impl EnvelopeError {
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Self::VersionMismatch { id } | Self::Malformed { id } => id.clone(),
            Self::NotAnObject | Self::InvalidId => None,
        }
    }
}

/// Checks the version and id by hand so both policies can answer with the client's id, then
/// decodes the rest through the MCP schema types.
pub fn parse_inbound(payload: Value) -> Result<Inbound, EnvelopeError> {
    let Value::Object(object) = &payload else {
        return Err(EnvelopeError::NotAnObject);
    };

    let raw_id = object.get("id");
    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(EnvelopeError::VersionMismatch {
            id: raw_id.and_then(RequestId::from_value),
        });
    }

    let id = raw_id
        .map(|raw| RequestId::from_value(raw).ok_or(EnvelopeError::InvalidId))
        .transpose()?;

    match serde_json::from_value::<JsonrpcMessage>(payload) {
        Ok(JsonrpcMessage::Request(request)) if !request.method.trim().is_empty() => {
            Ok(Inbound::Request(Request {
                id: RequestId::from_schema(request.id),
                method: request.method,
                params: request.params.map(Value::Object),
            }))
        }
        Ok(JsonrpcMessage::Notification(notification))
            if id.is_none() && !notification.method.trim().is_empty() =>
        {
            Ok(Inbound::Notification(Notification {
                method: notification.method,
                params: notification.params.map(Value::Object),
            }))
        }
        _ => Err(EnvelopeError::Malformed { id }),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponsePayload {
    Result(Value),
    Error(RpcError),
}

#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

impl Response {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id: Some(id),
            payload: ResponsePayload::Result(result),
        }
    }

    pub fn error(
        id: Option<RequestId>,
        code: i64,
        message: impl Into<String>,
        data: Option<Value>,
    ) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            payload: ResponsePayload::Error(RpcError {
                code,
                data,
                message: message.into(),
            }),
        }
    }

    pub fn parse_error() -> Self {
        Self::error(None, PARSE_ERROR, "Parse error", None)
    }

    pub fn invalid_request(id: Option<RequestId>) -> Self {
        Self::error(id, INVALID_REQUEST, "Invalid Request", None)
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, ResponsePayload::Error(_))
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(&self).unwrap_or_else(|err| {
            error!(error = %err, "failed to serialize jsonrpc response");
            json!({
                "jsonrpc": JSONRPC_VERSION,
                "id": Value::Null,
                "error": {
                    "code": INTERNAL_ERROR,
                    "message": "Internal error"
                }
            })
        })
    }
}
