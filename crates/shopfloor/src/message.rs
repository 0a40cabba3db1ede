//! Messages exchanged between the pool and its workers.
//!
//! Requests and responses follow the JSON-RPC 2.0 envelope so that any
//! transport able to carry JSON can sit between the pool and a worker. The
//! only non-standard addition is the `extra` map on successful responses,
//! which carries out-of-band information such as processing time.

use core::{fmt, str::FromStr};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Protocol version stamped on every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Reserved JSON-RPC error codes.
pub mod codes {
    /// Invalid JSON was received.
    pub const PARSE_ERROR: i64 = -32700;
    /// The envelope is not a valid request.
    pub const INVALID_REQUEST: i64 = -32600;
    /// The method does not exist on the worker.
    pub const METHOD_NOT_FOUND: i64 = -32601;
    /// The method rejected its parameters.
    pub const INVALID_PARAMS: i64 = -32602;
    /// The method failed while running.
    pub const INTERNAL_ERROR: i64 = -32603;
}

/// Correlation id tying a request to its eventual response.
///
/// The `slot` is the pool position the request was sent to and `seq` is a
/// pool-wide counter, so ids stay unique across slots and respawns. The text
/// form is `"<slot>:<seq>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct RequestId {
    pub slot: usize,
    pub seq: u64,
}

impl RequestId {
    pub const fn new(slot: usize, seq: u64) -> Self {
        Self { slot, seq }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.slot, self.seq)
    }
}

impl FromStr for RequestId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (slot, seq) = s
            .split_once(':')
            .ok_or_else(|| format!("request id `{s}` is missing the `:` separator"))?;
        let slot = slot
            .parse()
            .map_err(|e| format!("request id `{s}` has a bad slot: {e}"))?;
        let seq = seq
            .parse()
            .map_err(|e| format!("request id `{s}` has a bad sequence: {e}"))?;
        Ok(Self { slot, seq })
    }
}

impl From<RequestId> for String {
    fn from(id: RequestId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for RequestId {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// A method invocation addressed to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
    pub id: RequestId,
}

impl Request {
    pub fn new(method: impl Into<String>, params: Value, id: RequestId) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
            id,
        }
    }
}

/// The error member of an error response.
///
/// `ErrorObject` is also a regular error type: a worker method may return one
/// (through `anyhow`) to answer with a specific code instead of the generic
/// internal error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("[{code}] {message}")]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: Value::Null,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            codes::METHOD_NOT_FOUND,
            format!("Method '{method}' not found"),
        )
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(codes::INVALID_PARAMS, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(codes::INTERNAL_ERROR, message)
    }
}

/// A worker's answer to exactly one [`Request`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireResponse", into = "WireResponse")]
pub enum Response {
    /// The method ran to completion.
    Ok {
        result: Value,
        extra: Map<String, Value>,
        id: RequestId,
    },
    /// The method was unknown, rejected its params, or failed.
    Err { error: ErrorObject, id: RequestId },
}

impl Response {
    pub fn ok(id: RequestId, result: Value) -> Self {
        Self::Ok {
            result,
            extra: Map::new(),
            id,
        }
    }

    pub const fn err(id: RequestId, error: ErrorObject) -> Self {
        Self::Err { error, id }
    }

    pub const fn id(&self) -> RequestId {
        match self {
            Self::Ok { id, .. } | Self::Err { id, .. } => *id,
        }
    }

    pub const fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }

    /// The result payload, or `None` for error responses.
    pub const fn result(&self) -> Option<&Value> {
        match self {
            Self::Ok { result, .. } => Some(result),
            Self::Err { .. } => None,
        }
    }

    /// The out-of-band `extra` map, or `None` for error responses.
    pub const fn extra(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Ok { extra, .. } => Some(extra),
            Self::Err { .. } => None,
        }
    }

    pub const fn error(&self) -> Option<&ErrorObject> {
        match self {
            Self::Ok { .. } => None,
            Self::Err { error, .. } => Some(error),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireResponse {
    jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ErrorObject>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    extra: Map<String, Value>,
    id: RequestId,
}

impl From<Response> for WireResponse {
    fn from(resp: Response) -> Self {
        match resp {
            Response::Ok { result, extra, id } => Self {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: Some(result),
                error: None,
                extra,
                id,
            },
            Response::Err { error, id } => Self {
                jsonrpc: JSONRPC_VERSION.to_string(),
                result: None,
                error: Some(error),
                extra: Map::new(),
                id,
            },
        }
    }
}

impl TryFrom<WireResponse> for Response {
    type Error = String;

    fn try_from(wire: WireResponse) -> Result<Self, Self::Error> {
        if wire.jsonrpc != JSONRPC_VERSION {
            return Err(format!("unsupported jsonrpc version `{}`", wire.jsonrpc));
        }
        match (wire.result, wire.error) {
            (Some(_), Some(_)) => Err(format!(
                "response {} carries both `result` and `error`",
                wire.id
            )),
            (_, Some(error)) => Ok(Self::Err { error, id: wire.id }),
            // A `null` result deserializes to `None`.
            (result, None) => Ok(Self::Ok {
                result: result.unwrap_or(Value::Null),
                extra: wire.extra,
                id: wire.id,
            }),
        }
    }
}
