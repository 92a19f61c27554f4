//! Wire messages and the codec shared by both ends of the bridge.
//!
//! Messages are JSON bodies; the framing layer adds the Content-Length
//! envelope when they travel over a stream.
//!
//! ```text
//! {"id":7,"accessor":"app.layers[0].opacity","op":"set","args":[{"kind":"float","value":0.5}]}
//! {"id":7,"ok":true,"value":{"kind":"void"}}
//! {"id":8,"ok":false,"error":{"kind":"resolution","message":"index 4 out of range (length 3)"}}
//! ```
//!
//! `id` is diagnostic: the channel already guarantees ordering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::accessor::Accessor;
use crate::error::{BridgeError, ChannelError, RemoteFault};
use crate::value::{Kind, Value};

/// Operation to perform at an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Get,
    Set,
    Call,
}

/// One request to the scripting host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub accessor: Accessor,
    pub op: Op,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    /// Keyword arguments; only meaningful for `Call`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub named: BTreeMap<String, Value>,
}

impl Request {
    pub fn get(id: u64, accessor: Accessor) -> Self {
        Self {
            id,
            accessor,
            op: Op::Get,
            args: Vec::new(),
            named: BTreeMap::new(),
        }
    }

    pub fn set(id: u64, accessor: Accessor, value: Value) -> Self {
        Self {
            id,
            accessor,
            op: Op::Set,
            args: vec![value],
            named: BTreeMap::new(),
        }
    }

    pub fn call(
        id: u64,
        accessor: Accessor,
        args: Vec<Value>,
        named: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            accessor,
            op: Op::Call,
            args,
            named,
        }
    }
}

/// Exactly one per request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteFault>,
}

impl Response {
    pub fn success(id: u64, value: Value) -> Self {
        Self {
            id,
            ok: true,
            value: Some(value),
            error: None,
        }
    }

    pub fn failure(id: u64, fault: RemoteFault) -> Self {
        Self {
            id,
            ok: false,
            value: None,
            error: Some(fault),
        }
    }

    /// Extract the value or the typed failure.
    ///
    /// `accessor` attributes resolution failures to the path that was requested.
    pub fn into_result(self, accessor: &Accessor) -> Result<Value, BridgeError> {
        match (self.ok, self.value, self.error) {
            (true, Some(value), _) => Ok(value),
            (false, _, Some(fault)) => Err(fault.into_bridge_error(accessor.as_str())),
            _ => Err(ChannelError::Protocol(format!(
                "Response {} missing both value and error",
                self.id
            ))
            .into()),
        }
    }
}

pub fn encode_request(request: &Request) -> Result<Vec<u8>, ChannelError> {
    serde_json::to_vec(request)
        .map_err(|e| ChannelError::Protocol(format!("Failed to serialize request: {}", e)))
}

pub fn decode_request(bytes: &[u8]) -> Result<Request, ChannelError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ChannelError::Protocol(format!("Failed to parse request: {}", e)))
}

pub fn encode_response(response: &Response) -> Result<Vec<u8>, ChannelError> {
    serde_json::to_vec(response)
        .map_err(|e| ChannelError::Protocol(format!("Failed to serialize response: {}", e)))
}

pub fn decode_response(bytes: &[u8]) -> Result<Response, ChannelError> {
    serde_json::from_slice(bytes)
        .map_err(|e| ChannelError::Protocol(format!("Failed to parse response: {}", e)))
}

/// Check a decoded value against the kind the call site expects.
///
/// A disagreement is a hard `TypeMismatch`, never a coercion.
pub fn expect(value: Value, expected: &Kind) -> Result<Value, BridgeError> {
    if expected.admits(&value) {
        Ok(value)
    } else {
        Err(BridgeError::type_mismatch(expected, describe_mismatch(&value, expected)))
    }
}

/// Names the innermost offending part so nested mismatches are readable.
fn describe_mismatch(value: &Value, expected: &Kind) -> String {
    match (expected, value) {
        (Kind::Enum(_), Value::Enum(tag)) => format!("unknown variant `{}`", tag),
        (Kind::Array { element, .. }, Value::Array(items)) => items
            .iter()
            .position(|item| !element.admits(item))
            .map(|at| format!("{} at element {}", describe_mismatch(&items[at], element), at))
            .unwrap_or_else(|| value.kind_name()),
        _ => value.kind_name(),
    }
}
