//! Wire envelopes exchanged with a peer.
//!
//! Request:  `{"correlationId": 3, "methodName": "edit", "arguments": [..]}`
//! Response: `{"correlationId": 3, "methodName": "edit", "arguments": [..], "result": ..}`
//! Ready:    `{"methodName": "ready"}` (unsolicited, once, no correlation id)
//!
//! The peer echoes `methodName`/`arguments` for diagnostics only; routing uses
//! the correlation id alone.

use crate::{RpcError, RpcResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Method name of the unsolicited readiness announcement.
pub const READY_METHOD: &str = "ready";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic correlation id source. Ids start at 1 and never repeat for the
/// lifetime of the generator.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(u64);

impl CounterIdGen {
    pub const fn new() -> Self {
        Self(0)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> CallId {
        self.0 += 1;
        CallId(self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub correlation_id: CallId,
    pub method_name: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
}

impl Request {
    /// Build the response for this request, echoing name and arguments.
    pub fn respond(self, result: Value) -> Response {
        Response {
            correlation_id: self.correlation_id,
            method_name: self.method_name,
            arguments: self.arguments,
            result,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub correlation_id: CallId,
    pub method_name: String,
    #[serde(default)]
    pub arguments: Vec<Value>,
    #[serde(default)]
    pub result: Value,
}

/// Classification of a message arriving from the peer.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Ready,
    Response(Response),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    correlation_id: Option<CallId>,
    method_name: Option<String>,
    #[serde(default)]
    arguments: Vec<Value>,
    #[serde(default)]
    result: Value,
}

pub fn encode_request(req: &Request) -> RpcResult<String> {
    Ok(serde_json::to_string(req)?)
}

pub fn decode_request(raw: &str) -> RpcResult<Request> {
    Ok(serde_json::from_str(raw)?)
}

pub fn encode_response(resp: &Response) -> RpcResult<String> {
    Ok(serde_json::to_string(resp)?)
}

pub fn ready_message() -> String {
    serde_json::json!({ "methodName": READY_METHOD }).to_string()
}

/// Decode a peer message. A message without a correlation id is only valid
/// as the `ready` announcement.
pub fn decode_inbound(raw: &str) -> RpcResult<Inbound> {
    let env: Envelope = serde_json::from_str(raw)?;
    match (env.correlation_id, env.method_name) {
        (Some(correlation_id), method_name) => Ok(Inbound::Response(Response {
            correlation_id,
            method_name: method_name.unwrap_or_default(),
            arguments: env.arguments,
            result: env.result,
        })),
        (None, Some(name)) if name == READY_METHOD => Ok(Inbound::Ready),
        (None, method) => Err(RpcError::MissingCorrelation { method }),
    }
}
