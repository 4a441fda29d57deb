//! Remote-call plumbing between the editor front-end and its peer processes.
//!
//! Every peer (rendering engine, schema validator, export engine) lives behind
//! a message channel. A `RemoteProxy` turns `invoke(method, args)` into a
//! correlated request on that channel and hands back a `Deferred` that settles
//! when the matching response arrives. Responses are routed purely by
//! correlation id; arrival order is irrelevant.
//!
//! * `deferred` - single-resolution future shared by caller and router
//! * `protocol` - wire envelopes (JSON) and id generation
//! * `channel`  - in-order message pipe between proxy and peer
//! * `method`   - enumerated method catalogues for each peer
//! * `proxy`    - the caller-side proxy
//! * `peer`     - the peer-side request loop

pub mod channel;
pub mod deferred;
pub mod method;
pub mod peer;
pub mod protocol;
pub mod proxy;

pub use channel::{PeerEnd, ProxyEnd, pair};
pub use deferred::Deferred;
pub use method::{EngineMethod, ExportMethod, Method, ValidatorMethod};
pub use peer::{PeerHandler, PeerHost};
pub use protocol::{CallId, CounterIdGen, Inbound, READY_METHOD, Request, Response};
pub use proxy::RemoteProxy;

/// Errors raised while encoding, decoding or moving peer messages.
///
/// None of these are surfaced to callers of `RemoteProxy::invoke`: a call
/// whose message cannot be delivered simply never settles.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("malformed peer message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("peer message without correlation id (method {method:?})")]
    MissingCorrelation { method: Option<String> },
    #[error("peer channel closed")]
    ChannelClosed,
}

pub type RpcResult<T> = Result<T, RpcError>;
