//! In-order message pipe between a proxy and its peer.
//!
//! Both directions are unbounded so `RemoteProxy::invoke` never suspends;
//! delivery order on each direction matches send order. Messages are the
//! serialized JSON envelopes from `protocol`, which keeps the pipe agnostic
//! of whether the peer is a task, a thread, or a child process bridged
//! through stdio.

use crate::protocol::{self, Request};
use crate::{RpcError, RpcResult};
use serde_json::Value;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

/// Caller-side half, consumed by `RemoteProxy::spawn`.
#[derive(Debug)]
pub struct ProxyEnd {
    pub(crate) outbound: UnboundedSender<String>,
    pub(crate) inbound: UnboundedReceiver<String>,
}

/// Peer-side half.
#[derive(Debug)]
pub struct PeerEnd {
    inbound: UnboundedReceiver<String>,
    outbound: UnboundedSender<String>,
}

/// Create a connected proxy/peer pair.
pub fn pair() -> (ProxyEnd, PeerEnd) {
    let (to_peer, from_proxy) = unbounded_channel();
    let (to_proxy, from_peer) = unbounded_channel();
    (
        ProxyEnd {
            outbound: to_peer,
            inbound: from_peer,
        },
        PeerEnd {
            inbound: from_proxy,
            outbound: to_proxy,
        },
    )
}

impl PeerEnd {
    /// Next raw message from the proxy, `None` once the proxy is gone.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }

    /// Next request, decoded. Malformed messages surface as `Some(Err(..))`
    /// so the caller can log and continue.
    pub async fn recv_request(&mut self) -> Option<RpcResult<Request>> {
        let raw = self.recv().await?;
        Some(protocol::decode_request(&raw))
    }

    /// Send a raw message to the proxy.
    pub fn send_raw(&self, raw: String) -> RpcResult<()> {
        self.outbound
            .send(raw)
            .map_err(|_| RpcError::ChannelClosed)
    }

    /// Answer a request, echoing its method name and arguments.
    pub fn respond(&self, req: Request, result: Value) -> RpcResult<()> {
        let id = req.correlation_id;
        let raw = protocol::encode_response(&req.respond(result))?;
        trace!(target: "rpc.peer", %id, size_bytes = raw.len(), "respond");
        self.send_raw(raw)
    }

    /// Unsolicited readiness notification.
    pub fn announce_ready(&self) -> RpcResult<()> {
        self.send_raw(protocol::ready_message())
    }
}
