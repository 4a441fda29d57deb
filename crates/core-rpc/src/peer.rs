//! Peer-side request loop.
//!
//! `PeerHost` owns the peer half of a channel: it announces readiness once,
//! then decodes each request, hands it to a `PeerHandler`, and answers with
//! the handler's result. Requests are served in arrival order. Unknown
//! methods are answered with `null` so the caller's deferred still settles.

use crate::channel::PeerEnd;
use crate::method::Method;
use serde_json::Value;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Implemented by the process that serves a method catalogue.
pub trait PeerHandler: Send + 'static {
    type Method: Method;

    fn handle(
        &mut self,
        method: Self::Method,
        arguments: Vec<Value>,
    ) -> impl Future<Output = Value> + Send;
}

pub struct PeerHost<H: PeerHandler> {
    name: &'static str,
    end: PeerEnd,
    handler: H,
}

impl<H: PeerHandler> PeerHost<H> {
    pub fn new(name: &'static str, end: PeerEnd, handler: H) -> Self {
        Self { name, end, handler }
    }

    /// Serve until the proxy side hangs up; returns the handler so tests can
    /// inspect its final state.
    pub async fn run(mut self) -> H {
        if self.end.announce_ready().is_err() {
            warn!(target: "rpc.peer", peer = self.name, "ready_undeliverable");
            return self.handler;
        }
        info!(target: "rpc.peer", peer = self.name, "peer_ready");
        while let Some(next) = self.end.recv_request().await {
            let req = match next {
                Ok(req) => req,
                Err(e) => {
                    error!(target: "rpc.peer", peer = self.name, %e, "request_malformed");
                    continue;
                }
            };
            let result = match H::Method::from_name(&req.method_name) {
                Some(method) => {
                    debug!(target: "rpc.peer", peer = self.name, id = %req.correlation_id, method = method.name(), "request");
                    self.handler.handle(method, req.arguments.clone()).await
                }
                None => {
                    warn!(target: "rpc.peer", peer = self.name, method = req.method_name.as_str(), "unknown_method");
                    Value::Null
                }
            };
            if self.end.respond(req, result).is_err() {
                break;
            }
        }
        info!(target: "rpc.peer", peer = self.name, "peer_stopped");
        self.handler
    }

    pub fn spawn(self) -> JoinHandle<H> {
        tokio::spawn(self.run())
    }
}
