//! Caller-side remote-call proxy.
//!
//! `RemoteProxy::spawn` takes the caller half of a channel and starts a
//! routing task that owns the inbound direction. `invoke` allocates a
//! correlation id, registers a pending `Deferred` under it, serializes the
//! request and returns the deferred immediately. The router resolves each
//! deferred when a response carrying its id arrives, in whatever order the
//! peer produces them.
//!
//! Failure policy: a closed channel or an undecodable message leaves the
//! affected calls pending forever. Nothing here times out or retries; callers
//! that need a bound wrap the await in `tokio::time::timeout`.

use crate::channel::ProxyEnd;
use crate::deferred::Deferred;
use crate::method::Method;
use crate::protocol::{self, CallId, CounterIdGen, Inbound, Request};
use serde_json::Value;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

pub struct RemoteProxy<M: Method> {
    name: &'static str,
    outbound: UnboundedSender<String>,
    shared: Arc<Mutex<ProxyShared>>,
    router: JoinHandle<()>,
    _method: PhantomData<fn(M)>,
}

#[derive(Default)]
struct ProxyShared {
    ids: CounterIdGen,
    pending: HashMap<CallId, Deferred<Value>>,
    ready_waiters: Vec<Deferred<()>>,
    outstanding: usize,
}

impl ProxyShared {
    /// Outstanding-call sanity check: the counter should never be asked to go
    /// below zero; when it is, log and clamp instead of wrapping.
    fn release_call(&mut self, proxy: &'static str, id: CallId) {
        match self.outstanding.checked_sub(1) {
            Some(n) => self.outstanding = n,
            None => error!(target: "rpc.proxy", proxy, %id, "outstanding_count_negative"),
        }
    }
}

fn lock(shared: &Mutex<ProxyShared>) -> MutexGuard<'_, ProxyShared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<M: Method> RemoteProxy<M> {
    /// Start routing responses for `end`. Requires a running tokio runtime.
    pub fn spawn(name: &'static str, end: ProxyEnd) -> Self {
        let ProxyEnd { outbound, inbound } = end;
        let shared = Arc::new(Mutex::new(ProxyShared::default()));
        let router = tokio::spawn(route_inbound(name, Arc::clone(&shared), inbound));
        info!(target: "rpc.proxy", proxy = name, "proxy_started");
        Self {
            name,
            outbound,
            shared,
            router,
            _method: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Calls sent and not yet answered.
    pub fn outstanding(&self) -> usize {
        lock(&self.shared).outstanding
    }

    /// Send `method(args..)` to the peer. Never blocks; the returned deferred
    /// settles with the peer's `result` value.
    pub fn invoke(&self, method: M, arguments: Vec<Value>) -> Deferred<Value> {
        let deferred = Deferred::new();
        // Register before sending: the router may see the response before
        // this function returns on a multi-threaded runtime.
        let id = {
            let mut shared = lock(&self.shared);
            let id = shared.ids.next();
            shared.pending.insert(id, deferred.clone());
            shared.outstanding += 1;
            id
        };
        let request = Request {
            correlation_id: id,
            method_name: method.name().to_string(),
            arguments,
        };
        match protocol::encode_request(&request) {
            Ok(raw) => {
                trace!(target: "rpc.proxy", proxy = self.name, %id, method = method.name(), "invoke");
                if self.outbound.send(raw).is_err() {
                    error!(
                        target: "rpc.proxy",
                        proxy = self.name,
                        %id,
                        method = method.name(),
                        "send_failed_peer_gone"
                    );
                }
            }
            Err(e) => {
                error!(target: "rpc.proxy", proxy = self.name, %id, %e, "encode_failed");
            }
        }
        deferred
    }

    /// Resolves on the next `ready` announcement received after this call.
    /// A peer that became ready earlier is not remembered, so callers must
    /// register before the peer can finish starting.
    pub fn on_ready(&self) -> Deferred<()> {
        let deferred = Deferred::new();
        lock(&self.shared).ready_waiters.push(deferred.clone());
        deferred
    }
}

impl<M: Method> Drop for RemoteProxy<M> {
    fn drop(&mut self) {
        self.router.abort();
    }
}

impl<M: Method> std::fmt::Debug for RemoteProxy<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteProxy")
            .field("name", &self.name)
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

async fn route_inbound(
    name: &'static str,
    shared: Arc<Mutex<ProxyShared>>,
    mut inbound: UnboundedReceiver<String>,
) {
    while let Some(raw) = inbound.recv().await {
        match protocol::decode_inbound(&raw) {
            Ok(Inbound::Ready) => {
                let waiters = std::mem::take(&mut lock(&shared).ready_waiters);
                info!(target: "rpc.proxy", proxy = name, waiters = waiters.len(), "peer_ready");
                for waiter in waiters {
                    waiter.resolve(());
                }
            }
            Ok(Inbound::Response(resp)) => {
                let id = resp.correlation_id;
                let entry = {
                    let mut guard = lock(&shared);
                    let entry = guard.pending.remove(&id);
                    if entry.is_some() {
                        guard.release_call(name, id);
                    }
                    entry
                };
                match entry {
                    Some(deferred) => {
                        debug!(target: "rpc.proxy", proxy = name, %id, method = resp.method_name.as_str(), "response");
                        deferred.resolve(resp.result);
                    }
                    None => {
                        warn!(target: "rpc.proxy", proxy = name, %id, method = resp.method_name.as_str(), "response_unknown_id");
                    }
                }
            }
            Err(e) => {
                error!(target: "rpc.proxy", proxy = name, %e, size_bytes = raw.len(), "inbound_malformed");
            }
        }
    }
    let stranded = lock(&shared).pending.len();
    error!(target: "rpc.proxy", proxy = name, stranded, "peer_channel_closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::pair;
    use crate::method::EngineMethod;
    use crate::protocol::decode_request;
    use serde_json::json;

    #[tokio::test]
    async fn invoke_sends_correlated_request_and_settles() {
        let (proxy_end, mut peer) = pair();
        let proxy = RemoteProxy::<EngineMethod>::spawn("engine", proxy_end);
        let call = proxy.invoke(EngineMethod::GetPageCount, vec![]);
        assert_eq!(proxy.outstanding(), 1);

        let req = decode_request(&peer.recv().await.unwrap()).unwrap();
        assert_eq!(req.correlation_id, CallId(1));
        assert_eq!(req.method_name, "getPageCount");
        peer.respond(req, json!(4)).unwrap();

        assert_eq!(call.await, json!(4));
        assert_eq!(proxy.outstanding(), 0);
    }

    #[tokio::test]
    async fn unknown_response_id_keeps_counter_at_zero() {
        let (proxy_end, peer) = pair();
        let proxy = RemoteProxy::<EngineMethod>::spawn("engine", proxy_end);
        peer.send_raw(r#"{"correlationId":42,"methodName":"edit","result":true}"#.into())
            .unwrap();
        // Round-trip something real so the stray message has been routed.
        let ready = proxy.on_ready();
        peer.announce_ready().unwrap();
        ready.await;
        assert_eq!(proxy.outstanding(), 0);
    }

    #[tokio::test]
    async fn stray_response_leaves_pending_call_counted() {
        let (proxy_end, mut peer) = pair();
        let proxy = RemoteProxy::<EngineMethod>::spawn("engine", proxy_end);
        let call = proxy.invoke(EngineMethod::GetMei, vec![]);
        let req = decode_request(&peer.recv().await.unwrap()).unwrap();

        peer.send_raw(r#"{"correlationId":99,"methodName":"edit","result":true}"#.into())
            .unwrap();
        let ready = proxy.on_ready();
        peer.announce_ready().unwrap();
        ready.await;
        assert_eq!(proxy.outstanding(), 1);

        peer.respond(req, json!("<mei/>")).unwrap();
        assert_eq!(call.await, json!("<mei/>"));
        assert_eq!(proxy.outstanding(), 0);
    }

    #[tokio::test]
    async fn closed_peer_leaves_call_pending() {
        let (proxy_end, peer) = pair();
        let proxy = RemoteProxy::<EngineMethod>::spawn("engine", proxy_end);
        drop(peer);
        let call = proxy.invoke(EngineMethod::RedoLayout, vec![]);
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), call.wait()).await;
        assert!(waited.is_err());
        assert_eq!(proxy.outstanding(), 1);
    }
}
