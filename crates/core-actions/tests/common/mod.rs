#![allow(dead_code)] // Shared across integration tests; each test binary uses a subset of helpers.

use core_actions::{ActionSerializer, SharedSelection};
use core_events::Dispatcher;
use core_rpc::{EngineMethod, Method, PeerHandler, PeerHost, RemoteProxy, pair};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

pub type CallLog = Arc<Mutex<Vec<(String, Vec<Value>)>>>;

/// Engine stand-in that records every call it serves.
pub struct RecordingEngine {
    log: CallLog,
    reject_chains: bool,
    page_count: u32,
    edit_seen: Option<oneshot::Sender<()>>,
    gate: Option<oneshot::Receiver<()>>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            reject_chains: false,
            page_count: 3,
            edit_seen: None,
            gate: None,
        }
    }

    /// Answer every chain with `false`; commits are still accepted.
    pub fn rejecting(mut self) -> Self {
        self.reject_chains = true;
        self
    }

    pub fn with_page_count(mut self, count: u32) -> Self {
        self.page_count = count;
        self
    }

    /// Hold the first `edit` until the returned sender fires; the receiver
    /// fires once that edit has arrived.
    pub fn gated(mut self) -> (Self, oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (seen_tx, seen_rx) = oneshot::channel();
        let (open_tx, open_rx) = oneshot::channel();
        self.edit_seen = Some(seen_tx);
        self.gate = Some(open_rx);
        (self, seen_rx, open_tx)
    }
}

impl PeerHandler for RecordingEngine {
    type Method = EngineMethod;

    async fn handle(&mut self, method: EngineMethod, arguments: Vec<Value>) -> Value {
        self.log
            .lock()
            .unwrap()
            .push((method.name().to_string(), arguments.clone()));
        match method {
            EngineMethod::Edit => {
                if let Some(seen) = self.edit_seen.take() {
                    let _ = seen.send(());
                }
                if let Some(gate) = self.gate.take() {
                    let _ = gate.await;
                }
                let is_commit = arguments
                    .first()
                    .and_then(|op| op.get("action"))
                    .and_then(Value::as_str)
                    == Some("commit");
                json!(is_commit || !self.reject_chains)
            }
            EngineMethod::RenderToSvg => {
                json!(format!("<svg page=\"{}\"/>", arguments.first().cloned().unwrap_or_default()))
            }
            EngineMethod::GetPageCount => json!(self.page_count),
            EngineMethod::GetMei => json!("<mei meiversion=\"5.0\"/>"),
            _ => json!(true),
        }
    }
}

pub struct Harness {
    pub serializer: Arc<ActionSerializer>,
    pub selection: SharedSelection,
    pub events: Dispatcher,
    pub log: CallLog,
}

impl Harness {
    pub fn methods(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    /// Payloads of every `edit` call, in arrival order.
    pub fn edits(&self) -> Vec<Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == "edit")
            .filter_map(|(_, args)| args.first().cloned())
            .collect()
    }

    pub fn clear_log(&self) {
        self.log.lock().unwrap().clear();
    }
}

/// Must be called inside a tokio runtime.
pub fn harness(engine: RecordingEngine) -> Harness {
    let log = Arc::clone(&engine.log);
    let (proxy_end, peer_end) = pair();
    let proxy = Arc::new(RemoteProxy::<EngineMethod>::spawn("engine", proxy_end));
    PeerHost::new("engine", peer_end, engine).spawn();
    let selection = SharedSelection::default();
    let events = Dispatcher::new("app");
    let serializer = Arc::new(ActionSerializer::new(
        proxy,
        Arc::new(selection.clone()),
        events.clone(),
    ));
    Harness {
        serializer,
        selection,
        events,
        log,
    }
}

/// `"chain:drag+drag"` / `"commit"` labels for edit payloads.
pub fn edit_label(edit: &Value) -> String {
    let action = edit["action"].as_str().unwrap_or("?");
    match edit["param"].as_array() {
        Some(steps) if action == "chain" => {
            let tags: Vec<&str> = steps
                .iter()
                .map(|s| s["action"].as_str().unwrap_or("?"))
                .collect();
            format!("chain:{}", tags.join("+"))
        }
        _ => action.to_string(),
    }
}
