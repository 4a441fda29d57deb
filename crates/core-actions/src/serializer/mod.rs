//! Single-flight edit transactions against the engine document.
//!
//! At most one transaction is in flight. A transaction is: optional
//! `setOptions` (only when the captured options differ from the last ones
//! sent), one `edit` carrying the whole chain, then, if the engine accepted
//! it, the follow-ups in `followup`: a layout pass, a render of the captured
//! page and a snapshot refresh announced as `UpdateData`.
//!
//! Gestures submitted while busy are queued with the options captured at
//! submission time and replayed strictly FIFO by whichever task owns the
//! in-flight transaction. Once the backlog is empty the owner commits, refreshes
//! the page count and only then clears `busy`, in the same critical section
//! that observed the empty queue. Nothing submitted can slip between the last
//! drain and the flag reset.

mod followup;

use crate::gesture::{Gesture, GestureKind};
use crate::operation::EditOperation;
use crate::selection::SelectionSource;
use crate::{
    ActionObserver, ActionResult, GESTURES_DEFERRED, GESTURES_SKIPPED, TRANSACTIONS_APPLIED,
    TRANSACTIONS_REJECTED,
};
use core_config::ViewOptions;
use core_events::{ComponentId, Dispatcher};
use core_rpc::{EngineMethod, RemoteProxy};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Outcome of one transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionReport {
    pub gesture: GestureKind,
    /// Leaf steps in the chain that was sent.
    pub steps: usize,
    /// Engine answered the `edit` with `true`.
    pub accepted: bool,
    pub rendered_page: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    /// Nothing in the selection passed the gesture's filter; no engine call.
    Skipped,
    /// Queued behind the in-flight transaction, or behind a backlog left by
    /// an abandoned one (1-based position).
    Deferred { position: usize },
    Applied(TransactionReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub page: u32,
    pub svg: Arc<str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerializerStatus {
    pub busy: bool,
    pub queued: usize,
    pub current_page: u32,
    pub page_count: u32,
}

enum Claim {
    Queued(usize),
    /// Idle, but a backlog is waiting; this caller replays it.
    Adopted(usize),
    Owned(Vec<EditOperation>),
}

struct QueuedCall {
    gesture: Gesture,
    options: ViewOptions,
}

struct State {
    busy: bool,
    queue: VecDeque<QueuedCall>,
    current_page: u32,
    page_count: u32,
    applied_options: Option<ViewOptions>,
    last_render: Option<RenderedPage>,
    last_snapshot: Option<Arc<str>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            busy: false,
            queue: VecDeque::new(),
            current_page: 1,
            page_count: 0,
            applied_options: None,
            last_render: None,
            last_snapshot: None,
        }
    }
}

/// Clears `busy` if the owning future is dropped mid-transaction. Whatever
/// was still queued is replayed by the next `submit`, ahead of its gesture.
struct BusyGuard<'a> {
    owner: &'a ActionSerializer,
    armed: bool,
}

impl BusyGuard<'_> {
    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.owner.lock();
            state.busy = false;
            warn!(target: "actions.serializer", queued = state.queue.len(), "transaction_abandoned");
        }
    }
}

pub struct ActionSerializer {
    engine: Arc<RemoteProxy<EngineMethod>>,
    selection: Arc<dyn SelectionSource>,
    events: Dispatcher,
    origin: ComponentId,
    observers: Vec<Box<dyn ActionObserver>>,
    state: Mutex<State>,
}

impl ActionSerializer {
    pub fn new(
        engine: Arc<RemoteProxy<EngineMethod>>,
        selection: Arc<dyn SelectionSource>,
        events: Dispatcher,
    ) -> Self {
        Self {
            engine,
            selection,
            events,
            origin: ComponentId::next(),
            observers: Vec::new(),
            state: Mutex::new(State::default()),
        }
    }

    pub fn with_observer(mut self, observer: Box<dyn ActionObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Identity carried as `origin` on the events this serializer raises.
    pub fn origin(&self) -> ComponentId {
        self.origin
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> SerializerStatus {
        let state = self.lock();
        SerializerStatus {
            busy: state.busy,
            queued: state.queue.len(),
            current_page: state.current_page,
            page_count: state.page_count,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn last_render(&self) -> Option<RenderedPage> {
        self.lock().last_render.clone()
    }

    /// Last document snapshot fetched from the engine.
    pub fn snapshot(&self) -> Option<Arc<str>> {
        self.lock().last_snapshot.clone()
    }

    /// Seed page bounds after a document load.
    pub fn set_page_bounds(&self, current_page: u32, page_count: u32) {
        let mut state = self.lock();
        state.page_count = page_count;
        state.current_page = current_page.clamp(1, page_count.max(1));
    }

    /// Send `setOptions` unconditionally and remember what was sent.
    pub async fn sync_options(&self, options: ViewOptions) -> ActionResult<()> {
        let payload = serde_json::to_value(options)?;
        self.engine
            .invoke(EngineMethod::SetOptions, vec![payload])
            .await;
        self.lock().applied_options = Some(options);
        debug!(target: "actions.serializer", scale = options.scale, "options_synced");
        Ok(())
    }

    /// Apply `gesture` to the current selection, or queue it when a
    /// transaction is already in flight.
    ///
    /// The task that finds the serializer idle owns the transaction and also
    /// replays everything queued behind it before returning.
    pub async fn submit(&self, gesture: Gesture, options: ViewOptions) -> ActionResult<Submitted> {
        let claim = {
            let mut state = self.lock();
            if state.busy || !state.queue.is_empty() {
                state.queue.push_back(QueuedCall {
                    gesture: gesture.clone(),
                    options,
                });
                let position = state.queue.len();
                if state.busy {
                    Claim::Queued(position)
                } else {
                    // An abandoned owner left a backlog; it runs before this gesture.
                    state.busy = true;
                    Claim::Adopted(position)
                }
            } else {
                let chain = gesture.build_chain(&self.selection.snapshot());
                if !chain.is_empty() {
                    state.busy = true;
                }
                Claim::Owned(chain)
            }
        };

        let chain = match claim {
            Claim::Queued(position) => {
                self.announce_deferred(&gesture, position);
                return Ok(Submitted::Deferred { position });
            }
            Claim::Adopted(position) => {
                self.announce_deferred(&gesture, position);
                info!(target: "actions.serializer", queued = position, "backlog_adopted");
                let guard = BusyGuard {
                    owner: self,
                    armed: true,
                };
                self.drain().await;
                guard.release();
                return Ok(Submitted::Deferred { position });
            }
            Claim::Owned(chain) if chain.is_empty() => {
                GESTURES_SKIPPED.fetch_add(1, Ordering::Relaxed);
                debug!(target: "actions.serializer", gesture = %gesture.kind(), "gesture_skipped_empty_selection");
                return Ok(Submitted::Skipped);
            }
            Claim::Owned(chain) => chain,
        };

        let guard = BusyGuard {
            owner: self,
            armed: true,
        };
        let outcome = self.run_transaction(&gesture, chain, options).await;
        self.drain().await;
        guard.release();
        outcome.map(Submitted::Applied)
    }

    fn announce_deferred(&self, gesture: &Gesture, position: usize) {
        GESTURES_DEFERRED.fetch_add(1, Ordering::Relaxed);
        debug!(target: "actions.serializer", gesture = %gesture.kind(), position, "gesture_deferred");
        for observer in &self.observers {
            observer.on_deferred(gesture, position);
        }
    }

    async fn run_transaction(
        &self,
        gesture: &Gesture,
        chain: Vec<EditOperation>,
        options: ViewOptions,
    ) -> ActionResult<TransactionReport> {
        for observer in &self.observers {
            observer.on_transaction(gesture, &chain);
        }
        let kind = gesture.kind();
        let steps = chain.len();

        if !self.options_current(&options) {
            self.sync_options(options).await?;
        }
        self.lock().current_page = options.page;

        let payload = EditOperation::Chain(chain).to_value()?;
        let result = self.engine.invoke(EngineMethod::Edit, vec![payload]).await;
        if result != Value::Bool(true) {
            TRANSACTIONS_REJECTED.fetch_add(1, Ordering::Relaxed);
            warn!(target: "actions.serializer", gesture = %kind, steps, %result, "edit_rejected");
            return Ok(TransactionReport {
                gesture: kind,
                steps,
                accepted: false,
                rendered_page: None,
            });
        }
        TRANSACTIONS_APPLIED.fetch_add(1, Ordering::Relaxed);

        self.relayout(gesture.layout()).await;
        let page = self.render_page(options.page).await?;
        if gesture.commits_immediately() {
            self.commit().await?;
        }
        self.refresh_snapshot().await?;

        info!(target: "actions.serializer", gesture = %kind, steps, page, "transaction_applied");
        Ok(TransactionReport {
            gesture: kind,
            steps,
            accepted: true,
            rendered_page: Some(page),
        })
    }

    /// Replay the backlog, then commit. Loops when gestures were queued
    /// during the commit; returns only after clearing `busy`.
    async fn drain(&self) {
        // `busy` stays set through the final commit; late gestures queue.
        loop {
            while let Some(call) = self.pop_queued() {
                let kind = call.gesture.kind();
                let chain = call.gesture.build_chain(&self.selection.snapshot());
                if chain.is_empty() {
                    GESTURES_SKIPPED.fetch_add(1, Ordering::Relaxed);
                    debug!(target: "actions.serializer", gesture = %kind, "queued_gesture_skipped");
                    continue;
                }
                if let Err(e) = self.run_transaction(&call.gesture, chain, call.options).await {
                    warn!(target: "actions.serializer", gesture = %kind, %e, "queued_transaction_failed");
                }
            }

            if let Err(e) = self.finalize().await {
                warn!(target: "actions.serializer", %e, "finalize_failed");
            }

            {
                let mut state = self.lock();
                if state.queue.is_empty() {
                    state.busy = false;
                    debug!(target: "actions.serializer", "serializer_idle");
                    return;
                }
            }
        }
    }

    fn pop_queued(&self) -> Option<QueuedCall> {
        self.lock().queue.pop_front()
    }

    /// Page is view state, not engine state, so it is ignored here.
    fn options_current(&self, options: &ViewOptions) -> bool {
        self.lock()
            .applied_options
            .is_some_and(|applied| applied.on_page(1) == options.on_page(1))
    }
}

impl std::fmt::Debug for ActionSerializer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionSerializer")
            .field("origin", &self.origin)
            .field("status", &self.status())
            .field("observers", &self.observers.len())
            .finish()
    }
}
