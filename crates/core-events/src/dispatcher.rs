//! Typed publish/subscribe dispatcher with a propagation set.
//!
//! Contract:
//! - `bind(subscriber, kind, handler)` stores at most one handler per
//!   `(subscriber, kind)`. A second bind for the same pair is ignored and the
//!   first handler stays (first registration wins, silently).
//! - `dispatch(event)` calls, in subscriber registration order, every handler
//!   whose kind matches, then recurses into each child dispatcher in insertion
//!   order. A dispatcher reachable along several paths still runs once per
//!   event.
//! - Handlers are invoked with no lock held, so a handler may bind, link, or
//!   raise further events.
//! - `add_child` refuses self-links and links that would close a cycle, and
//!   deduplicates by dispatcher identity.
//!
//! A handler returning `false` means "not applicable to me" (inactive view,
//! echo of its own event). The dispatcher does not branch on it; it only
//! tallies it in `DispatchReport`.

use crate::{
    ComponentId, DUPLICATE_BINDINGS, EVENTS_DISPATCHED, Event, EventError, EventKind,
    HANDLERS_DECLINED, HANDLERS_INVOKED, PROPAGATION_REJECTED,
};
use smallvec::SmallVec;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

pub type Handler = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatcherId(u64);

impl DispatcherId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Outcome of one `dispatch` call across the reached subtree.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// Dispatchers visited (root included).
    pub dispatchers: usize,
    /// Handlers called.
    pub invoked: usize,
    /// Handlers that returned `false`.
    pub declined: usize,
}

struct Subscription {
    subscriber: ComponentId,
    handlers: SmallVec<[(EventKind, Handler); 4]>,
}

#[derive(Default)]
struct Table {
    subscriptions: Vec<Subscription>,
    children: Vec<Dispatcher>,
}

struct Inner {
    id: DispatcherId,
    label: &'static str,
    table: Mutex<Table>,
}

/// Cheaply clonable handle; clones refer to the same dispatcher.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let table = self.table();
        f.debug_struct("Dispatcher")
            .field("label", &self.inner.label)
            .field("subscribers", &table.subscriptions.len())
            .field("children", &table.children.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: DispatcherId::next(),
                label,
                table: Mutex::new(Table::default()),
            }),
        }
    }

    pub fn id(&self) -> DispatcherId {
        self.inner.id
    }

    pub fn label(&self) -> &'static str {
        self.inner.label
    }

    fn table(&self) -> MutexGuard<'_, Table> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `(subscriber, kind)`. Returns `false` (and keeps
    /// the existing handler) when the pair is already bound.
    pub fn bind<F>(&self, subscriber: ComponentId, kind: EventKind, handler: F) -> bool
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let mut table = self.table();
        let pos = table
            .subscriptions
            .iter()
            .position(|s| s.subscriber == subscriber);
        let sub = match pos {
            Some(i) => &mut table.subscriptions[i],
            None => {
                table.subscriptions.push(Subscription {
                    subscriber,
                    handlers: SmallVec::new(),
                });
                let last = table.subscriptions.len() - 1;
                &mut table.subscriptions[last]
            }
        };
        if sub.handlers.iter().any(|(k, _)| *k == kind) {
            DUPLICATE_BINDINGS.fetch_add(1, Ordering::Relaxed);
            trace!(target: "events.bind", dispatcher = self.label(), %subscriber, %kind, "duplicate_binding_ignored");
            return false;
        }
        sub.handlers.push((kind, Arc::new(handler)));
        true
    }

    pub fn is_bound(&self, subscriber: ComponentId, kind: EventKind) -> bool {
        self.table()
            .subscriptions
            .iter()
            .filter(|s| s.subscriber == subscriber)
            .any(|s| s.handlers.iter().any(|(k, _)| *k == kind))
    }

    /// Drop every handler of `subscriber` (component teardown). Returns how
    /// many were removed.
    pub fn unbind(&self, subscriber: ComponentId) -> usize {
        let mut table = self.table();
        let mut removed = 0;
        table.subscriptions.retain(|s| {
            if s.subscriber == subscriber {
                removed += s.handlers.len();
                false
            } else {
                true
            }
        });
        removed
    }

    /// Link `child` into this dispatcher's propagation set. `Ok(false)` when
    /// it was already a member.
    pub fn add_child(&self, child: &Dispatcher) -> Result<bool, EventError> {
        if child.id() == self.id() {
            PROPAGATION_REJECTED.fetch_add(1, Ordering::Relaxed);
            warn!(target: "events.tree", dispatcher = self.label(), "self_link_rejected");
            return Err(EventError::SelfLink(self.label()));
        }
        if child.reaches(self.id()) {
            PROPAGATION_REJECTED.fetch_add(1, Ordering::Relaxed);
            warn!(target: "events.tree", parent = self.label(), child = child.label(), "cycle_rejected");
            return Err(EventError::Cycle {
                parent: self.label(),
                child: child.label(),
            });
        }
        let mut table = self.table();
        if table.children.iter().any(|c| c.id() == child.id()) {
            return Ok(false);
        }
        table.children.push(child.clone());
        debug!(target: "events.tree", parent = self.label(), child = child.label(), "linked");
        Ok(true)
    }

    pub fn remove_child(&self, child: &Dispatcher) -> bool {
        let mut table = self.table();
        let before = table.children.len();
        table.children.retain(|c| c.id() != child.id());
        table.children.len() != before
    }

    pub fn children(&self) -> Vec<Dispatcher> {
        self.table().children.clone()
    }

    /// Whether `target` is this dispatcher or sits somewhere below it.
    pub fn reaches(&self, target: DispatcherId) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![self.clone()];
        while let Some(node) = stack.pop() {
            if node.id() == target {
                return true;
            }
            if seen.insert(node.id()) {
                stack.extend(node.children());
            }
        }
        false
    }

    /// Deliver `event` to this dispatcher and its propagation subtree.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        EVENTS_DISPATCHED.fetch_add(1, Ordering::Relaxed);
        let mut report = DispatchReport::default();
        let mut visited = HashSet::new();
        self.dispatch_into(event, &mut visited, &mut report);
        trace!(
            target: "events.dispatch",
            root = self.label(),
            kind = %event.kind(),
            dispatchers = report.dispatchers,
            invoked = report.invoked,
            declined = report.declined,
            "dispatched"
        );
        report
    }

    fn dispatch_into(
        &self,
        event: &Event,
        visited: &mut HashSet<DispatcherId>,
        report: &mut DispatchReport,
    ) {
        if !visited.insert(self.id()) {
            return;
        }
        report.dispatchers += 1;
        let kind = event.kind();
        let (handlers, children) = {
            let table = self.table();
            let handlers: Vec<Handler> = table
                .subscriptions
                .iter()
                .flat_map(|s| s.handlers.iter())
                .filter(|(k, _)| *k == kind)
                .map(|(_, h)| Arc::clone(h))
                .collect();
            (handlers, table.children.clone())
        };
        for handler in handlers {
            report.invoked += 1;
            HANDLERS_INVOKED.fetch_add(1, Ordering::Relaxed);
            if !handler(event) {
                report.declined += 1;
                HANDLERS_DECLINED.fetch_add(1, Ordering::Relaxed);
            }
        }
        for child in children {
            child.dispatch_into(event, visited, report);
        }
    }
}
