//! Per-view guard implementing the base-handler early-return chain.
//!
//! Every view handler starts with `guard.accepts(event)`: an inactive view
//! declines everything except `Activate`, and a view declines document or
//! selection events it raised itself (echo suppression). Overriding handlers
//! return `false` straight away when the guard declines.

use crate::dispatcher::Dispatcher;
use crate::{ComponentId, Event, EventKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::trace;

#[derive(Debug)]
pub struct ComponentGuard {
    id: ComponentId,
    label: &'static str,
    active: AtomicBool,
}

impl ComponentGuard {
    /// New guard with a fresh identity. Views start inactive.
    pub fn new(label: &'static str) -> Self {
        Self {
            id: ComponentId::next(),
            label,
            active: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Base handler check. `false` means the view must ignore `event`.
    pub fn accepts(&self, event: &Event) -> bool {
        if event.kind() == EventKind::Activate {
            return true;
        }
        if !self.is_active() {
            trace!(target: "events.component", component = self.label, kind = %event.kind(), "inactive_skip");
            return false;
        }
        if event.is_echo_for(self.id) {
            trace!(target: "events.component", component = self.label, kind = %event.kind(), "echo_suppressed");
            return false;
        }
        true
    }

    /// Bind `handler` on `dispatcher` behind this guard's early-return check.
    pub fn bind<F>(self: &Arc<Self>, dispatcher: &Dispatcher, kind: EventKind, handler: F) -> bool
    where
        F: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        let guard = Arc::clone(self);
        dispatcher.bind(self.id, kind, move |event| {
            if !guard.accepts(event) {
                return false;
            }
            handler(event)
        })
    }

    /// Standard activate/deactivate wiring every view shares.
    pub fn bind_lifecycle(self: &Arc<Self>, dispatcher: &Dispatcher) {
        let on = Arc::clone(self);
        self.bind(dispatcher, EventKind::Activate, move |_| {
            on.set_active(true);
            true
        });
        let off = Arc::clone(self);
        self.bind(dispatcher, EventKind::Deactivate, move |_| {
            off.set_active(false);
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inactive_guard_declines_until_activated() {
        let g = ComponentGuard::new("view");
        assert!(!g.accepts(&Event::PageChange { page: 2 }));
        assert!(g.accepts(&Event::Activate));
        g.set_active(true);
        assert!(g.accepts(&Event::PageChange { page: 2 }));
    }

    #[test]
    fn lifecycle_binding_toggles_active_flag() {
        let d = Dispatcher::new("root");
        let g = Arc::new(ComponentGuard::new("view"));
        g.bind_lifecycle(&d);
        d.dispatch(&Event::Activate);
        assert!(g.is_active());
        d.dispatch(&Event::Deactivate);
        assert!(!g.is_active());
    }
}
