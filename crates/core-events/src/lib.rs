//! Event catalogue and publish/subscribe plumbing shared by every view.
//!
//! Views never hold references to each other. Each owns a `Dispatcher`;
//! dispatchers are linked into a propagation tree and an event raised at any
//! node reaches every handler registered for its kind below that node.
//!
//! * `dispatcher` - subscription table + propagation set
//! * `component`  - per-view guard (active flag, echo suppression)
//! * `debounce`   - cancel-on-supersede delayed actions (resize/drag relayout)

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub mod component;
pub mod debounce;
pub mod dispatcher;

pub use component::ComponentGuard;
pub use debounce::Debouncer;
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherId, Handler};

// -------------------------------------------------------------------------------------------------
// Telemetry
// -------------------------------------------------------------------------------------------------
// Relaxed atomic counters; inspected by tests and logged by the binary on shutdown.
// -------------------------------------------------------------------------------------------------
pub static EVENTS_DISPATCHED: AtomicU64 = AtomicU64::new(0);
pub static HANDLERS_INVOKED: AtomicU64 = AtomicU64::new(0);
pub static HANDLERS_DECLINED: AtomicU64 = AtomicU64::new(0); // handler returned false
pub static DUPLICATE_BINDINGS: AtomicU64 = AtomicU64::new(0);
pub static PROPAGATION_REJECTED: AtomicU64 = AtomicU64::new(0); // self-links + cycles
pub static DEBOUNCE_SUPERSEDED: AtomicU64 = AtomicU64::new(0);

/// Identity of a subscribing component. Also used as the originating
/// reference carried by selection and document events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(u64);

impl ComponentId {
    /// Fresh process-unique id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component#{}", self.0)
    }
}

/// Discriminant used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Activate,
    Deactivate,
    StartLoading,
    EndLoading,
    Resize,
    Zoom,
    PageChange,
    LoadData,
    UpdateData,
    SelectionChange,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Activate,
        EventKind::Deactivate,
        EventKind::StartLoading,
        EventKind::EndLoading,
        EventKind::Resize,
        EventKind::Zoom,
        EventKind::PageChange,
        EventKind::LoadData,
        EventKind::UpdateData,
        EventKind::SelectionChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Activate => "onActivate",
            EventKind::Deactivate => "onDeactivate",
            EventKind::StartLoading => "onStartLoading",
            EventKind::EndLoading => "onEndLoading",
            EventKind::Resize => "onResize",
            EventKind::Zoom => "onZoom",
            EventKind::PageChange => "onPage",
            EventKind::LoadData => "onLoadData",
            EventKind::UpdateData => "onUpdateData",
            EventKind::SelectionChange => "onSelect",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle and document events exchanged between views.
///
/// Document and selection events carry `origin`, the component that raised
/// them. Handlers on that same component must ignore them (see
/// `ComponentGuard::accepts`); the dispatcher itself delivers to everyone.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Activate,
    Deactivate,
    StartLoading {
        message: String,
    },
    EndLoading,
    Resize {
        width: u32,
        height: u32,
    },
    Zoom {
        scale: u32,
    },
    PageChange {
        page: u32,
    },
    LoadData {
        document: Arc<str>,
        origin: Option<ComponentId>,
    },
    UpdateData {
        document: Arc<str>,
        origin: Option<ComponentId>,
    },
    SelectionChange {
        element_id: String,
        element_type: String,
        origin: Option<ComponentId>,
    },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Activate => EventKind::Activate,
            Event::Deactivate => EventKind::Deactivate,
            Event::StartLoading { .. } => EventKind::StartLoading,
            Event::EndLoading => EventKind::EndLoading,
            Event::Resize { .. } => EventKind::Resize,
            Event::Zoom { .. } => EventKind::Zoom,
            Event::PageChange { .. } => EventKind::PageChange,
            Event::LoadData { .. } => EventKind::LoadData,
            Event::UpdateData { .. } => EventKind::UpdateData,
            Event::SelectionChange { .. } => EventKind::SelectionChange,
        }
    }

    /// Originating component, for events that carry one.
    pub fn origin(&self) -> Option<ComponentId> {
        match self {
            Event::LoadData { origin, .. }
            | Event::UpdateData { origin, .. }
            | Event::SelectionChange { origin, .. } => *origin,
            _ => None,
        }
    }

    /// True when `component` raised this event itself.
    pub fn is_echo_for(&self, component: ComponentId) -> bool {
        self.origin() == Some(component)
    }
}

/// Errors from propagation-tree maintenance.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("dispatcher `{0}` cannot propagate to itself")]
    SelfLink(&'static str),
    #[error("linking `{parent}` -> `{child}` would create a propagation cycle")]
    Cycle {
        parent: &'static str,
        child: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        let ev = Event::PageChange { page: 3 };
        assert_eq!(ev.kind(), EventKind::PageChange);
        assert_eq!(ev.kind().as_str(), "onPage");
        assert_eq!(Event::Activate.kind(), EventKind::Activate);
    }

    #[test]
    fn only_document_and_selection_events_carry_origin() {
        let me = ComponentId::next();
        let sel = Event::SelectionChange {
            element_id: "note-1".into(),
            element_type: "note".into(),
            origin: Some(me),
        };
        assert!(sel.is_echo_for(me));
        assert!(!sel.is_echo_for(ComponentId::next()));
        assert_eq!(Event::Zoom { scale: 40 }.origin(), None);
    }

    #[test]
    fn component_ids_are_unique() {
        let a = ComponentId::next();
        let b = ComponentId::next();
        assert_ne!(a, b);
        assert!(b.raw() > a.raw());
    }

    #[test]
    fn kind_names_are_distinct() {
        let mut names: Vec<_> = EventKind::ALL.iter().map(EventKind::as_str).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), EventKind::ALL.len());
    }
}
