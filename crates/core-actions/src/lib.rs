//! Edit transactions against the shared engine document.
//!
//! * `operation` - edit operations and their `{action, param}` wire shape
//! * `selection` - selection snapshot + element-type allow-lists
//! * `gesture`   - user gestures and the chains they expand to
//! * `serializer` - single-flight transaction runner with a FIFO backlog
//!
//! Observers (`ActionObserver`) see every chain before it is sent and every
//! gesture that had to wait; they never influence the outcome.

use std::sync::atomic::AtomicU64;

pub mod gesture;
pub mod operation;
pub mod selection;
pub mod serializer;

pub use gesture::{Gesture, GestureKind, KeyModifiers, LayoutKind};
pub use operation::{CHAINED_ID, EditOperation, ElementRef};
pub use selection::{
    ElementType, Position, SelectedElement, SelectionSet, SelectionSource, SharedSelection,
    TypeFilter,
};
pub use serializer::{
    ActionSerializer, RenderedPage, SerializerStatus, Submitted, TransactionReport,
};

use core_rpc::EngineMethod;
use serde_json::Value;

// Relaxed counters, same convention as `core_events`.
pub static TRANSACTIONS_APPLIED: AtomicU64 = AtomicU64::new(0);
pub static TRANSACTIONS_REJECTED: AtomicU64 = AtomicU64::new(0);
pub static GESTURES_DEFERRED: AtomicU64 = AtomicU64::new(0);
pub static GESTURES_SKIPPED: AtomicU64 = AtomicU64::new(0); // empty filtered selection

/// Hook for tooling (script recorders, tests) that wants to watch the
/// serializer without participating.
pub trait ActionObserver: Send + Sync {
    /// Called with the complete chain right before it is sent.
    fn on_transaction(&self, _gesture: &Gesture, _chain: &[EditOperation]) {}
    /// Called when a gesture is queued behind the in-flight transaction.
    /// `position` is 1-based.
    fn on_deferred(&self, _gesture: &Gesture, _position: usize) {}
}

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to encode engine arguments: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("engine returned an unexpected value for `{method}`: {value}")]
    UnexpectedResult { method: EngineMethod, value: Value },
}

pub type ActionResult<T> = Result<T, ActionError>;
