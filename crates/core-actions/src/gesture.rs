//! User gestures and the edit chains they expand to.
//!
//! A gesture is turned into a chain against a selection snapshot. Each kind
//! applies its own element-type allow-list first; whatever is filtered out is
//! simply not part of the chain, and an empty chain means "nothing to do".

use crate::operation::{
    DeleteParam, DragParam, EditOperation, ElementRef, InsertParam, KeyDownParam, SetParam,
};
use crate::selection::{ElementType, Position, SelectionSet, TypeFilter};
use core_rpc::EngineMethod;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct KeyModifiers: u8 {
        const SHIFT = 0b0000_0001;
        const CTRL  = 0b0000_0010;
    }
}

/// Layout pass requested after an accepted chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// Full re-layout (structure changed).
    Full,
    /// Cheap re-position of pitches/positions on the current page.
    Reposition,
}

impl LayoutKind {
    pub fn method(self) -> EngineMethod {
        match self {
            LayoutKind::Full => EngineMethod::RedoLayout,
            LayoutKind::Reposition => EngineMethod::RedoPagePitchPosLayout,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Delete,
    Drag,
    KeyDown,
    SetAttribute,
    Insert,
}

impl GestureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            GestureKind::Delete => "delete",
            GestureKind::Drag => "drag",
            GestureKind::KeyDown => "keyDown",
            GestureKind::SetAttribute => "set",
            GestureKind::Insert => "insert",
        }
    }
}

impl fmt::Display for GestureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "gesture", rename_all = "camelCase")]
pub enum Gesture {
    /// Delete selected notes.
    Delete,
    /// Move selected notes by an offset from their stored position.
    Drag { dx: i32, dy: i32 },
    /// Keyboard edit on selected notes (pitch up/down etc.).
    KeyDown {
        key: u32,
        #[serde(default = "KeyModifiers::empty")]
        modifiers: KeyModifiers,
    },
    /// Set one attribute on every selected element the allow-list admits.
    #[serde(rename_all = "camelCase")]
    SetAttribute {
        attribute: String,
        value: String,
        allow: TypeFilter,
    },
    /// Insert an element at a reference and drag it to `target`.
    #[serde(rename_all = "camelCase")]
    Insert {
        element_type: ElementType,
        #[serde(default)]
        reference: Option<String>,
        target: Position,
    },
}

impl Gesture {
    pub fn kind(&self) -> GestureKind {
        match self {
            Gesture::Delete => GestureKind::Delete,
            Gesture::Drag { .. } => GestureKind::Drag,
            Gesture::KeyDown { .. } => GestureKind::KeyDown,
            Gesture::SetAttribute { .. } => GestureKind::SetAttribute,
            Gesture::Insert { .. } => GestureKind::Insert,
        }
    }

    pub fn layout(&self) -> LayoutKind {
        match self {
            Gesture::Drag { .. } | Gesture::KeyDown { .. } => LayoutKind::Reposition,
            _ => LayoutKind::Full,
        }
    }

    /// Insertions commit right after their own transaction.
    pub fn commits_immediately(&self) -> bool {
        matches!(self, Gesture::Insert { .. })
    }

    /// Expand into chain steps against `selection`. Empty means no-op.
    pub fn build_chain(&self, selection: &SelectionSet) -> Vec<EditOperation> {
        let notes = TypeFilter::notes();
        match self {
            Gesture::Delete => selection
                .filtered(&notes)
                .map(|el| {
                    EditOperation::Delete(DeleteParam {
                        element_id: ElementRef::Id(el.element_id.clone()),
                    })
                })
                .collect(),
            Gesture::Drag { dx, dy } => selection
                .filtered(&notes)
                .map(|el| {
                    let to = el.position.offset(*dx, *dy);
                    EditOperation::Drag(DragParam {
                        element_id: ElementRef::Id(el.element_id.clone()),
                        x: to.x,
                        y: to.y,
                    })
                })
                .collect(),
            Gesture::KeyDown { key, modifiers } => selection
                .filtered(&notes)
                .map(|el| {
                    EditOperation::KeyDown(KeyDownParam {
                        element_id: ElementRef::Id(el.element_id.clone()),
                        key: *key,
                        shift_key: modifiers.contains(KeyModifiers::SHIFT),
                        ctrl_key: modifiers.contains(KeyModifiers::CTRL),
                    })
                })
                .collect(),
            Gesture::SetAttribute {
                attribute,
                value,
                allow,
            } => selection
                .filtered(allow)
                .map(|el| {
                    EditOperation::Set(SetParam {
                        element_id: ElementRef::Id(el.element_id.clone()),
                        attr_type: attribute.clone(),
                        attr_value: value.clone(),
                    })
                })
                .collect(),
            Gesture::Insert {
                element_type,
                reference,
                target,
            } => {
                let reference = reference
                    .clone()
                    .or_else(|| selection.first().map(|el| el.element_id.clone()));
                match reference {
                    Some(start) => vec![
                        EditOperation::Insert(InsertParam {
                            element_type: element_type.as_str().to_string(),
                            start_id: ElementRef::Id(start),
                        }),
                        EditOperation::Drag(DragParam {
                            element_id: ElementRef::Chained,
                            x: target.x,
                            y: target.y,
                        }),
                    ],
                    None => Vec::new(),
                }
            }
        }
    }
}
