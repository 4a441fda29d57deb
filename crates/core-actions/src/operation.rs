//! Edit operations in the engine's chain format.
//!
//! Every operation serializes as `{"action": <tag>, "param": <mapping>}`.
//! A `chain` carries an ordered array of operations as its `param` and is
//! applied by the engine all-or-nothing. Inside a chain, the string
//! `"[chained-id]"` stands for the id produced by the previous step.

use serde::{Deserialize, Serialize};

/// Placeholder resolved by the engine to the previous step's output id.
pub const CHAINED_ID: &str = "[chained-id]";

/// Element reference inside an edit parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ElementRef {
    Id(String),
    /// Output of the preceding chain step.
    Chained,
}

impl From<String> for ElementRef {
    fn from(raw: String) -> Self {
        if raw == CHAINED_ID {
            ElementRef::Chained
        } else {
            ElementRef::Id(raw)
        }
    }
}

impl From<ElementRef> for String {
    fn from(r: ElementRef) -> Self {
        match r {
            ElementRef::Id(id) => id,
            ElementRef::Chained => CHAINED_ID.to_string(),
        }
    }
}

impl From<&str> for ElementRef {
    fn from(raw: &str) -> Self {
        ElementRef::from(raw.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertParam {
    pub element_type: String,
    #[serde(rename = "startid")]
    pub start_id: ElementRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteParam {
    pub element_id: ElementRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetParam {
    pub element_id: ElementRef,
    pub attr_type: String,
    pub attr_value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DragParam {
    pub element_id: ElementRef,
    pub x: i32,
    pub y: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDownParam {
    pub element_id: ElementRef,
    pub key: u32,
    pub shift_key: bool,
    pub ctrl_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", content = "param", rename_all = "camelCase")]
pub enum EditOperation {
    Insert(InsertParam),
    Delete(DeleteParam),
    Set(SetParam),
    Drag(DragParam),
    KeyDown(KeyDownParam),
    Commit,
    Chain(Vec<EditOperation>),
}

impl EditOperation {
    pub fn tag(&self) -> &'static str {
        match self {
            EditOperation::Insert(_) => "insert",
            EditOperation::Delete(_) => "delete",
            EditOperation::Set(_) => "set",
            EditOperation::Drag(_) => "drag",
            EditOperation::KeyDown(_) => "keyDown",
            EditOperation::Commit => "commit",
            EditOperation::Chain(_) => "chain",
        }
    }

    /// Number of leaf steps (a chain counts its children).
    pub fn step_count(&self) -> usize {
        match self {
            EditOperation::Chain(children) => children.iter().map(Self::step_count).sum(),
            _ => 1,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}
