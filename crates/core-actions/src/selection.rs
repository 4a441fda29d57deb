//! Selection set read by the serializer.
//!
//! The selection belongs to the cursor/selection collaborator. The serializer
//! only ever takes a snapshot through `SelectionSource` and filters it by the
//! element types an operation supports.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Note,
    Chord,
    Rest,
    Dir,
    Dynam,
    Hairpin,
    Tempo,
    Pedal,
    Slur,
    Tie,
    Fermata,
    #[serde(other)]
    Unknown,
}

impl ElementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementType::Note => "note",
            ElementType::Chord => "chord",
            ElementType::Rest => "rest",
            ElementType::Dir => "dir",
            ElementType::Dynam => "dynam",
            ElementType::Hairpin => "hairpin",
            ElementType::Tempo => "tempo",
            ElementType::Pedal => "pedal",
            ElementType::Slur => "slur",
            ElementType::Tie => "tie",
            ElementType::Fermata => "fermata",
            ElementType::Unknown => "unknown",
        }
    }

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "note" => ElementType::Note,
            "chord" => ElementType::Chord,
            "rest" => ElementType::Rest,
            "dir" => ElementType::Dir,
            "dynam" => ElementType::Dynam,
            "hairpin" => ElementType::Hairpin,
            "tempo" => ElementType::Tempo,
            "pedal" => ElementType::Pedal,
            "slur" => ElementType::Slur,
            "tie" => ElementType::Tie,
            "fermata" => ElementType::Fermata,
            _ => ElementType::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Shifted by `(dx, dy)`, saturating at the `i32` bounds.
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedElement {
    pub element_id: String,
    pub element_type: ElementType,
    pub position: Position,
}

impl SelectedElement {
    pub fn new(element_id: impl Into<String>, element_type: ElementType, position: Position) -> Self {
        Self {
            element_id: element_id.into(),
            element_type,
            position,
        }
    }
}

/// Element-type allow-list applied before building a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeFilter(Vec<ElementType>);

impl TypeFilter {
    pub fn new(types: impl IntoIterator<Item = ElementType>) -> Self {
        Self(types.into_iter().collect())
    }

    pub fn notes() -> Self {
        Self::new([ElementType::Note])
    }

    /// Placement (above/below) applies to control events.
    pub fn placement() -> Self {
        Self::new([
            ElementType::Dir,
            ElementType::Dynam,
            ElementType::Hairpin,
            ElementType::Tempo,
            ElementType::Pedal,
        ])
    }

    pub fn stem_direction() -> Self {
        Self::new([ElementType::Note, ElementType::Chord])
    }

    pub fn allows(&self, ty: ElementType) -> bool {
        self.0.contains(&ty)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SelectionSet(Vec<SelectedElement>);

impl SelectionSet {
    pub fn new(items: Vec<SelectedElement>) -> Self {
        Self(items)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn first(&self) -> Option<&SelectedElement> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectedElement> {
        self.0.iter()
    }

    /// Selected items whose type passes `filter`, in selection order.
    pub fn filtered<'a>(
        &'a self,
        filter: &'a TypeFilter,
    ) -> impl Iterator<Item = &'a SelectedElement> + 'a {
        self.0.iter().filter(|el| filter.allows(el.element_type))
    }
}

impl FromIterator<SelectedElement> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = SelectedElement>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Read-only access to the current selection.
pub trait SelectionSource: Send + Sync {
    fn snapshot(&self) -> SelectionSet;
}

/// Selection owned by the cursor collaborator and shared with readers.
#[derive(Debug, Clone, Default)]
pub struct SharedSelection {
    inner: Arc<RwLock<SelectionSet>>,
}

impl SharedSelection {
    pub fn new(initial: SelectionSet) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial)),
        }
    }

    pub fn replace(&self, next: SelectionSet) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn clear(&self) {
        self.replace(SelectionSet::default());
    }
}

impl SelectionSource for SharedSelection {
    fn snapshot(&self) -> SelectionSet {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
