//! Flat score model.
//!
//! Only addressable elements (those whose tag is a known `ElementType`) are
//! kept, in document order; containers such as `<section>` or `<layer>` are
//! dropped and regenerated on output. Elements missing an `xml:id` get one
//! assigned on load. Nested elements (notes inside a chord) are flattened.

use crate::{EngineError, EngineResult};
use core_actions::ElementType;
use quick_xml::Reader;
use quick_xml::escape::{escape, unescape};
use quick_xml::events::{BytesStart, Event};
use std::collections::{BTreeMap, HashSet};
use std::fmt::Write;

pub const MEI_NS: &str = "http://www.music-encoding.org/ns/mei";
pub const MEI_VERSION: &str = "5.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub id: String,
    pub kind: ElementType,
    pub attrs: BTreeMap<String, String>,
    pub text: String,
}

impl Element {
    pub fn new(id: impl Into<String>, kind: ElementType) -> Self {
        Self {
            id: id.into(),
            kind,
            attrs: BTreeMap::new(),
            text: String::new(),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.attrs.insert(name.into(), value.into());
    }

    /// Explicit placement set by a drag, if any.
    pub fn position(&self) -> Option<(i32, i32)> {
        let x = self.attr("x")?.parse().ok()?;
        let y = self.attr("y")?.parse().ok()?;
        Some((x, y))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Score {
    elements: Vec<Element>,
}

fn utf8(bytes: &[u8]) -> EngineResult<&str> {
    Ok(std::str::from_utf8(bytes)?)
}

fn is_root(start: &BytesStart<'_>) -> bool {
    start.local_name().as_ref() == b"mei"
}

type ElementHead = (ElementType, Option<String>, BTreeMap<String, String>);

/// Known element tag, its id and remaining attributes; `None` for containers.
fn read_element(start: &BytesStart<'_>) -> EngineResult<Option<ElementHead>> {
    let kind = ElementType::from_tag(utf8(start.name().as_ref())?);
    if kind == ElementType::Unknown {
        return Ok(None);
    }
    let mut id = None;
    let mut attrs = BTreeMap::new();
    for attr in start.attributes() {
        let attr = attr?;
        let key = utf8(attr.key.as_ref())?;
        let value = unescape(utf8(&attr.value)?)?.into_owned();
        if key == "xml:id" {
            id = Some(value);
        } else {
            attrs.insert(key.to_string(), value);
        }
    }
    Ok(Some((kind, id, attrs)))
}

impl Score {
    pub fn new(elements: Vec<Element>) -> Self {
        Self { elements }
    }

    /// Parse MEI text. Fails on malformed XML, a missing `<mei>` root or a
    /// repeated `xml:id`.
    pub fn parse(text: &str) -> EngineResult<Self> {
        let mut reader = Reader::from_str(text);

        let mut score = Score::default();
        let mut ids = HashSet::new();
        let mut unnamed = Vec::new();
        let mut open: Option<usize> = None;
        let mut saw_root = false;

        loop {
            let event = reader.read_event()?;
            let (start, has_body) = match &event {
                Event::Start(e) => (e, true),
                Event::Empty(e) => (e, false),
                Event::Text(t) => {
                    if let Some(idx) = open {
                        let raw = utf8(t)?;
                        score.elements[idx].text.push_str(&unescape(raw)?);
                    }
                    continue;
                }
                Event::GeneralRef(r) => {
                    if let Some(idx) = open {
                        let entity = format!("&{};", utf8(r)?);
                        score.elements[idx].text.push_str(&unescape(&entity)?);
                    }
                    continue;
                }
                Event::End(e) => {
                    if let Some(idx) = open {
                        let el = &mut score.elements[idx];
                        if e.name().as_ref() == el.kind.as_str().as_bytes() {
                            el.text = el.text.trim().to_string();
                            open = None;
                        }
                    }
                    continue;
                }
                Event::Eof => break,
                _ => continue,
            };
            saw_root |= is_root(start);
            let Some((kind, id, attrs)) = read_element(start)? else {
                continue;
            };
            match &id {
                Some(id) if !ids.insert(id.clone()) => {
                    return Err(EngineError::DuplicateId(id.clone()));
                }
                Some(_) => {}
                None => unnamed.push(score.elements.len()),
            }
            score.elements.push(Element {
                id: id.unwrap_or_default(),
                kind,
                attrs,
                text: String::new(),
            });
            if has_body {
                open = Some(score.elements.len() - 1);
            }
        }

        if !saw_root {
            return Err(EngineError::NotMei);
        }
        for idx in unnamed {
            let id = score.fresh_id(score.elements[idx].kind);
            score.elements[idx].id = id;
        }
        Ok(score)
    }

    /// Serialize back to MEI, one element per line inside a single section.
    pub fn to_mei(&self) -> String {
        let mut out = String::with_capacity(128 + self.elements.len() * 48);
        let _ = writeln!(out, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
        let _ = writeln!(
            out,
            "<mei xmlns=\"{MEI_NS}\" meiversion=\"{MEI_VERSION}\"><music><body><mdiv><score><section>"
        );
        for el in &self.elements {
            let _ = write!(out, "  <{} xml:id=\"{}\"", el.kind.as_str(), escape(el.id.as_str()));
            for (k, v) in &el.attrs {
                let _ = write!(out, " {k}=\"{}\"", escape(v.as_str()));
            }
            if el.text.is_empty() {
                out.push_str("/>\n");
            } else {
                let _ = writeln!(out, ">{}</{}>", escape(el.text.as_str()), el.kind.as_str());
            }
        }
        out.push_str("</section></score></mdiv></body></music></mei>\n");
        out
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.elements.iter().position(|el| el.id == id)
    }

    pub fn get(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find(|el| el.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> EngineResult<&mut Element> {
        self.elements
            .iter_mut()
            .find(|el| el.id == id)
            .ok_or_else(|| EngineError::UnknownId(id.to_string()))
    }

    pub fn insert_after(&mut self, idx: usize, element: Element) {
        self.elements.insert(idx + 1, element);
    }

    pub fn remove(&mut self, id: &str) -> EngineResult<Element> {
        match self.index_of(id) {
            Some(idx) => Ok(self.elements.remove(idx)),
            None => Err(EngineError::UnknownId(id.to_string())),
        }
    }

    /// First `<tag>-<n>` not already in use.
    pub fn fresh_id(&self, kind: ElementType) -> String {
        let tag = kind.as_str();
        let mut n = self
            .elements
            .iter()
            .filter(|el| el.kind == kind && !el.id.is_empty())
            .count()
            + 1;
        loop {
            let candidate = format!("{tag}-{n}");
            if self.get(&candidate).is_none() {
                return candidate;
            }
            n += 1;
        }
    }
}
