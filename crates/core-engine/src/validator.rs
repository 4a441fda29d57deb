//! Schema validator peer.
//!
//! Checks the structural rules the editor relies on: well-formed XML, an
//! `<mei>` root, unique `xml:id`s on every addressable element and sane
//! pitches on notes. `validate` answers with a (possibly empty) list of
//! diagnostics; it never fails the call.

use core_actions::ElementType;
use core_rpc::{PeerHandler, ValidatorMethod};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashSet;
use tracing::{debug, info};

const PITCH_NAMES: &[&str] = &["c", "d", "e", "f", "g", "a", "b"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element: Option<String>,
}

impl Diagnostic {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            element: None,
        }
    }

    fn at(message: impl Into<String>, element: &str) -> Self {
        Self {
            message: message.into(),
            element: Some(element.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct ValidatorPeer {
    schema: Option<String>,
}

impl ValidatorPeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn validate(&self, text: &str) -> Vec<Diagnostic> {
        if self.schema.is_none() {
            return vec![Diagnostic::new("no schema loaded")];
        }
        check_document(text)
    }
}

fn attr_value(start: &BytesStart<'_>, name: &[u8]) -> Option<String> {
    start
        .attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| String::from_utf8(a.value.into_owned()).ok())
}

fn check_pitch(start: &BytesStart<'_>, label: &str, out: &mut Vec<Diagnostic>) {
    if let Some(pname) = attr_value(start, b"pname") {
        if !PITCH_NAMES.contains(&pname.as_str()) {
            out.push(Diagnostic::at(format!("invalid pname `{pname}`"), label));
        }
    }
    if let Some(oct) = attr_value(start, b"oct") {
        if !matches!(oct.parse::<u8>(), Ok(0..=9)) {
            out.push(Diagnostic::at(format!("invalid oct `{oct}`"), label));
        }
    }
}

fn check_document(text: &str) -> Vec<Diagnostic> {
    let mut reader = Reader::from_str(text);
    let mut out = Vec::new();
    let mut ids = HashSet::new();
    let mut root_seen = false;

    loop {
        let start = match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) => e,
            Ok(Event::Eof) => break,
            Ok(_) => continue,
            Err(e) => {
                out.push(Diagnostic::new(format!(
                    "not well-formed at byte {}: {e}",
                    reader.error_position()
                )));
                return out;
            }
        };
        if !root_seen {
            root_seen = true;
            if start.local_name().as_ref() != b"mei" {
                out.push(Diagnostic::new("root element must be <mei>"));
            }
        }
        let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let kind = ElementType::from_tag(&tag);
        if kind == ElementType::Unknown {
            continue;
        }
        let label = match attr_value(&start, b"xml:id") {
            Some(id) => {
                if !ids.insert(id.clone()) {
                    out.push(Diagnostic::at(format!("duplicate xml:id `{id}`"), &id));
                }
                id
            }
            None => {
                out.push(Diagnostic::new(format!("<{tag}> has no xml:id")));
                tag.clone()
            }
        };
        if kind == ElementType::Note {
            check_pitch(&start, &label, &mut out);
        }
    }
    if !root_seen {
        out.push(Diagnostic::new("document is empty"));
    }
    out
}

impl PeerHandler for ValidatorPeer {
    type Method = ValidatorMethod;

    async fn handle(&mut self, method: ValidatorMethod, arguments: Vec<Value>) -> Value {
        match method {
            ValidatorMethod::SetSchema => match arguments.first().and_then(Value::as_str) {
                Some(schema) => {
                    info!(target: "validator", schema, "schema_set");
                    self.schema = Some(schema.to_string());
                    json!(true)
                }
                None => json!(false),
            },
            ValidatorMethod::Validate => {
                let text = arguments.first().and_then(Value::as_str).unwrap_or_default();
                let diagnostics = self.validate(text);
                debug!(target: "validator", count = diagnostics.len(), "validated");
                serde_json::to_value(diagnostics).unwrap_or_else(|_| json!([]))
            }
        }
    }
}
