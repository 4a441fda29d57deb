//! Export peer: PDF page sheets and Standard MIDI Files.
//!
//! Both exports take the document text as their first argument so the
//! export peer never shares state with the rendering engine. PDF output is a
//! plain-text PDF with one page object per layout page. MIDI output is a
//! format-0 file returned as an array of byte values.

use crate::document::{Element, Score};
use crate::layout::{EngineOptions, Pagination};
use core_actions::ElementType;
use core_rpc::{ExportMethod, PeerHandler};
use serde::Deserialize;
use serde_json::{Value, json};
use std::fmt::Write;
use tracing::{info, warn};

pub const TICKS_PER_QUARTER: u16 = 480;
const DEFAULT_VELOCITY: u8 = 80;
const TEMPO_US_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Default)]
pub struct ExportPeer {
    exports: u64,
}

impl ExportPeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exports(&self) -> u64 {
        self.exports
    }
}

/// MIDI key for a pitched note (`pname`, `oct`, optional `accid`).
pub fn midi_key(note: &Element) -> Option<u8> {
    let semitone: i32 = match note.attr("pname")? {
        "c" => 0,
        "d" => 2,
        "e" => 4,
        "f" => 5,
        "g" => 7,
        "a" => 9,
        "b" => 11,
        _ => return None,
    };
    let alter = match note.attr("accid").or_else(|| note.attr("accid.ges")) {
        Some("s") => 1,
        Some("f") => -1,
        Some("ss") | Some("x") => 2,
        Some("ff") => -2,
        _ => 0,
    };
    let oct: i32 = note.attr("oct")?.parse().ok()?;
    u8::try_from(12 * (oct + 1) + semitone + alter)
        .ok()
        .filter(|k| *k <= 127)
}

/// Length in ticks of an MEI `dur` (1 = whole, 4 = quarter ...).
fn duration_ticks(el: &Element) -> u32 {
    let dur: u32 = el
        .attr("dur")
        .and_then(|d| d.parse().ok())
        .filter(|d: &u32| d.is_power_of_two() && *d <= 64)
        .unwrap_or(4);
    u32::from(TICKS_PER_QUARTER) * 4 / dur
}

fn push_vlq(out: &mut Vec<u8>, mut value: u32) {
    let mut buf = [0u8; 5];
    let mut i = buf.len() - 1;
    buf[i] = (value & 0x7f) as u8;
    value >>= 7;
    while value > 0 {
        i -= 1;
        buf[i] = ((value & 0x7f) as u8) | 0x80;
        value >>= 7;
    }
    out.extend_from_slice(&buf[i..]);
}

/// Format-0 Standard MIDI File for `score`. Chords are played as
/// successive notes since the flat model keeps no simultaneity.
pub fn render_midi(score: &Score) -> Vec<u8> {
    let mut track = Vec::new();
    push_vlq(&mut track, 0);
    track.extend_from_slice(&[0xff, 0x51, 0x03]);
    track.extend_from_slice(&TEMPO_US_PER_QUARTER.to_be_bytes()[1..]);

    let mut pending_delta = 0u32;
    for el in score.elements() {
        match el.kind {
            ElementType::Note => {
                let ticks = duration_ticks(el);
                let Some(key) = midi_key(el) else {
                    pending_delta += ticks;
                    continue;
                };
                push_vlq(&mut track, pending_delta);
                track.extend_from_slice(&[0x90, key, DEFAULT_VELOCITY]);
                push_vlq(&mut track, ticks);
                track.extend_from_slice(&[0x80, key, 0]);
                pending_delta = 0;
            }
            ElementType::Rest => pending_delta += duration_ticks(el),
            _ => {}
        }
    }
    push_vlq(&mut track, pending_delta);
    track.extend_from_slice(&[0xff, 0x2f, 0x00]);

    let mut out = Vec::with_capacity(22 + track.len());
    out.extend_from_slice(b"MThd");
    out.extend_from_slice(&6u32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&1u16.to_be_bytes());
    out.extend_from_slice(&TICKS_PER_QUARTER.to_be_bytes());
    out.extend_from_slice(b"MTrk");
    out.extend_from_slice(&u32::try_from(track.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(&track);
    out
}

/// Minimal PDF: catalog, page tree and one empty page per layout page,
/// sized from the page options (tenths of mm to points).
pub fn render_pdf(score: &Score, options: &EngineOptions) -> String {
    let pages = Pagination::compute(score, options).page_count();
    let to_pt = |tenths: u32| u64::from(tenths) * 72 / 254;
    let (w, h) = (to_pt(options.page_width), to_pt(options.page_height));

    let mut out = String::from("%PDF-1.4\n");
    out.push_str("1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");
    let kids: Vec<String> = (0..pages).map(|i| format!("{} 0 R", i + 3)).collect();
    let _ = writeln!(
        out,
        "2 0 obj << /Type /Pages /Kids [{}] /Count {pages} >> endobj",
        kids.join(" ")
    );
    for i in 0..pages {
        let _ = writeln!(
            out,
            "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 {w} {h}] >> endobj",
            i + 3
        );
    }
    out.push_str("trailer << /Root 1 0 R >>\n%%EOF\n");
    out
}

impl PeerHandler for ExportPeer {
    type Method = ExportMethod;

    async fn handle(&mut self, method: ExportMethod, arguments: Vec<Value>) -> Value {
        let Some(text) = arguments.first().and_then(Value::as_str) else {
            warn!(target: "export", %method, "export_missing_document");
            return Value::Null;
        };
        let score = match Score::parse(text) {
            Ok(score) => score,
            Err(e) => {
                warn!(target: "export", %method, %e, "export_document_rejected");
                return Value::Null;
            }
        };
        self.exports += 1;
        match method {
            ExportMethod::RenderToPdf => {
                let options = arguments
                    .get(1)
                    .and_then(|v| EngineOptions::deserialize(v).ok())
                    .unwrap_or_default();
                let pdf = render_pdf(&score, &options);
                info!(target: "export", size_bytes = pdf.len(), "pdf_rendered");
                json!(pdf)
            }
            ExportMethod::RenderToMidi => {
                let midi = render_midi(&score);
                info!(target: "export", size_bytes = midi.len(), "midi_rendered");
                json!(midi)
            }
        }
    }
}
