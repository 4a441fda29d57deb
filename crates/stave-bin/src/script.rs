//! Gesture scripts replayed by `stave --script`.
//!
//! A script is a JSON array. Each entry either changes the view
//! (`{"select": [...]}`, `{"zoom": 60}`, `{"page": 2}`) or is a gesture in
//! the serializer's wire shape (`{"gesture": "drag", "dx": 5, "dy": 0}`).

use anyhow::{Context, Result};
use core_actions::{Gesture, SelectedElement, Submitted};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Select { select: Vec<SelectedElement> },
    Zoom { zoom: u32 },
    Page { page: u32 },
    Gesture(Gesture),
}

pub fn parse(text: &str) -> Result<Vec<ScriptStep>> {
    serde_json::from_str(text).context("script must be a JSON array of steps")
}

pub fn load(path: &Path) -> Result<Vec<ScriptStep>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading script {}", path.display()))?;
    parse(&text).with_context(|| format!("parsing script {}", path.display()))
}

/// Outcome counts for one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayTally {
    pub applied: usize,
    pub rejected: usize,
    pub deferred: usize,
    pub skipped: usize,
}

impl ReplayTally {
    pub fn record(&mut self, outcome: &Submitted) {
        match outcome {
            Submitted::Applied(report) if report.accepted => self.applied += 1,
            Submitted::Applied(_) => self.rejected += 1,
            Submitted::Deferred { .. } => self.deferred += 1,
            Submitted::Skipped => self.skipped += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.applied + self.rejected + self.deferred + self.skipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_actions::{ElementType, GestureKind, KeyModifiers, Position, TransactionReport};
    use pretty_assertions::assert_eq;

    #[test]
    fn steps_parse_by_shape() {
        let steps = parse(
            r#"[
                {"select": [{"elementId": "note-1", "elementType": "note", "position": {"x": 10, "y": 20}}]},
                {"zoom": 60},
                {"page": 2},
                {"gesture": "drag", "dx": 5, "dy": 0},
                {"gesture": "keyDown", "key": 38, "modifiers": "SHIFT"}
            ]"#,
        )
        .unwrap();
        assert_eq!(
            steps,
            vec![
                ScriptStep::Select {
                    select: vec![SelectedElement::new(
                        "note-1",
                        ElementType::Note,
                        Position::new(10, 20)
                    )]
                },
                ScriptStep::Zoom { zoom: 60 },
                ScriptStep::Page { page: 2 },
                ScriptStep::Gesture(Gesture::Drag { dx: 5, dy: 0 }),
                ScriptStep::Gesture(Gesture::KeyDown {
                    key: 38,
                    modifiers: KeyModifiers::SHIFT
                }),
            ]
        );
    }

    #[test]
    fn unknown_steps_are_an_error() {
        assert!(parse(r#"[{"gesture": "explode"}]"#).is_err());
        assert!(parse(r#"{"zoom": 60}"#).is_err());
    }

    #[test]
    fn tally_splits_accepted_and_rejected() {
        let report = |accepted| TransactionReport {
            gesture: GestureKind::Drag,
            steps: 1,
            accepted,
            rendered_page: Some(1),
        };
        let mut tally = ReplayTally::default();
        tally.record(&Submitted::Applied(report(true)));
        tally.record(&Submitted::Applied(report(false)));
        tally.record(&Submitted::Deferred { position: 1 });
        tally.record(&Submitted::Skipped);
        assert_eq!(
            tally,
            ReplayTally {
                applied: 1,
                rejected: 1,
                deferred: 1,
                skipped: 1
            }
        );
        assert_eq!(tally.total(), 4);
    }
}
