//! Applying edit operations to a score.
//!
//! A chain is applied to a scratch copy and swapped in only when every step
//! succeeded. Each step yields the id it produced or touched, which the next
//! step can refer to through `[chained-id]`.

use crate::document::{Element, Score};
use crate::{EngineError, EngineResult};
use core_actions::operation::{DragParam, InsertParam, KeyDownParam, SetParam};
use core_actions::{EditOperation, ElementRef, ElementType};
use tracing::trace;

const KEY_BACKSPACE: u32 = 8;
const KEY_UP: u32 = 38;
const KEY_DOWN: u32 = 40;
const KEY_DELETE: u32 = 46;

const PITCH_NAMES: [&str; 7] = ["c", "d", "e", "f", "g", "a", "b"];

fn resolve<'a>(target: &'a ElementRef, previous: Option<&'a str>) -> EngineResult<&'a str> {
    match target {
        ElementRef::Id(id) => Ok(id.as_str()),
        ElementRef::Chained => previous.ok_or(EngineError::NoChainedId),
    }
}

/// Apply `op`. Returns the id produced by the step, if any. A failed chain
/// leaves `score` untouched.
pub fn apply(score: &mut Score, op: &EditOperation) -> EngineResult<Option<String>> {
    apply_step(score, op, None)
}

fn apply_step(
    score: &mut Score,
    op: &EditOperation,
    previous: Option<&str>,
) -> EngineResult<Option<String>> {
    match op {
        EditOperation::Chain(steps) => {
            let mut draft = score.clone();
            let mut last: Option<String> = previous.map(str::to_owned);
            for step in steps {
                if let Some(produced) = apply_step(&mut draft, step, last.as_deref())? {
                    last = Some(produced);
                }
            }
            *score = draft;
            Ok(last)
        }
        EditOperation::Insert(p) => insert(score, p, previous).map(Some),
        EditOperation::Delete(p) => {
            score.remove(resolve(&p.element_id, previous)?)?;
            Ok(None)
        }
        EditOperation::Set(p) => set(score, p, previous).map(Some),
        EditOperation::Drag(p) => drag(score, p, previous).map(Some),
        EditOperation::KeyDown(p) => key_down(score, p, previous),
        // Commit is handled by the engine; a score has nothing to flush.
        EditOperation::Commit => Ok(None),
    }
}

fn insert(score: &mut Score, p: &InsertParam, previous: Option<&str>) -> EngineResult<String> {
    let kind = ElementType::from_tag(&p.element_type);
    if kind == ElementType::Unknown {
        return Err(EngineError::UnsupportedType(p.element_type.clone()));
    }
    let start = resolve(&p.start_id, previous)?;
    let idx = score
        .index_of(start)
        .ok_or_else(|| EngineError::UnknownId(start.to_string()))?;
    let id = score.fresh_id(kind);
    let mut element = Element::new(id.clone(), kind);
    element.set_attr("startid", format!("#{start}"));
    score.insert_after(idx, element);
    trace!(target: "engine.edit", %id, start, "inserted");
    Ok(id)
}

fn set(score: &mut Score, p: &SetParam, previous: Option<&str>) -> EngineResult<String> {
    let id = resolve(&p.element_id, previous)?;
    score.get_mut(id)?.set_attr(p.attr_type.clone(), p.attr_value.clone());
    Ok(id.to_string())
}

fn drag(score: &mut Score, p: &DragParam, previous: Option<&str>) -> EngineResult<String> {
    let id = resolve(&p.element_id, previous)?;
    let el = score.get_mut(id)?;
    el.set_attr("x", p.x.to_string());
    el.set_attr("y", p.y.to_string());
    Ok(id.to_string())
}

fn key_down(
    score: &mut Score,
    p: &KeyDownParam,
    previous: Option<&str>,
) -> EngineResult<Option<String>> {
    let id = resolve(&p.element_id, previous)?.to_string();
    match p.key {
        KEY_UP | KEY_DOWN => {
            let direction = if p.key == KEY_UP { 1 } else { -1 };
            let steps = if p.shift_key || p.ctrl_key { 7 } else { 1 };
            transpose(score.get_mut(&id)?, direction * steps)?;
            Ok(Some(id))
        }
        KEY_DELETE | KEY_BACKSPACE => {
            score.remove(&id)?;
            Ok(None)
        }
        other => Err(EngineError::UnboundKey(other)),
    }
}

/// Move a note by diatonic steps (7 = one octave).
fn transpose(note: &mut Element, steps: i32) -> EngineResult<()> {
    let pitched = note
        .attr("pname")
        .and_then(|p| PITCH_NAMES.iter().position(|n| *n == p))
        .zip(note.attr("oct").and_then(|o| o.parse::<i32>().ok()));
    let Some((step, oct)) = pitched else {
        return Err(EngineError::NotPitched(note.id.clone()));
    };
    let absolute = oct * 7 + step as i32 + steps;
    note.set_attr("pname", PITCH_NAMES[absolute.rem_euclid(7) as usize]);
    note.set_attr("oct", absolute.div_euclid(7).to_string());
    Ok(())
}
