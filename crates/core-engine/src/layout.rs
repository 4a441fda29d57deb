//! Pagination and SVG page output.
//!
//! Page capacity scales with page height and inversely with zoom: the
//! reference A4 page at scale 40 holds `BASE_CAPACITY` elements. With
//! `breaks = none` everything lands on one page. A loaded but empty score
//! still has one (empty) page.

use crate::document::Score;
use core_config::{Breaks, ViewOptions};
use quick_xml::escape::escape;
use serde::Deserialize;
use std::fmt::Write;
use std::ops::Range;

const BASE_CAPACITY: u64 = 24;
const REFERENCE_SCALE: u64 = 40;
const REFERENCE_HEIGHT: u64 = 2970;
const SLOTS_PER_ROW: usize = 8;

/// Engine-side view of `setOptions`. Missing keys keep their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    pub scale: u32,
    pub page_width: u32,
    pub page_height: u32,
    pub breaks: Breaks,
}

impl Default for EngineOptions {
    fn default() -> Self {
        ViewOptions::default().into()
    }
}

impl From<ViewOptions> for EngineOptions {
    fn from(v: ViewOptions) -> Self {
        Self {
            scale: v.scale,
            page_width: v.page_width,
            page_height: v.page_height,
            breaks: v.breaks,
        }
    }
}

impl EngineOptions {
    pub fn page_capacity(&self) -> usize {
        if self.breaks == Breaks::None {
            return usize::MAX;
        }
        let cap = BASE_CAPACITY * u64::from(self.page_height) * REFERENCE_SCALE
            / (REFERENCE_HEIGHT * u64::from(self.scale.max(1)));
        usize::try_from(cap).unwrap_or(usize::MAX).max(1)
    }

    /// Output size in pixels (page units are tenths of a millimetre).
    fn pixel_size(&self) -> (u64, u64) {
        let scale = u64::from(self.scale);
        (
            u64::from(self.page_width) * scale / 100,
            u64::from(self.page_height) * scale / 100,
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    pages: Vec<Range<usize>>,
}

impl Pagination {
    pub fn compute(score: &Score, options: &EngineOptions) -> Self {
        let len = score.len();
        if len == 0 {
            return Self { pages: vec![0..0] };
        }
        let cap = options.page_capacity();
        let pages = (0..len)
            .step_by(cap)
            .map(|start| start..start.saturating_add(cap).min(len))
            .collect();
        Self { pages }
    }

    pub fn page_count(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    /// 1-based page holding the element at `index`.
    pub fn page_of(&self, index: usize) -> Option<u32> {
        self.pages
            .iter()
            .position(|r| r.contains(&index))
            .and_then(|p| u32::try_from(p + 1).ok())
    }

    pub fn range(&self, page: u32) -> Option<Range<usize>> {
        let idx = usize::try_from(page).ok()?.checked_sub(1)?;
        self.pages.get(idx).cloned()
    }
}

/// Render one page. An out-of-range page yields an empty string; a page
/// range reaching past the end of `score` is cut short.
pub fn render_svg(score: &Score, pages: &Pagination, options: &EngineOptions, page: u32) -> String {
    let Some(range) = pages.range(page) else {
        return String::new();
    };
    let len = score.len();
    let range = range.start.min(len)..range.end.min(len);
    let (width, height) = options.pixel_size();
    let mut out = String::new();
    let _ = writeln!(
        out,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}px\" height=\"{height}px\" viewBox=\"0 0 {} {}\" data-page=\"{page}\">",
        options.page_width, options.page_height
    );
    out.push_str("<g class=\"page-margin\">\n");
    for (slot, el) in score.elements()[range].iter().enumerate() {
        let (x, y) = el.position().unwrap_or_else(|| {
            let col = (slot % SLOTS_PER_ROW) as i32;
            let row = (slot / SLOTS_PER_ROW) as i32;
            (100 + col * 240, 200 + row * 400)
        });
        let _ = write!(
            out,
            "<g id=\"{}\" class=\"{}\" transform=\"translate({x}, {y})\"",
            escape(el.id.as_str()),
            el.kind.as_str()
        );
        if el.text.is_empty() {
            out.push_str("/>\n");
        } else {
            let _ = writeln!(out, "><text>{}</text></g>", escape(el.text.as_str()));
        }
    }
    out.push_str("</g>\n</svg>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Element;
    use core_actions::ElementType;

    fn notes(n: usize) -> Score {
        Score::new(
            (1..=n)
                .map(|i| Element::new(format!("note-{i}"), ElementType::Note))
                .collect(),
        )
    }

    #[test]
    fn capacity_follows_zoom_and_breaks() {
        let base = EngineOptions::default();
        assert_eq!(base.page_capacity(), 24);
        let zoomed = EngineOptions { scale: 80, ..base };
        assert_eq!(zoomed.page_capacity(), 12);
        let unbroken = EngineOptions {
            breaks: Breaks::None,
            ..base
        };
        assert_eq!(Pagination::compute(&notes(100), &unbroken).page_count(), 1);
    }

    #[test]
    fn pages_partition_elements() {
        let opts = EngineOptions {
            scale: 80,
            ..EngineOptions::default()
        };
        let p = Pagination::compute(&notes(30), &opts);
        assert_eq!(p.page_count(), 3);
        assert_eq!(p.range(3), Some(24..30));
        assert_eq!(p.page_of(12), Some(2));
        assert_eq!(p.range(0), None);
        assert_eq!(Pagination::compute(&Score::default(), &opts).page_count(), 1);
    }

    #[test]
    fn svg_lists_page_elements_only() {
        let opts = EngineOptions {
            scale: 80,
            ..EngineOptions::default()
        };
        let score = notes(13);
        let pages = Pagination::compute(&score, &opts);
        let svg = render_svg(&score, &pages, &opts, 2);
        assert!(svg.contains("id=\"note-13\""));
        assert!(!svg.contains("id=\"note-12\""));
        assert!(svg.contains("data-page=\"2\""));
        assert!(render_svg(&score, &pages, &opts, 3).is_empty());
    }

    #[test]
    fn svg_survives_pagination_of_a_longer_score() {
        let opts = EngineOptions::default();
        let pages = Pagination::compute(&notes(5), &opts);
        let shorter = notes(3);
        let svg = render_svg(&shorter, &pages, &opts, 1);
        assert!(svg.contains("id=\"note-3\""));
        assert!(!svg.contains("id=\"note-4\""));
    }
}
