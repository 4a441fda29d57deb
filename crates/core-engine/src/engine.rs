//! Rendering/layout engine peer.
//!
//! Holds at most one document. Option changes are stored by `setOptions` and
//! take effect at the next full layout (`redoLayout` or `loadData`). The
//! repositioning pass never repaginates, but an edit that adds or removes
//! elements repaginates at once with the options of the last full layout. Every failure is reported to the
//! caller as a `false`/empty result; nothing here panics on bad input.

use crate::document::Score;
use crate::edit;
use crate::layout::{self, EngineOptions, Pagination};
use core_actions::EditOperation;
use core_rpc::{EngineMethod, PeerHandler};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
pub struct EnginePeer {
    score: Option<Score>,
    options: EngineOptions,
    /// Options the current pagination was computed with.
    laid_out: EngineOptions,
    pages: Pagination,
    commits: u64,
}

impl EnginePeer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn score(&self) -> Option<&Score> {
        self.score.as_ref()
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }

    pub fn page_count(&self) -> u32 {
        match self.score {
            Some(_) => self.pages.page_count(),
            None => 0,
        }
    }

    /// Serve one call synchronously.
    pub fn call(&mut self, method: EngineMethod, arguments: &[Value]) -> Value {
        match method {
            EngineMethod::LoadData => self.load_data(arguments.first()),
            EngineMethod::SetOptions => self.set_options(arguments.first()),
            EngineMethod::Edit => self.edit(arguments.first()),
            EngineMethod::RedoLayout => {
                self.repaginate();
                json!(true)
            }
            EngineMethod::RedoPagePitchPosLayout => json!(self.score.is_some()),
            EngineMethod::RenderToSvg => {
                let page = arguments
                    .first()
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok())
                    .unwrap_or(1);
                match &self.score {
                    Some(score) => json!(layout::render_svg(score, &self.pages, &self.options, page)),
                    None => json!(""),
                }
            }
            EngineMethod::GetPageCount => json!(self.page_count()),
            EngineMethod::GetPageWithElement => {
                let page = arguments
                    .first()
                    .and_then(Value::as_str)
                    .zip(self.score.as_ref())
                    .and_then(|(id, score)| score.index_of(id))
                    .and_then(|idx| self.pages.page_of(idx))
                    .unwrap_or(0);
                json!(page)
            }
            EngineMethod::GetMei => json!(self.score.as_ref().map(Score::to_mei).unwrap_or_default()),
        }
    }

    fn repaginate(&mut self) {
        self.laid_out = self.options;
        self.repaginate_as_laid_out();
    }

    fn repaginate_as_laid_out(&mut self) {
        if let Some(score) = &self.score {
            self.pages = Pagination::compute(score, &self.laid_out);
            debug!(target: "engine", pages = self.pages.page_count(), "repaginated");
        }
    }

    fn load_data(&mut self, document: Option<&Value>) -> Value {
        let Some(text) = document.and_then(Value::as_str) else {
            warn!(target: "engine", "load_data_missing_document");
            return json!(false);
        };
        match Score::parse(text) {
            Ok(score) => {
                info!(target: "engine", elements = score.len(), "document_loaded");
                self.score = Some(score);
                self.repaginate();
                json!(true)
            }
            Err(e) => {
                warn!(target: "engine", %e, "document_rejected");
                json!(false)
            }
        }
    }

    fn set_options(&mut self, options: Option<&Value>) -> Value {
        match options.map(|v| EngineOptions::deserialize(v)) {
            Some(Ok(options)) => {
                self.options = options;
                json!(true)
            }
            Some(Err(e)) => {
                warn!(target: "engine", %e, "options_rejected");
                json!(false)
            }
            None => json!(false),
        }
    }

    fn edit(&mut self, operation: Option<&Value>) -> Value {
        let Some(score) = self.score.as_mut() else {
            warn!(target: "engine", "edit_without_document");
            return json!(false);
        };
        let op = match operation.map(|v| EditOperation::deserialize(v)) {
            Some(Ok(op)) => op,
            Some(Err(e)) => {
                warn!(target: "engine", %e, "edit_malformed");
                return json!(false);
            }
            None => return json!(false),
        };
        if matches!(op, EditOperation::Commit) {
            self.commits += 1;
            debug!(target: "engine", commits = self.commits, "committed");
            return json!(true);
        }
        let before = score.len();
        match edit::apply(score, &op) {
            Ok(produced) => {
                debug!(target: "engine", action = op.tag(), steps = op.step_count(), ?produced, "edit_applied");
                if score.len() != before {
                    self.repaginate_as_laid_out();
                }
                json!(true)
            }
            Err(e) => {
                warn!(target: "engine", action = op.tag(), %e, "edit_failed");
                json!(false)
            }
        }
    }
}

impl PeerHandler for EnginePeer {
    type Method = EngineMethod;

    async fn handle(&mut self, method: EngineMethod, arguments: Vec<Value>) -> Value {
        self.call(method, &arguments)
    }
}
