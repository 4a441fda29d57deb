//! Engine calls that follow an accepted chain, plus the final commit.

use super::{ActionSerializer, RenderedPage};
use crate::gesture::LayoutKind;
use crate::operation::EditOperation;
use crate::{ActionError, ActionResult};
use core_events::Event;
use core_rpc::EngineMethod;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

fn expect_string(method: EngineMethod, value: Value) -> ActionResult<String> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ActionError::UnexpectedResult {
            method,
            value: other,
        }),
    }
}

fn expect_count(method: EngineMethod, value: Value) -> ActionResult<u32> {
    match value.as_u64().and_then(|n| u32::try_from(n).ok()) {
        Some(n) => Ok(n),
        None => Err(ActionError::UnexpectedResult { method, value }),
    }
}

impl ActionSerializer {
    pub(super) async fn relayout(&self, kind: LayoutKind) {
        let method = kind.method();
        let result = self.engine.invoke(method, vec![]).await;
        trace!(target: "actions.serializer", %method, %result, "relayout_done");
    }

    pub(super) async fn render_page(&self, page: u32) -> ActionResult<u32> {
        let value = self
            .engine
            .invoke(EngineMethod::RenderToSvg, vec![json!(page)])
            .await;
        let svg = expect_string(EngineMethod::RenderToSvg, value)?;
        trace!(target: "actions.serializer", page, size_bytes = svg.len(), "page_rendered");
        self.lock().last_render = Some(RenderedPage {
            page,
            svg: Arc::from(svg),
        });
        Ok(page)
    }

    /// Fetch the document and announce it to every view but ours.
    pub(super) async fn refresh_snapshot(&self) -> ActionResult<()> {
        let value = self.engine.invoke(EngineMethod::GetMei, vec![]).await;
        let document: Arc<str> = Arc::from(expect_string(EngineMethod::GetMei, value)?);
        self.lock().last_snapshot = Some(Arc::clone(&document));
        let report = self.events.dispatch(&Event::UpdateData {
            document,
            origin: Some(self.origin),
        });
        debug!(target: "actions.serializer", invoked = report.invoked, "snapshot_announced");
        Ok(())
    }

    /// Send `commit`, whether or not anything changed since the last one.
    pub(super) async fn commit(&self) -> ActionResult<()> {
        let payload = EditOperation::Commit.to_value()?;
        let result = self.engine.invoke(EngineMethod::Edit, vec![payload]).await;
        if result != Value::Bool(true) {
            warn!(target: "actions.serializer", %result, "commit_rejected");
        }
        Ok(())
    }

    pub(super) async fn refresh_page_count(&self) -> ActionResult<()> {
        let value = self.engine.invoke(EngineMethod::GetPageCount, vec![]).await;
        let count = expect_count(EngineMethod::GetPageCount, value)?;
        let moved = {
            let mut state = self.lock();
            state.page_count = count;
            let clamped = state.current_page.clamp(1, count.max(1));
            if clamped != state.current_page {
                state.current_page = clamped;
                Some(clamped)
            } else {
                None
            }
        };
        if let Some(page) = moved {
            info!(target: "actions.serializer", page, count, "current_page_clamped");
            self.events.dispatch(&Event::PageChange { page });
        }
        Ok(())
    }

    /// Commit, then refresh the page count and the snapshot. Runs after
    /// every drained backlog, including one whose only chain was rejected.
    pub(super) async fn finalize(&self) -> ActionResult<()> {
        self.commit().await?;
        self.refresh_page_count().await?;
        self.refresh_snapshot().await
    }
}
