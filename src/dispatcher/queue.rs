//! Queue insertion, listing, and metrics.

use crate::db::NewDownloadItem;
use crate::error::{Error, Result};
use crate::types::{DownloadArgs, ItemId, ListFilter, QueueItem, QueueMetrics, SourceReport};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::Kaizoku;

/// Reporting window for failed counts and the per-source report
const REPORT_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Request to enqueue one chapter download
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct EnqueueRequest {
    /// Logical series to download for
    pub series_id: i64,

    /// Binding the chapter was discovered through
    pub source_binding_id: i64,

    /// Chapter index within the source's chapter list
    pub chapter_index: i64,

    /// Priority; lower dispatches first. Chapter number by convention,
    /// so older chapters ship before newer ones within a series.
    pub priority: i64,

    /// Display chapter number ("10", "10.5", ...)
    pub chapter_number: String,

    /// Chapter title, if the chapter list knew it
    #[serde(default)]
    pub chapter_title: Option<String>,

    /// Expected page count, if the chapter list knew it
    #[serde(default)]
    pub expected_pages: Option<u32>,
}

impl Kaizoku {
    /// Insert a chapter download into the queue.
    ///
    /// Deduplicates against existing non-terminal items for the same
    /// (series, source, chapter): re-enqueueing returns the existing
    /// item's id.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<ItemId> {
        if !self
            .state
            .accepting_new
            .load(std::sync::atomic::Ordering::SeqCst)
        {
            return Err(Error::ShuttingDown);
        }

        let series = self
            .db
            .get_series(request.series_id)
            .await?
            .ok_or(Error::SeriesNotFound(request.series_id))?;

        let bindings = self.db.bindings_for_series(request.series_id).await?;
        let binding = bindings
            .iter()
            .find(|b| b.id == request.source_binding_id)
            .ok_or(Error::BindingNotFound(request.source_binding_id))?;

        if let Some(existing) = self
            .db
            .find_active_item(series.id, &binding.source_id, request.chapter_index)
            .await?
        {
            tracing::debug!(
                item_id = existing.id,
                series_id = series.id,
                chapter_index = request.chapter_index,
                "enqueue deduplicated against existing item"
            );
            return Ok(ItemId(existing.id));
        }

        let args = DownloadArgs {
            series_id: series.id,
            source_id: binding.source_id.clone(),
            series_key: binding.series_key.clone(),
            chapter_index: request.chapter_index,
            chapter_number: request.chapter_number,
            chapter_title: request.chapter_title,
            language: binding.language.clone(),
            scanlator: binding.scanlator.clone(),
            expected_pages: request.expected_pages,
        };

        let id = self
            .db
            .insert_item(&NewDownloadItem {
                group_key: binding.source_id.clone(),
                priority: request.priority,
                args,
            })
            .await?;

        tracing::info!(
            item_id = id.get(),
            series_id = series.id,
            group_key = %binding.source_id,
            chapter_index = request.chapter_index,
            "item enqueued"
        );

        self.state.wake.notify_one();
        Ok(id)
    }

    /// List queue items with optional filters; returns the total match
    /// count alongside the page
    pub async fn list(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<QueueItem>)> {
        let (total, rows) = self.db.list_items(filter, limit, offset).await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(row.to_queue_item()?);
        }

        Ok((total, items))
    }

    /// Get one queue item
    pub async fn get_item(&self, id: ItemId) -> Result<QueueItem> {
        self.db
            .get_item(id)
            .await?
            .ok_or(Error::ItemNotFound(id.get()))?
            .to_queue_item()
    }

    /// Queue counters for dashboards
    pub async fn metrics(&self) -> Result<QueueMetrics> {
        self.db.queue_metrics(REPORT_WINDOW_SECS).await
    }

    /// Per-provider failure counts and mean durations over the last day
    pub async fn source_report(&self) -> Result<Vec<SourceReport>> {
        self.db.source_report(REPORT_WINDOW_SECS).await
    }
}
