//! Per-item worker lifecycle.
//!
//! A worker owns exactly one claimed item: it heartbeats the lease,
//! runs the chapter builder, and applies the outcome to the queue row
//! (complete, reschedule with backoff, or terminal failure). Slot
//! release is implicit — the dispatcher derives running counts from the
//! database — but completion nudges the dispatch loop so the next item
//! starts without waiting for the timer.

use crate::db::DownloadItemRow;
use crate::error::ErrorKind;
use crate::retry::queue_backoff;
use crate::types::{ItemId, Status};
use tokio_util::sync::CancellationToken;

use super::Kaizoku;
use super::chapter::{self, ChapterOutcome};

/// Everything a spawned worker needs
pub(crate) struct WorkerContext {
    pub(crate) item: DownloadItemRow,
    pub(crate) kaizoku: Kaizoku,
    pub(crate) cancel: CancellationToken,
}

/// Run one worker to completion. Never panics outward; every exit path
/// updates the queue row and deregisters the worker.
pub(crate) async fn run_worker(ctx: WorkerContext) {
    let id = ItemId(ctx.item.id);

    let heartbeat_stop = ctx.cancel.child_token();
    let heartbeat = tokio::spawn(heartbeat_loop(
        ctx.kaizoku.clone(),
        id,
        heartbeat_stop.clone(),
    ));

    let outcome = chapter::run_chapter_task(&ctx.kaizoku, &ctx.item, &ctx.cancel).await;

    heartbeat_stop.cancel();
    let _ = heartbeat.await;

    finalize(&ctx, outcome).await;

    ctx.kaizoku.state.active.lock().await.remove(&id);
    ctx.kaizoku.state.wake.notify_one();
}

/// Advance the item's lease at a third of the lease duration so the
/// sweeper never reclaims a live worker.
async fn heartbeat_loop(kaizoku: Kaizoku, id: ItemId, stop: CancellationToken) {
    let lease_secs = kaizoku.config.queue.lease_duration.as_secs() as i64;
    let interval = kaizoku.config.queue.heartbeat_interval();

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }

        match kaizoku.db.heartbeat(id, crate::db::now_ts(), lease_secs).await {
            Ok(true) => {}
            Ok(false) => {
                // No longer Running: swept or cancelled underneath us
                tracing::warn!(item_id = id.get(), "heartbeat found item no longer running");
                return;
            }
            Err(e) => {
                tracing::error!(item_id = id.get(), error = %e, "heartbeat failed");
            }
        }
    }
}

/// Apply a finished attempt to the queue row
async fn finalize(ctx: &WorkerContext, outcome: ChapterOutcome) {
    let id = ItemId(ctx.item.id);
    let kaizoku = &ctx.kaizoku;

    match outcome.status {
        Status::Completed => {
            if let Err(e) = kaizoku.db.mark_completed(id).await {
                tracing::error!(item_id = id.get(), error = %e, "failed to record completion");
            }
        }
        _ => {
            let (kind, message) = outcome
                .error
                .unwrap_or((ErrorKind::Unknown, "attempt failed without detail".to_string()));

            let attempts_so_far = ctx.item.attempt_count as u32;
            let max_retries = kaizoku.config.queue.chapter_fail_retries;

            if kind.is_retriable() && attempts_so_far < max_retries {
                let base = kaizoku.config.queue.retry_base();
                let mut delay = queue_backoff(base, attempts_so_far);
                if kind == ErrorKind::RateLimit {
                    delay *= 2;
                }

                tracing::info!(
                    item_id = id.get(),
                    attempt = attempts_so_far + 1,
                    delay_secs = delay.as_secs(),
                    error_kind = %kind,
                    "rescheduling failed item"
                );

                if let Err(e) = kaizoku
                    .db
                    .reschedule_failure(id, delay.as_secs() as i64, kind, &message)
                    .await
                {
                    tracing::error!(item_id = id.get(), error = %e, "failed to reschedule item");
                }
            } else {
                tracing::warn!(
                    item_id = id.get(),
                    attempts = attempts_so_far + 1,
                    error_kind = %kind,
                    "item failed terminally"
                );

                if let Err(e) = kaizoku.db.mark_failed(id, kind, &message).await {
                    tracing::error!(item_id = id.get(), error = %e, "failed to record failure");
                }
            }
        }
    }
}
