//! Dispatch loop — turns Waiting items into running workers.
//!
//! The database rows are authoritative for ordering and for concurrency
//! accounting; nothing here caches queue state between cycles. The loop
//! wakes on a notification (insert, completion, resume) or on a timer
//! tick, and each cycle fills every free slot it can.

use crate::db::now_ts;
use crate::error::Result;
use crate::types::ItemId;
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

use super::Kaizoku;
use super::worker::{WorkerContext, run_worker};

/// Upper bound of Waiting rows examined per fill attempt
const CANDIDATE_SCAN_LIMIT: i64 = 64;

impl Kaizoku {
    /// Start the dispatch loop background task
    pub fn start_dispatch_loop(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();

        tokio::spawn(async move {
            tracing::info!("dispatch loop started");
            loop {
                if this.state.loops.is_cancelled() {
                    break;
                }

                if let Err(e) = this.dispatch_cycle().await {
                    tracing::error!(error = %e, "dispatch cycle failed");
                }

                tokio::select! {
                    _ = this.state.loops.cancelled() => break,
                    _ = this.state.wake.notified() => {}
                    _ = tokio::time::sleep(this.config.queue.dispatch_tick) => {}
                }
            }
            tracing::info!("dispatch loop stopped");
        })
    }

    /// Fill free worker slots from the queue.
    ///
    /// Selection order is the row order: priority ASC, created_at ASC,
    /// id ASC among due Waiting items on unpaused series. A candidate is
    /// skipped while its provider is paused or at its ceiling. Claims
    /// are conditional updates, so losing a race to a concurrent
    /// dispatcher just means re-selecting.
    pub(crate) async fn dispatch_cycle(&self) -> Result<()> {
        let global_ceiling = self.config.queue.simultaneous_downloads as i64;
        let provider_ceiling = self.config.queue.downloads_per_provider as i64;
        let lease_secs = self.config.queue.lease_duration.as_secs() as i64;

        loop {
            if self.state.loops.is_cancelled() {
                return Ok(());
            }

            let running = self.db.count_running().await?;
            if running >= global_ceiling {
                return Ok(());
            }

            let per_provider: HashMap<String, i64> =
                self.db.running_by_provider().await?.into_iter().collect();
            let paused = self
                .state
                .paused_providers
                .read()
                .map(|p| p.clone())
                .unwrap_or_default();

            let candidates = self.db.eligible_items(now_ts(), CANDIDATE_SCAN_LIMIT).await?;
            let next = candidates.into_iter().find(|item| {
                !paused.contains(&item.group_key)
                    && per_provider.get(&item.group_key).copied().unwrap_or(0) < provider_ceiling
            });

            let Some(item) = next else {
                return Ok(());
            };

            let id = ItemId(item.id);
            if !self.db.claim_item(id, now_ts(), lease_secs).await? {
                // Lost the claim race; re-select
                continue;
            }

            // Re-read so the worker sees the claimed row
            let Some(item) = self.db.get_item(id).await? else {
                continue;
            };

            tracing::info!(
                item_id = id.get(),
                group_key = %item.group_key,
                priority = item.priority,
                "dispatching item"
            );

            let cancel = CancellationToken::new();
            self.state.active.lock().await.insert(id, cancel.clone());

            let ctx = WorkerContext {
                item,
                kaizoku: self.clone(),
                cancel,
            };
            tokio::spawn(run_worker(ctx));
        }
    }
}
