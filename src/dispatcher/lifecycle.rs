//! Graceful shutdown coordination.
//!
//! Startup recovery lives in [`Kaizoku::build`]: Running rows are
//! demoted before any loop starts, so no item is stranded across
//! crashes.

use crate::error::Result;

use super::Kaizoku;

impl Kaizoku {
    /// Gracefully shut down the orchestrator.
    ///
    /// Sequence:
    /// 1. Stop accepting new items
    /// 2. Stop the dispatch loop and sweeper
    /// 3. Wait for active workers up to the shutdown budget
    /// 4. Cancel whatever is still running (those items revert to
    ///    Waiting via lease expiry on the next run)
    /// 5. Close the database pool
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("initiating graceful shutdown");

        self.state
            .accepting_new
            .store(false, std::sync::atomic::Ordering::SeqCst);

        self.state.loops.cancel();
        tracing::info!("stopped intake and dispatch");

        let budget = self.config.queue.shutdown_budget;
        let drained = tokio::time::timeout(budget, self.wait_for_active_workers()).await;

        match drained {
            Ok(()) => tracing::info!("all active workers finished"),
            Err(_) => {
                let remaining = self.cancel_active_workers().await;
                tracing::warn!(
                    remaining,
                    "shutdown budget exhausted, cancelled remaining workers"
                );

                // Give cancelled workers a moment to record their state
                let _ = tokio::time::timeout(
                    std::time::Duration::from_secs(5),
                    self.wait_for_active_workers(),
                )
                .await;
            }
        }

        self.db.close().await;
        tracing::info!("graceful shutdown complete");
        Ok(())
    }

    async fn wait_for_active_workers(&self) {
        loop {
            if self.state.active.lock().await.is_empty() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }
    }

    /// Fire every active worker's cancellation token; returns how many
    /// were signalled
    async fn cancel_active_workers(&self) -> usize {
        let active = self.state.active.lock().await;
        for (id, token) in active.iter() {
            tracing::debug!(item_id = id.get(), "cancelling worker for shutdown");
            token.cancel();
        }
        active.len()
    }
}
