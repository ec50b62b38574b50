//! Lease sweeper — reclaims items from crashed workers.
//!
//! A Running item whose lease has expired belongs to a worker that
//! stopped heartbeating. The sweep demotes it back to Waiting (counted
//! as a failed attempt) or fails it terminally when attempts are spent.

use crate::error::Result;

use super::Kaizoku;

impl Kaizoku {
    /// Start the sweeper background task
    pub fn start_sweeper(&self) -> tokio::task::JoinHandle<()> {
        let this = self.clone();
        let interval = self.config.queue.sweep_interval();

        tokio::spawn(async move {
            tracing::info!(interval_secs = interval.as_secs(), "lease sweeper started");
            loop {
                tokio::select! {
                    _ = this.state.loops.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }

                if let Err(e) = this.sweep_cycle().await {
                    tracing::error!(error = %e, "lease sweep failed");
                }
            }
            tracing::info!("lease sweeper stopped");
        })
    }

    /// One sweep pass over expired leases
    pub(crate) async fn sweep_cycle(&self) -> Result<()> {
        let max_retries = self.config.queue.chapter_fail_retries as i64;
        let (demoted, exhausted) = self.db.sweep_expired_leases(max_retries).await?;

        if demoted > 0 || exhausted > 0 {
            tracing::warn!(demoted, exhausted, "reclaimed expired worker leases");
            self.state.wake.notify_one();
        }

        Ok(())
    }
}
