//! Dispatch control — pause/resume, cancel, retry, delete.
//!
//! Provider and series pauses are advisory: they block selection but
//! never interrupt running work. Cancellation does interrupt: it fires
//! the running worker's token, and the worker reports the cancelled
//! attempt as a terminal failure.

use crate::error::{Error, Result};
use crate::types::{FailedAction, ItemId, Status};

use super::Kaizoku;

impl Kaizoku {
    /// Stop dispatching new items for a provider. Running items finish.
    pub fn pause_provider(&self, provider_id: &str) {
        if let Ok(mut paused) = self.state.paused_providers.write() {
            paused.insert(provider_id.to_string());
        }
        tracing::info!(provider = provider_id, "provider paused");
    }

    /// Resume dispatching for a provider
    pub fn resume_provider(&self, provider_id: &str) {
        if let Ok(mut paused) = self.state.paused_providers.write() {
            paused.remove(provider_id);
        }
        tracing::info!(provider = provider_id, "provider resumed");
        self.state.wake.notify_one();
    }

    /// Whether a provider is currently paused
    pub fn is_provider_paused(&self, provider_id: &str) -> bool {
        self.state
            .paused_providers
            .read()
            .map(|p| p.contains(provider_id))
            .unwrap_or(false)
    }

    /// Stop dispatching new items for a series. Running items finish.
    pub async fn pause_series(&self, series_id: i64) -> Result<()> {
        if !self.db.set_series_paused(series_id, true).await? {
            return Err(Error::SeriesNotFound(series_id));
        }
        tracing::info!(series_id, "series paused");
        Ok(())
    }

    /// Resume dispatching for a series
    pub async fn resume_series(&self, series_id: i64) -> Result<()> {
        if !self.db.set_series_paused(series_id, false).await? {
            return Err(Error::SeriesNotFound(series_id));
        }
        tracing::info!(series_id, "series resumed");
        self.state.wake.notify_one();
        Ok(())
    }

    /// Cancel an item.
    ///
    /// A Running item has its worker's token cancelled; the worker
    /// returns at its next page boundary and records the attempt as
    /// Failed/Cancelled (not retriable). A Waiting item goes terminal
    /// directly. Terminal items cannot be cancelled.
    pub async fn cancel_item(&self, id: ItemId) -> Result<()> {
        let item = self.db.get_item(id).await?.ok_or(Error::ItemNotFound(id.get()))?;

        match Status::from_i32(item.status) {
            Status::Running => {
                let active = self.state.active.lock().await;
                match active.get(&id) {
                    Some(token) => {
                        token.cancel();
                        tracing::info!(item_id = id.get(), "cancellation signalled to worker");
                        Ok(())
                    }
                    None => Err(Error::InvalidState {
                        id: id.get(),
                        operation: "cancel".to_string(),
                        current_state: "running on another dispatcher".to_string(),
                    }),
                }
            }
            Status::Waiting => {
                self.db.cancel_waiting(id).await?;
                tracing::info!(item_id = id.get(), "waiting item cancelled");
                Ok(())
            }
            status => Err(Error::InvalidState {
                id: id.get(),
                operation: "cancel".to_string(),
                current_state: format!("{:?}", status).to_lowercase(),
            }),
        }
    }

    /// Operator retry of a terminally Failed item: back to Waiting with
    /// backoff and attempts reset
    pub async fn retry_item(&self, id: ItemId) -> Result<()> {
        if !self.db.retry_failed(id).await? {
            let item = self.db.get_item(id).await?.ok_or(Error::ItemNotFound(id.get()))?;
            return Err(Error::InvalidState {
                id: id.get(),
                operation: "retry".to_string(),
                current_state: format!("{:?}", Status::from_i32(item.status)).to_lowercase(),
            });
        }

        tracing::info!(item_id = id.get(), "failed item requeued");
        self.state.wake.notify_one();
        Ok(())
    }

    /// Remove an item from the queue; refused while Running
    pub async fn delete_item(&self, id: ItemId) -> Result<()> {
        if !self.db.delete_item(id).await? {
            let item = self.db.get_item(id).await?.ok_or(Error::ItemNotFound(id.get()))?;
            return Err(Error::InvalidState {
                id: id.get(),
                operation: "delete".to_string(),
                current_state: format!("{:?}", Status::from_i32(item.status)).to_lowercase(),
            });
        }

        tracing::info!(item_id = id.get(), "item deleted");
        Ok(())
    }

    /// Operator action on a Failed-bucket item
    pub async fn manage_failed(&self, id: ItemId, action: FailedAction) -> Result<()> {
        match action {
            FailedAction::Retry => self.retry_item(id).await,
            FailedAction::Delete => {
                let item = self.db.get_item(id).await?.ok_or(Error::ItemNotFound(id.get()))?;
                if Status::from_i32(item.status) != Status::Failed {
                    return Err(Error::InvalidState {
                        id: id.get(),
                        operation: "delete failed".to_string(),
                        current_state: format!("{:?}", Status::from_i32(item.status))
                            .to_lowercase(),
                    });
                }
                self.delete_item(id).await
            }
        }
    }
}
