//! Download queue CRUD, claim protocol, and lease sweeping.
//!
//! Every status transition is a conditional update keyed on the row's
//! current status, so concurrent dispatchers and workers can share the
//! same database without double-claiming.

use crate::error::{DatabaseError, ErrorKind};
use crate::types::{ItemId, ListFilter, QueueMetrics, SourceReport, Status};
use crate::{Error, Result};

use super::{Database, DownloadItemRow, NewDownloadItem};

const ITEM_COLUMNS: &str = r#"
    id, group_key, series_id, source_id, chapter_index, status, priority,
    scheduled_at, created_at, started_at, completed_at, attempt_count,
    lease_expires_at, error_kind, error_message, args
"#;

impl Database {
    /// Insert a new queue item in Waiting status
    pub async fn insert_item(&self, item: &NewDownloadItem) -> Result<ItemId> {
        let now = super::now_ts();
        let args_json = serde_json::to_string(&item.args)?;

        let result = sqlx::query(
            r#"
            INSERT INTO download_items (
                group_key, series_id, source_id, chapter_index, status,
                priority, scheduled_at, created_at, attempt_count, args
            ) VALUES (?, ?, ?, ?, 0, ?, ?, ?, 0, ?)
            "#,
        )
        .bind(&item.group_key)
        .bind(item.args.series_id)
        .bind(&item.args.source_id)
        .bind(item.args.chapter_index)
        .bind(item.priority)
        .bind(now)
        .bind(now)
        .bind(&args_json)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert item: {}",
                e
            )))
        })?;

        Ok(ItemId(result.last_insert_rowid()))
    }

    /// Get a queue item by ID
    pub async fn get_item(&self, id: ItemId) -> Result<Option<DownloadItemRow>> {
        let row = sqlx::query_as::<_, DownloadItemRow>(&format!(
            "SELECT {ITEM_COLUMNS} FROM download_items WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to get item: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Find the non-terminal item for a (series, source, chapter) tuple,
    /// used by enqueue deduplication
    pub async fn find_active_item(
        &self,
        series_id: i64,
        source_id: &str,
        chapter_index: i64,
    ) -> Result<Option<DownloadItemRow>> {
        let row = sqlx::query_as::<_, DownloadItemRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM download_items
            WHERE series_id = ? AND source_id = ? AND chapter_index = ?
              AND status IN (0, 1)
            "#
        ))
        .bind(series_id)
        .bind(source_id)
        .bind(chapter_index)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find active item: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List queue items with optional filters, newest terminal last.
    ///
    /// Returns the total matching count alongside the requested page.
    pub async fn list_items(
        &self,
        filter: &ListFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(i64, Vec<DownloadItemRow>)> {
        let status = filter.status.map(|s| s.to_i32());
        let keyword = filter.keyword.as_ref().map(|k| format!("%{}%", k));

        let where_clause = r#"
            WHERE (?1 IS NULL OR status = ?1)
              AND (?2 IS NULL OR series_id = ?2)
              AND (?3 IS NULL OR args LIKE ?3 OR error_message LIKE ?3 OR group_key LIKE ?3)
        "#;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM download_items {where_clause}"
        ))
        .bind(status)
        .bind(filter.series_id)
        .bind(&keyword)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count items: {}",
                e
            )))
        })?;

        let rows = sqlx::query_as::<_, DownloadItemRow>(&format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM download_items
            {where_clause}
            ORDER BY priority ASC, created_at ASC, id ASC
            LIMIT ?4 OFFSET ?5
            "#
        ))
        .bind(status)
        .bind(filter.series_id)
        .bind(&keyword)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to list items: {}",
                e
            )))
        })?;

        Ok((total, rows))
    }

    /// Fetch dispatch candidates: Waiting, due, and not on a paused
    /// series, in strict selection order.
    ///
    /// Per-provider ceilings are applied by the caller against
    /// [`Self::running_by_provider`], so the limit here is only a
    /// scan bound.
    pub async fn eligible_items(&self, now: i64, limit: i64) -> Result<Vec<DownloadItemRow>> {
        let rows = sqlx::query_as::<_, DownloadItemRow>(
            r#"
            SELECT
                i.id, i.group_key, i.series_id, i.source_id, i.chapter_index,
                i.status, i.priority, i.scheduled_at, i.created_at, i.started_at,
                i.completed_at, i.attempt_count, i.lease_expires_at,
                i.error_kind, i.error_message, i.args
            FROM download_items i
            LEFT JOIN series s ON s.id = i.series_id
            WHERE i.status = 0
              AND i.scheduled_at <= ?
              AND COALESCE(s.paused, 0) = 0
            ORDER BY i.priority ASC, i.created_at ASC, i.id ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to select eligible items: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Atomically claim a Waiting item for a worker.
    ///
    /// Conditional on the row still being Waiting; returns false when a
    /// concurrent dispatcher won the race.
    pub async fn claim_item(&self, id: ItemId, now: i64, lease_secs: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 1, started_at = ?, lease_expires_at = ?
            WHERE id = ? AND status = 0
            "#,
        )
        .bind(now)
        .bind(now + lease_secs)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to claim item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Advance a running worker's lease; returns false if the item is no
    /// longer Running (e.g. swept or cancelled meanwhile)
    pub async fn heartbeat(&self, id: ItemId, now: i64, lease_secs: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE download_items SET lease_expires_at = ? WHERE id = ? AND status = 1")
                .bind(now + lease_secs)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to heartbeat item: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected() == 1)
    }

    /// Count all Running items
    pub async fn count_running(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM download_items WHERE status = 1")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to count running items: {}",
                        e
                    )))
                })?;

        Ok(count)
    }

    /// Running counts per provider, derived from the queue rather than
    /// cached, so concurrency accounting cannot drift
    pub async fn running_by_provider(&self) -> Result<Vec<(String, i64)>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT group_key, COUNT(*) FROM download_items WHERE status = 1 GROUP BY group_key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to count running by provider: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Transition a Running item to Completed
    pub async fn mark_completed(&self, id: ItemId) -> Result<bool> {
        let now = super::now_ts();
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 2, completed_at = ?, attempt_count = attempt_count + 1,
                lease_expires_at = NULL, error_kind = NULL, error_message = NULL
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark item completed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a Running item to terminal Failed
    pub async fn mark_failed(&self, id: ItemId, kind: ErrorKind, message: &str) -> Result<bool> {
        let now = super::now_ts();
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 3, completed_at = ?, attempt_count = attempt_count + 1,
                lease_expires_at = NULL, error_kind = ?, error_message = ?
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(now)
        .bind(kind.as_str())
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to mark item failed: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Transition a Running item back to Waiting after a retriable
    /// failure, pushing `scheduled_at` forward by the backoff delay
    pub async fn reschedule_failure(
        &self,
        id: ItemId,
        delay_secs: i64,
        kind: ErrorKind,
        message: &str,
    ) -> Result<bool> {
        let now = super::now_ts();
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 0, attempt_count = attempt_count + 1, scheduled_at = ?,
                started_at = NULL, lease_expires_at = NULL,
                error_kind = ?, error_message = ?
            WHERE id = ? AND status = 1
            "#,
        )
        .bind(now + delay_secs)
        .bind(kind.as_str())
        .bind(message)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to reschedule item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Reclaim Running items whose lease has expired.
    ///
    /// An expired lease counts as a failed attempt. Items with attempts
    /// left are demoted to Waiting; items out of attempts go terminal
    /// Failed. Returns `(demoted, exhausted)` row counts.
    pub async fn sweep_expired_leases(&self, max_retries: i64) -> Result<(u64, u64)> {
        let now = super::now_ts();

        let exhausted = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 3, completed_at = ?, attempt_count = attempt_count + 1,
                lease_expires_at = NULL, error_kind = ?, error_message = ?
            WHERE status = 1 AND lease_expires_at < ? AND attempt_count >= ?
            "#,
        )
        .bind(now)
        .bind(ErrorKind::Timeout.as_str())
        .bind("worker lease expired")
        .bind(now)
        .bind(max_retries)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to fail exhausted leases: {}",
                e
            )))
        })?
        .rows_affected();

        let demoted = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 0, attempt_count = attempt_count + 1, scheduled_at = ?,
                started_at = NULL, lease_expires_at = NULL,
                error_kind = ?, error_message = ?
            WHERE status = 1 AND lease_expires_at < ?
            "#,
        )
        .bind(now)
        .bind(ErrorKind::Timeout.as_str())
        .bind("worker lease expired")
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to demote expired leases: {}",
                e
            )))
        })?
        .rows_affected();

        Ok((demoted, exhausted))
    }

    /// Startup recovery: every Running row belongs to a worker that no
    /// longer exists, so demote all of them to Waiting. Does not count
    /// an attempt — the next run begins fresh.
    pub async fn recover_running(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 0, started_at = NULL, lease_expires_at = NULL
            WHERE status = 1
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to recover running items: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }

    /// Operator retry: move a terminal Failed item back to Waiting with
    /// backoff and attempts reset
    pub async fn retry_failed(&self, id: ItemId) -> Result<bool> {
        let now = super::now_ts();
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 0, attempt_count = 0, scheduled_at = ?,
                started_at = NULL, completed_at = NULL, lease_expires_at = NULL,
                error_kind = NULL, error_message = NULL
            WHERE id = ? AND status = 3
            "#,
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to retry item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancel a Waiting item directly (no worker to signal)
    pub async fn cancel_waiting(&self, id: ItemId) -> Result<bool> {
        let now = super::now_ts();
        let result = sqlx::query(
            r#"
            UPDATE download_items
            SET status = 3, completed_at = ?, error_kind = ?, error_message = ?
            WHERE id = ? AND status = 0
            "#,
        )
        .bind(now)
        .bind(ErrorKind::Cancelled.as_str())
        .bind("cancelled by operator")
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to cancel item: {}",
                e
            )))
        })?;

        Ok(result.rows_affected() == 1)
    }

    /// Delete an item; refused while it is Running
    pub async fn delete_item(&self, id: ItemId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM download_items WHERE id = ? AND status != 1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to delete item: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected() == 1)
    }

    /// Queue counters; `window_secs` bounds the failed count
    pub async fn queue_metrics(&self, window_secs: i64) -> Result<QueueMetrics> {
        let window_start = super::now_ts() - window_secs;

        let (running, waiting, failed_last_window): (i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(CASE WHEN status = 1 THEN 1 END),
                COUNT(CASE WHEN status = 0 THEN 1 END),
                COUNT(CASE WHEN status = 3 AND completed_at >= ? THEN 1 END)
            FROM download_items
            "#,
        )
        .bind(window_start)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to compute queue metrics: {}",
                e
            )))
        })?;

        Ok(QueueMetrics {
            running,
            waiting,
            failed_last_window,
        })
    }

    /// Per-provider failure counts and mean durations over a recent window
    pub async fn source_report(&self, window_secs: i64) -> Result<Vec<SourceReport>> {
        let window_start = super::now_ts() - window_secs;

        let rows: Vec<(String, i64, i64, Option<f64>)> = sqlx::query_as(
            r#"
            SELECT
                group_key,
                COUNT(CASE WHEN status = 2 THEN 1 END),
                COUNT(CASE WHEN status = 3 THEN 1 END),
                AVG(CASE WHEN started_at IS NOT NULL THEN completed_at - started_at END)
            FROM download_items
            WHERE completed_at >= ?
            GROUP BY group_key
            ORDER BY group_key
            "#,
        )
        .bind(window_start)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to compute source report: {}",
                e
            )))
        })?;

        Ok(rows
            .into_iter()
            .map(|(group_key, completed, failed, avg)| SourceReport {
                group_key,
                completed,
                failed,
                avg_duration_secs: avg,
            })
            .collect())
    }

    /// True when the item exists and has the given status
    pub async fn item_has_status(&self, id: ItemId, status: Status) -> Result<bool> {
        Ok(self
            .get_item(id)
            .await?
            .map(|row| row.status == status.to_i32())
            .unwrap_or(false))
    }

    /// Force a Running item's lease for lease-expiry tests
    #[cfg(test)]
    pub(crate) async fn force_lease(&self, id: ItemId, lease_expires_at: i64) -> Result<()> {
        sqlx::query("UPDATE download_items SET lease_expires_at = ? WHERE id = ?")
            .bind(lease_expires_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to force lease: {}",
                    e
                )))
            })?;
        Ok(())
    }

    /// Backdate an item's creation time for FIFO ordering tests
    #[cfg(test)]
    pub(crate) async fn force_created_at(&self, id: ItemId, created_at: i64) -> Result<()> {
        sqlx::query("UPDATE download_items SET created_at = ? WHERE id = ?")
            .bind(created_at)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to force created_at: {}",
                    e
                )))
            })?;
        Ok(())
    }
}
