//! Database layer for kaizoku-dl
//!
//! Handles SQLite persistence for the download queue, series, and
//! source bindings. The queue rows are the canonical shared state: all
//! status transitions go through conditional updates here, and ordering
//! is taken from row ordering, never from an in-memory structure.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] — Database lifecycle, schema migrations
//! - [`items`] — Download queue CRUD, claim/lease protocol, sweeping
//! - [`series`] — Series and source binding CRUD

use crate::error::Result;
use crate::types::{DownloadArgs, ItemId, QueueItem, Status};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, sqlite::SqlitePool};

mod items;
mod migrations;
mod series;

/// Database handle wrapping the sqlite pool
#[derive(Debug, Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

/// New queue item to be inserted
#[derive(Debug, Clone)]
pub struct NewDownloadItem {
    /// Provider identifier for per-provider concurrency accounting
    pub group_key: String,
    /// Priority; lower dispatches first (chapter number by convention)
    pub priority: i64,
    /// Structured job payload
    pub args: DownloadArgs,
}

/// Queue item record from the database
#[derive(Debug, Clone, FromRow)]
pub struct DownloadItemRow {
    /// Unique database ID
    pub id: i64,
    /// Provider identifier
    pub group_key: String,
    /// Series the chapter belongs to (denormalized from args for indexing)
    pub series_id: i64,
    /// Source the item was enqueued against
    pub source_id: String,
    /// Chapter index within the source's chapter list
    pub chapter_index: i64,
    /// Status code (0=waiting, 1=running, 2=completed, 3=failed)
    pub status: i32,
    /// Priority; lower dispatches first
    pub priority: i64,
    /// Unix timestamp before which the item must not be dispatched
    pub scheduled_at: i64,
    /// Unix timestamp of insertion; FIFO tie-breaker
    pub created_at: i64,
    /// Unix timestamp the current or last attempt started
    pub started_at: Option<i64>,
    /// Unix timestamp the item reached a terminal status
    pub completed_at: Option<i64>,
    /// Number of completed attempts
    pub attempt_count: i64,
    /// Unix timestamp at which a Running claim is considered abandoned
    pub lease_expires_at: Option<i64>,
    /// Classified kind of the last error
    pub error_kind: Option<String>,
    /// Human message of the last error
    pub error_message: Option<String>,
    /// JSON-encoded [`DownloadArgs`]
    pub args: String,
}

impl DownloadItemRow {
    /// Decode the structured payload
    pub fn parse_args(&self) -> Result<DownloadArgs> {
        Ok(serde_json::from_str(&self.args)?)
    }

    /// Convert to the API-facing representation
    pub fn to_queue_item(&self) -> Result<QueueItem> {
        Ok(QueueItem {
            id: ItemId(self.id),
            group_key: self.group_key.clone(),
            status: Status::from_i32(self.status),
            priority: self.priority,
            scheduled_at: timestamp_to_datetime(self.scheduled_at),
            created_at: timestamp_to_datetime(self.created_at),
            started_at: self.started_at.map(timestamp_to_datetime),
            completed_at: self.completed_at.map(timestamp_to_datetime),
            attempt_count: self.attempt_count,
            error_kind: self.error_kind.clone(),
            error_message: self.error_message.clone(),
            args: self.parse_args()?,
        })
    }
}

/// New series to be inserted
#[derive(Debug, Clone)]
pub struct NewSeries {
    /// Display title
    pub title: String,
    /// Folder name under the storage root (sanitized by the caller)
    pub folder: String,
    /// Optional category folder between root and series folder
    pub category: Option<String>,
}

/// Series record from the database
#[derive(Debug, Clone, FromRow)]
pub struct SeriesRow {
    /// Unique database ID
    pub id: i64,
    /// Display title
    pub title: String,
    /// Folder name under the storage root
    pub folder: String,
    /// Optional category folder
    pub category: Option<String>,
    /// Advisory pause flag; paused series are skipped at dispatch
    pub paused: i32,
    /// Unix timestamp of creation
    pub created_at: i64,
}

/// New source binding to be inserted
#[derive(Debug, Clone)]
pub struct NewSourceBinding {
    /// Owning series
    pub series_id: i64,
    /// Provider identifier
    pub source_id: String,
    /// Source-side key identifying the series at the provider
    pub series_key: String,
    /// Scanlator group restriction, if any
    pub scanlator: Option<String>,
    /// Chapter language
    pub language: String,
    /// Binding priority; lower is preferred
    pub priority: i64,
}

/// Source binding record from the database
///
/// A series owns its bindings; deleting the series cascades. The
/// binding carries the series id as a plain back-reference.
#[derive(Debug, Clone, FromRow)]
pub struct SourceBindingRow {
    /// Unique database ID
    pub id: i64,
    /// Owning series
    pub series_id: i64,
    /// Provider identifier
    pub source_id: String,
    /// Source-side series key
    pub series_key: String,
    /// Scanlator group restriction
    pub scanlator: Option<String>,
    /// Chapter language
    pub language: String,
    /// Binding priority; lower is preferred
    pub priority: i64,
    /// Whether the binding participates in source selection
    pub enabled: i32,
    /// Whether the provider extension is currently installed
    pub installed: i32,
    /// JSON-encoded last-known chapter list, if refreshed
    pub chapter_list: Option<String>,
    /// Unix timestamp of creation
    pub created_at: i64,
}

impl SourceBindingRow {
    /// Whether this binding may serve a chapter build
    pub fn is_eligible(&self) -> bool {
        self.enabled != 0 && self.installed != 0
    }
}

fn timestamp_to_datetime(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

/// Current Unix timestamp in seconds
pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
