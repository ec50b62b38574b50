//! Core types for kaizoku-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Unique identifier for a queue item
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<ItemId> for i64 {
    fn from(id: ItemId) -> Self {
        id.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ItemId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Queue item status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Waiting for dispatch
    Waiting,
    /// Claimed by a worker and actively downloading
    Running,
    /// Successfully completed
    Completed,
    /// Failed terminally
    Failed,
}

impl Status {
    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Waiting,
            1 => Status::Running,
            2 => Status::Completed,
            3 => Status::Failed,
            _ => Status::Failed, // Corrupted rows surface visibly as Failed
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Waiting => 0,
            Status::Running => 1,
            Status::Completed => 2,
            Status::Failed => 3,
        }
    }

    /// Whether this status is terminal (no further transitions)
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Completed | Status::Failed)
    }
}

/// Kind of job a progress event refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Chapter download job
    Download,
    /// Library-wide chapter list refresh
    UpdateAll,
    /// Series import job
    Import,
}

/// Lifecycle stage of a progress event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    /// Job has begun
    Started,
    /// Job is running; `percent` is meaningful
    InProgress,
    /// Job finished successfully
    Completed,
    /// Job finished with an error
    Failed,
}

/// Render hint attached to download progress events so clients can draw
/// a chapter card without a follow-up query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ChapterCard {
    /// Provider the chapter is being fetched from
    pub provider: String,

    /// Chapter language code
    pub language: String,

    /// Chapter title (may be empty for unnamed chapters)
    pub chapter_title: String,

    /// Thumbnail URL, if the source exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

/// Event published to the progress hub and fanned out to clients
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProgressEvent {
    /// Job identifier, e.g. `download:42`
    pub job_id: String,

    /// Job kind
    pub kind: JobKind,

    /// Lifecycle stage
    pub status: ProgressStatus,

    /// Progress percentage in [0, 100]
    pub percent: f32,

    /// Human-readable progress message
    pub message: String,

    /// Error text for failed jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Job-specific render payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<ChapterCard>,
}

impl ProgressEvent {
    /// Job id for a download item
    pub fn download_job_id(id: ItemId) -> String {
        format!("download:{}", id)
    }
}

/// Structured payload of a queue item — everything a worker needs to
/// acquire one chapter.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct DownloadArgs {
    /// Logical series the chapter belongs to
    pub series_id: i64,

    /// Provider the item was enqueued against (failover may override)
    pub source_id: String,

    /// Source-side key identifying the series at the provider
    pub series_key: String,

    /// Chapter index within the source's chapter list
    pub chapter_index: i64,

    /// Display chapter number ("10", "10.5", ...)
    pub chapter_number: String,

    /// Chapter title, if known at enqueue time
    #[serde(default)]
    pub chapter_title: Option<String>,

    /// Chapter language code
    pub language: String,

    /// Scanlator group, if part of the binding identity
    #[serde(default)]
    pub scanlator: Option<String>,

    /// Expected page count, if the chapter list already knew it
    #[serde(default)]
    pub expected_pages: Option<u32>,
}

/// Queue item as exposed through the library and REST API
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueItem {
    /// Unique item identifier
    pub id: ItemId,

    /// Provider identifier used for per-provider concurrency accounting
    pub group_key: String,

    /// Current status
    pub status: Status,

    /// Priority; lower values dispatch first
    pub priority: i64,

    /// Earliest time the item may be dispatched
    pub scheduled_at: DateTime<Utc>,

    /// Insertion time; FIFO tie-breaker within equal priority
    pub created_at: DateTime<Utc>,

    /// When the current or last attempt started
    pub started_at: Option<DateTime<Utc>>,

    /// When the item reached a terminal status
    pub completed_at: Option<DateTime<Utc>>,

    /// Number of completed attempts
    pub attempt_count: i64,

    /// Classified kind of the last error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// Human message of the last error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    /// Structured job payload
    pub args: DownloadArgs,
}

/// Filter for queue listing
#[derive(Clone, Debug, Default, Deserialize, Serialize, ToSchema)]
pub struct ListFilter {
    /// Restrict to one status
    pub status: Option<Status>,

    /// Restrict to one series
    pub series_id: Option<i64>,

    /// Substring match against the item payload and error message
    pub keyword: Option<String>,
}

/// Queue counters for operational dashboards
#[derive(Clone, Copy, Debug, Serialize, Deserialize, ToSchema)]
pub struct QueueMetrics {
    /// Items currently Running
    pub running: i64,

    /// Items currently Waiting
    pub waiting: i64,

    /// Items that failed terminally within the reporting window
    pub failed_last_window: i64,
}

/// Per-provider failure aggregate over a recent window
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SourceReport {
    /// Provider identifier
    pub group_key: String,

    /// Completed downloads in the window
    pub completed: i64,

    /// Terminal failures in the window
    pub failed: i64,

    /// Mean wall-clock duration of finished attempts, in seconds
    pub avg_duration_secs: Option<f64>,
}

/// Operator action on a failed item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum FailedAction {
    /// Reset backoff and move the item back to Waiting
    Retry,
    /// Remove the item from the queue
    Delete,
}
