//! Shared fixtures for dispatcher tests: a scripted chapter source and
//! a fully wired orchestrator on a temp directory.

use crate::bridge::{BridgeChapter, BridgeClient, BridgeError, PageBlob};
use crate::config::{Config, RetryConfig};
use crate::db::{DownloadItemRow, NewSeries, NewSourceBinding};
use crate::error::{Error, Result};
use crate::types::{ItemId, Status};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::chapter::ChapterSource;
use super::queue::EnqueueRequest;
use super::Kaizoku;

/// Scripted chapter source.
///
/// Behavior is fixed per instance; tests construct the shape they need
/// and observe call order and concurrency through the counters.
pub(crate) struct FakeSource {
    /// Page count reported by chapter metadata (None = source doesn't know)
    pub meta_page_count: Option<u32>,
    /// Pages that actually exist; requests past this index get NotFound.
    /// None serves pages forever.
    pub pages_available: Option<u32>,
    /// Answer every page request with HTTP 500
    pub fail_pages: bool,
    /// Artificial latency per page fetch
    pub page_delay: Duration,
    /// (series_key, chapter_index) in chapter-metadata call order
    pub started: std::sync::Mutex<Vec<(String, i64)>>,
    /// Page fetches currently in flight
    pub concurrent: AtomicI64,
    /// Highest number of simultaneous page fetches observed
    pub max_concurrent: AtomicI64,
}

impl Default for FakeSource {
    fn default() -> Self {
        Self {
            meta_page_count: Some(2),
            pages_available: Some(2),
            fail_pages: false,
            page_delay: Duration::ZERO,
            started: std::sync::Mutex::new(Vec::new()),
            concurrent: AtomicI64::new(0),
            max_concurrent: AtomicI64::new(0),
        }
    }
}

impl FakeSource {
    pub(crate) fn start_order(&self) -> Vec<(String, i64)> {
        self.started.lock().expect("started lock").clone()
    }
}

#[async_trait]
impl ChapterSource for FakeSource {
    async fn chapter(
        &self,
        series_key: &str,
        chapter_index: i64,
        _cancel: &CancellationToken,
    ) -> Result<BridgeChapter> {
        self.started
            .lock()
            .expect("started lock")
            .push((series_key.to_string(), chapter_index));

        Ok(BridgeChapter {
            index: chapter_index,
            number: chapter_index.to_string(),
            title: Some(format!("Chapter {chapter_index}")),
            page_count: self.meta_page_count,
            scanlator: None,
            language: Some("en".to_string()),
            upload_date: None,
        })
    }

    async fn page(
        &self,
        series_key: &str,
        chapter_index: i64,
        page_index: u32,
        cancel: &CancellationToken,
    ) -> Result<PageBlob> {
        let current = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(current, Ordering::SeqCst);

        let finish = || self.concurrent.fetch_sub(1, Ordering::SeqCst);

        if !self.page_delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    finish();
                    return Err(Error::Cancelled);
                }
                _ = tokio::time::sleep(self.page_delay) => {}
            }
        }
        finish();

        if self.fail_pages {
            return Err(BridgeError::Status {
                method: "GET",
                path: format!("/page/{page_index}"),
                status: 500,
                snippet: "boom".to_string(),
            }
            .into());
        }

        if let Some(available) = self.pages_available
            && page_index >= available
        {
            return Err(BridgeError::NotFound {
                method: "GET",
                path: format!("/manga/{series_key}/chapter/{chapter_index}/page/{page_index}"),
            }
            .into());
        }

        Ok(PageBlob {
            bytes: format!("{series_key}-{chapter_index}-{page_index}").into_bytes(),
            content_type: "image/jpeg".to_string(),
        })
    }
}

/// A wired orchestrator over a temp directory and a scripted source
pub(crate) struct TestHarness {
    pub kaizoku: Kaizoku,
    pub source: Arc<FakeSource>,
    pub dir: tempfile::TempDir,
}

/// Build a harness; `tweak` adjusts the config before wiring
pub(crate) async fn harness(
    source: FakeSource,
    tweak: impl FnOnce(&mut Config),
) -> TestHarness {
    let dir = tempfile::tempdir().expect("tempdir");

    let mut config = Config::default();
    config.storage.storage_root = dir.path().join("library");
    config.storage.database_path = dir.path().join("kaizoku.db");
    config.queue.dispatch_tick = Duration::from_millis(50);
    config.queue.chapter_fail_retry_time = "0:00:00".to_string();
    config.page_retry = RetryConfig {
        max_attempts: 0,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    tweak(&mut config);

    let source = Arc::new(source);
    let bridge = Arc::new(BridgeClient::new(&config.bridge).expect("bridge client"));
    let kaizoku = Kaizoku::build(config, bridge, source.clone())
        .await
        .expect("orchestrator builds");

    TestHarness {
        kaizoku,
        source,
        dir,
    }
}

impl TestHarness {
    /// Insert a series with one binding per (source_id, series_key,
    /// priority) entry; returns the series id and binding ids in order
    pub(crate) async fn seed_series(
        &self,
        title: &str,
        sources: &[(&str, &str, i64)],
    ) -> (i64, Vec<i64>) {
        let series_id = self
            .kaizoku
            .db
            .insert_series(&NewSeries {
                title: title.to_string(),
                folder: title.to_string(),
                category: None,
            })
            .await
            .expect("insert series");

        let mut binding_ids = Vec::new();
        for (source_id, series_key, priority) in sources {
            let id = self
                .kaizoku
                .db
                .insert_binding(&NewSourceBinding {
                    series_id,
                    source_id: source_id.to_string(),
                    series_key: series_key.to_string(),
                    scanlator: None,
                    language: "en".to_string(),
                    priority: *priority,
                })
                .await
                .expect("insert binding");
            binding_ids.push(id);
        }

        (series_id, binding_ids)
    }

    /// Enqueue one chapter against a binding
    pub(crate) async fn enqueue_chapter(
        &self,
        series_id: i64,
        binding_id: i64,
        chapter_index: i64,
        priority: i64,
    ) -> ItemId {
        self.kaizoku
            .enqueue(EnqueueRequest {
                series_id,
                source_binding_id: binding_id,
                chapter_index,
                priority,
                chapter_number: chapter_index.to_string(),
                chapter_title: None,
                expected_pages: None,
            })
            .await
            .expect("enqueue")
    }

    /// Poll until the item reaches the status, panicking on timeout
    pub(crate) async fn wait_status(
        &self,
        id: ItemId,
        status: Status,
        timeout: Duration,
    ) -> DownloadItemRow {
        let deadline = std::time::Instant::now() + timeout;

        loop {
            let row = self.kaizoku.db.get_item(id).await.expect("get item");
            if let Some(row) = row
                && row.status == status.to_i32()
            {
                return row;
            }

            assert!(
                std::time::Instant::now() < deadline,
                "item {id} did not reach {status:?} within {timeout:?}"
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// The directory a seeded series' archives land in
    pub(crate) fn series_dir(&self, title: &str) -> std::path::PathBuf {
        self.dir.path().join("library").join(title)
    }
}
