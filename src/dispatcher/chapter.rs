//! Chapter builder — one end-to-end chapter acquisition.
//!
//! A single invocation per queue item, single-threaded within the
//! attempt: resolve the active source (with priority failover), learn
//! the page count, fetch every page with per-page retry, package the
//! verified archive, and publish progress at each transition. Retry at
//! the queue level is the dispatcher's job, not the builder's.

use crate::archive::{self, ArchivePage, ChapterDescriptor};
use crate::bridge::{BridgeChapter, BridgeClient, BridgeError, PageBlob};
use crate::db::{DownloadItemRow, SourceBindingRow};
use crate::error::{Error, ErrorKind, Result};
use crate::library;
use crate::retry::fetch_with_retry;
use crate::types::{
    ChapterCard, DownloadArgs, ItemId, JobKind, ProgressEvent, ProgressStatus, Status,
};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use super::Kaizoku;

/// Hard stop for the sequential page loop when the count is unknown;
/// a chapter past this size indicates a misbehaving source.
const MAX_PAGES_PER_CHAPTER: u32 = 2000;

/// The builder's view of a chapter source.
///
/// The bridge client is the production implementation; tests substitute
/// a scripted fake.
#[async_trait]
pub trait ChapterSource: Send + Sync {
    /// Chapter metadata by index. The distinguished NotFound error
    /// means the chapter vanished from the source.
    async fn chapter(
        &self,
        series_key: &str,
        chapter_index: i64,
        cancel: &CancellationToken,
    ) -> Result<BridgeChapter>;

    /// One page image. The distinguished NotFound error past the last
    /// page is the end-of-chapter signal when the count is unknown.
    async fn page(
        &self,
        series_key: &str,
        chapter_index: i64,
        page_index: u32,
        cancel: &CancellationToken,
    ) -> Result<PageBlob>;
}

#[async_trait]
impl ChapterSource for BridgeClient {
    async fn chapter(
        &self,
        series_key: &str,
        chapter_index: i64,
        cancel: &CancellationToken,
    ) -> Result<BridgeChapter> {
        let chapters = self.list_chapters(series_key, false, cancel).await?;
        chapters
            .into_iter()
            .find(|c| c.index == chapter_index)
            .ok_or_else(|| {
                Error::Bridge(BridgeError::NotFound {
                    method: "GET",
                    path: format!("chapter {chapter_index} of {series_key}"),
                })
            })
    }

    async fn page(
        &self,
        series_key: &str,
        chapter_index: i64,
        page_index: u32,
        cancel: &CancellationToken,
    ) -> Result<PageBlob> {
        self.fetch_page(series_key, chapter_index, page_index, cancel)
            .await
    }
}

/// What one attempt produced, handed back to the dispatcher
#[derive(Debug)]
pub(crate) struct ChapterOutcome {
    /// Completed or Failed
    pub status: Status,
    /// Classified kind and human message for failed attempts
    pub error: Option<(ErrorKind, String)>,
}

/// Run one chapter acquisition attempt for a claimed item.
///
/// Publishes Started/InProgress/Completed/Failed progress events and
/// returns the outcome; all failure classification happens here.
pub(crate) async fn run_chapter_task(
    kaizoku: &Kaizoku,
    item: &DownloadItemRow,
    cancel: &CancellationToken,
) -> ChapterOutcome {
    let id = ItemId(item.id);
    let job_id = ProgressEvent::download_job_id(id);

    match build_chapter(kaizoku, item, cancel, &job_id).await {
        Ok(path) => {
            tracing::info!(item_id = item.id, path = %path.display(), "chapter archived");
            ChapterOutcome {
                status: Status::Completed,
                error: None,
            }
        }
        Err(e) => {
            let kind = e.kind();
            let message = e.to_string();
            tracing::warn!(item_id = item.id, error_kind = %kind, error = %message, "chapter attempt failed");

            kaizoku.hub.publish(ProgressEvent {
                job_id,
                kind: JobKind::Download,
                status: ProgressStatus::Failed,
                percent: 0.0,
                message: "chapter download failed".to_string(),
                error: Some(message.clone()),
                chapter: None,
            });

            ChapterOutcome {
                status: Status::Failed,
                error: Some((kind, message)),
            }
        }
    }
}

async fn build_chapter(
    kaizoku: &Kaizoku,
    item: &DownloadItemRow,
    cancel: &CancellationToken,
    job_id: &str,
) -> Result<PathBuf> {
    let args = item.parse_args()?;

    let series = kaizoku
        .db
        .get_series(args.series_id)
        .await?
        .ok_or(Error::SeriesNotFound(args.series_id))?;

    let binding = select_active_source(kaizoku, &args).await?;
    if binding.source_id != args.source_id {
        tracing::info!(
            item_id = item.id,
            pinned = %args.source_id,
            active = %binding.source_id,
            "failing over to higher-ranked source"
        );
    }

    // The chosen binding decides where pages come from; the args keep
    // the chapter identity.
    let effective = DownloadArgs {
        source_id: binding.source_id.clone(),
        series_key: binding.series_key.clone(),
        language: binding.language.clone(),
        scanlator: binding.scanlator.clone().or(args.scanlator.clone()),
        ..args.clone()
    };

    let mut card = ChapterCard {
        provider: effective.source_id.clone(),
        language: effective.language.clone(),
        chapter_title: effective.chapter_title.clone().unwrap_or_default(),
        thumbnail_url: None,
    };

    publish(kaizoku, job_id, ProgressStatus::Started, 0.0, "resolving chapter", &card);

    // Page count: trust the enqueue-time value, otherwise ask the
    // source; a source that knows neither falls back to sequential
    // fetch until NotFound.
    let mut chapter_title = effective.chapter_title.clone();
    let mut expected_pages = effective.expected_pages;
    if expected_pages.is_none() {
        let meta = kaizoku
            .source
            .chapter(&effective.series_key, effective.chapter_index, cancel)
            .await?;
        expected_pages = meta.page_count;
        if chapter_title.is_none() {
            chapter_title = meta.title;
        }
        card.chapter_title = chapter_title.clone().unwrap_or_default();
    }

    let pages = fetch_pages(kaizoku, &effective, expected_pages, cancel, job_id, &card).await?;

    let final_args = DownloadArgs {
        chapter_title: chapter_title.clone(),
        ..effective.clone()
    };
    let final_path = library::chapter_path(
        &kaizoku.config.storage.storage_root,
        series
            .category
            .as_deref()
            .or(kaizoku.config.storage.default_category.as_deref()),
        &series.folder,
        &final_args,
    );

    let descriptor = ChapterDescriptor {
        series_title: series.title.clone(),
        source: effective.source_id.clone(),
        scanlator: effective.scanlator.clone(),
        language: effective.language.clone(),
        chapter_number: effective.chapter_number.clone(),
        chapter_title,
        page_count: pages.len() as u32,
        fingerprint: archive::fingerprint_pages(&pages),
    };

    publish(kaizoku, job_id, ProgressStatus::InProgress, 100.0, "packaging archive", &card);

    let package_path = final_path.clone();
    tokio::task::spawn_blocking(move || {
        archive::cleanup_stale_tmp(&package_path)?;
        archive::package(&package_path, &pages, &descriptor)
    })
    .await
    .map_err(|e| Error::Other(format!("packaging task panicked: {e}")))??;

    let verify_path = final_path.clone();
    let check = tokio::task::spawn_blocking(move || archive::verify(&verify_path))
        .await
        .map_err(|e| Error::Other(format!("verification task panicked: {e}")))?;

    if check != archive::ArchiveCheck::Fine {
        let _ = tokio::fs::remove_file(&final_path).await;
        return Err(Error::Archive(crate::error::ArchiveError::VerificationFailed {
            path: final_path,
            reason: format!("post-package check returned {:?}", check),
        }));
    }

    refresh_series_manifest(kaizoku, &series).await;

    publish(kaizoku, job_id, ProgressStatus::Completed, 100.0, "chapter archived", &card);

    Ok(final_path)
}

/// Choose the active source for a build: the highest-priority binding
/// that is enabled, installed, and whose provider is not paused. The
/// item's pinned source wins while it still qualifies; otherwise the
/// build fails over to the next-ranked binding.
async fn select_active_source(
    kaizoku: &Kaizoku,
    args: &DownloadArgs,
) -> Result<SourceBindingRow> {
    let bindings = kaizoku.db.bindings_for_series(args.series_id).await?;

    let paused: std::collections::HashSet<String> = kaizoku
        .state
        .paused_providers
        .read()
        .map(|p| p.clone())
        .unwrap_or_default();

    let mut candidates: Vec<SourceBindingRow> = bindings
        .into_iter()
        .filter(|b| b.is_eligible() && !paused.contains(&b.source_id))
        .collect();
    if candidates.is_empty() {
        return Err(Error::NoEligibleSource {
            series_id: args.series_id,
        });
    }

    if let Some(pos) = candidates.iter().position(|b| b.source_id == args.source_id) {
        return Ok(candidates.swap_remove(pos));
    }

    Ok(candidates.remove(0))
}

/// Fetch every page of the chapter.
///
/// With a known count, any NotFound is a hard failure. With an unknown
/// count, NotFound after at least one page is end-of-chapter; NotFound
/// before any page means the chapter is empty or gone.
async fn fetch_pages(
    kaizoku: &Kaizoku,
    args: &DownloadArgs,
    expected_pages: Option<u32>,
    cancel: &CancellationToken,
    job_id: &str,
    card: &ChapterCard,
) -> Result<Vec<ArchivePage>> {
    let mut pages: Vec<ArchivePage> = Vec::new();

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let page_index = pages.len() as u32;
        match expected_pages {
            Some(total) if page_index >= total => break,
            None if page_index >= MAX_PAGES_PER_CHAPTER => {
                tracing::warn!(
                    series_key = %args.series_key,
                    chapter_index = args.chapter_index,
                    "page loop hit the chapter size limit, truncating"
                );
                break;
            }
            _ => {}
        }

        let result = fetch_with_retry(&kaizoku.config.page_retry, || {
            kaizoku
                .source
                .page(&args.series_key, args.chapter_index, page_index, cancel)
        })
        .await;

        match result {
            Ok(blob) => {
                pages.push(ArchivePage::new(blob.bytes, &blob.content_type));

                let percent = match expected_pages {
                    Some(total) if total > 0 => {
                        (pages.len() as f32 / total as f32 * 100.0).min(100.0)
                    }
                    _ => pages.len() as f32 / (pages.len() + 1) as f32 * 100.0,
                };
                publish(
                    kaizoku,
                    job_id,
                    ProgressStatus::InProgress,
                    percent,
                    &format!("page {}", pages.len()),
                    card,
                );
            }
            Err(e) if e.is_bridge_not_found() => match expected_pages {
                Some(total) => {
                    return Err(Error::Bridge(BridgeError::NotFound {
                        method: "GET",
                        path: format!(
                            "page {page_index} of {total} in chapter {} of {}",
                            args.chapter_index, args.series_key
                        ),
                    }));
                }
                None if pages.is_empty() => {
                    return Err(Error::Bridge(BridgeError::NotFound {
                        method: "GET",
                        path: format!(
                            "chapter {} of {} has no pages",
                            args.chapter_index, args.series_key
                        ),
                    }));
                }
                None => break, // end of chapter
            },
            Err(e) => return Err(e),
        }
    }

    Ok(pages)
}

/// Rewrite the per-series metadata file after a successful chapter.
/// Best-effort; a manifest failure never fails the download.
async fn refresh_series_manifest(kaizoku: &Kaizoku, series: &crate::db::SeriesRow) {
    let dir = library::series_dir(
        &kaizoku.config.storage.storage_root,
        series
            .category
            .as_deref()
            .or(kaizoku.config.storage.default_category.as_deref()),
        &series.folder,
    );

    let bindings = match kaizoku.db.bindings_for_series(series.id).await {
        Ok(b) => b,
        Err(e) => {
            tracing::warn!(series_id = series.id, error = %e, "skipping manifest refresh");
            return;
        }
    };

    let chapter_count = library::count_chapters(&dir).await;
    let manifest = library::SeriesManifest::from_rows(series, &bindings, chapter_count);
    if let Err(e) = library::write_manifest(&dir, &manifest).await {
        tracing::warn!(series_id = series.id, error = %e, "failed to write series manifest");
    }
}

fn publish(
    kaizoku: &Kaizoku,
    job_id: &str,
    status: ProgressStatus,
    percent: f32,
    message: &str,
    card: &ChapterCard,
) {
    kaizoku.hub.publish(ProgressEvent {
        job_id: job_id.to_string(),
        kind: JobKind::Download,
        status,
        percent,
        message: message.to_string(),
        error: None,
        chapter: Some(card.clone()),
    });
}
