//! Database layer tests.

use crate::db::{Database, NewDownloadItem, NewSeries, NewSourceBinding};
use crate::types::DownloadArgs;

mod series;

/// Fresh in-memory database for each test
pub(crate) async fn test_db() -> Database {
    Database::new_in_memory().await.expect("in-memory db")
}

/// Download args for a chapter of a test series
pub(crate) fn test_args(series_id: i64, source_id: &str, chapter_index: i64) -> DownloadArgs {
    DownloadArgs {
        series_id,
        source_id: source_id.to_string(),
        series_key: format!("key-{series_id}"),
        chapter_index,
        chapter_number: chapter_index.to_string(),
        chapter_title: None,
        language: "en".to_string(),
        scanlator: None,
        expected_pages: None,
    }
}

/// Queue item for a chapter of a test series
pub(crate) fn test_item(series_id: i64, source_id: &str, chapter_index: i64) -> NewDownloadItem {
    NewDownloadItem {
        group_key: source_id.to_string(),
        priority: chapter_index,
        args: test_args(series_id, source_id, chapter_index),
    }
}

/// Insert a series with one enabled binding, returning the series id
pub(crate) async fn seed_series(db: &Database, title: &str, source_id: &str) -> i64 {
    let series_id = db
        .insert_series(&NewSeries {
            title: title.to_string(),
            folder: title.to_string(),
            category: None,
        })
        .await
        .expect("insert series");

    db.insert_binding(&NewSourceBinding {
        series_id,
        source_id: source_id.to_string(),
        series_key: format!("key-{series_id}"),
        scanlator: None,
        language: "en".to_string(),
        priority: 0,
    })
    .await
    .expect("insert binding");

    series_id
}
