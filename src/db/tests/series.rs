//! Series and binding persistence tests.

use super::test_db;
use crate::db::{NewSeries, NewSourceBinding};

#[tokio::test]
async fn series_insert_and_get_round_trip() {
    let db = test_db().await;

    let id = db
        .insert_series(&NewSeries {
            title: "Witch Hat Atelier".into(),
            folder: "Witch Hat Atelier".into(),
            category: Some("seinen".into()),
        })
        .await
        .expect("insert");

    let row = db.get_series(id).await.expect("get").expect("exists");
    assert_eq!(row.title, "Witch Hat Atelier");
    assert_eq!(row.folder, "Witch Hat Atelier");
    assert_eq!(row.category.as_deref(), Some("seinen"));
    assert_eq!(row.paused, 0);
}

#[tokio::test]
async fn missing_series_returns_none() {
    let db = test_db().await;
    assert!(db.get_series(999).await.expect("get").is_none());
}

#[tokio::test]
async fn bindings_list_in_priority_order() {
    let db = test_db().await;

    let series = db
        .insert_series(&NewSeries {
            title: "Frieren".into(),
            folder: "Frieren".into(),
            category: None,
        })
        .await
        .expect("insert series");

    // Insert backup source first; priority ordering must still win
    let backup = db
        .insert_binding(&NewSourceBinding {
            series_id: series,
            source_id: "weebcentral".into(),
            series_key: "wc-77".into(),
            scanlator: None,
            language: "en".into(),
            priority: 1,
        })
        .await
        .expect("insert binding");
    let preferred = db
        .insert_binding(&NewSourceBinding {
            series_id: series,
            source_id: "mangadex".into(),
            series_key: "md-42".into(),
            scanlator: Some("somegroup".into()),
            language: "en".into(),
            priority: 0,
        })
        .await
        .expect("insert binding");

    let bindings = db.bindings_for_series(series).await.expect("list");
    assert_eq!(bindings.len(), 2);
    assert_eq!(bindings[0].id, preferred);
    assert_eq!(bindings[0].source_id, "mangadex");
    assert_eq!(bindings[1].id, backup);
    assert!(bindings[0].is_eligible());
}

#[tokio::test]
async fn deleting_a_series_cascades_to_its_bindings() {
    let db = test_db().await;

    let series = db
        .insert_series(&NewSeries {
            title: "Frieren".into(),
            folder: "Frieren".into(),
            category: None,
        })
        .await
        .expect("insert series");
    db.insert_binding(&NewSourceBinding {
        series_id: series,
        source_id: "mangadex".into(),
        series_key: "md-42".into(),
        scanlator: None,
        language: "en".into(),
        priority: 0,
    })
    .await
    .expect("insert binding");

    assert!(db.delete_series(series).await.expect("delete"));

    let bindings = db.bindings_for_series(series).await.expect("list");
    assert!(bindings.is_empty(), "bindings are owned by the series");
}

#[tokio::test]
async fn disabled_and_uninstalled_bindings_are_not_eligible() {
    let db = test_db().await;

    let series = db
        .insert_series(&NewSeries {
            title: "Frieren".into(),
            folder: "Frieren".into(),
            category: None,
        })
        .await
        .expect("insert series");
    let binding = db
        .insert_binding(&NewSourceBinding {
            series_id: series,
            source_id: "mangadex".into(),
            series_key: "md-42".into(),
            scanlator: None,
            language: "en".into(),
            priority: 0,
        })
        .await
        .expect("insert binding");

    assert!(db.set_binding_enabled(binding, false).await.expect("disable"));
    let rows = db.bindings_for_series(series).await.expect("list");
    assert!(!rows[0].is_eligible());

    assert!(db.set_binding_enabled(binding, true).await.expect("enable"));
    assert!(
        db.set_binding_installed(binding, false)
            .await
            .expect("uninstall")
    );
    let rows = db.bindings_for_series(series).await.expect("list");
    assert!(!rows[0].is_eligible());
}

#[tokio::test]
async fn binding_chapter_list_is_updatable() {
    let db = test_db().await;

    let series = db
        .insert_series(&NewSeries {
            title: "Frieren".into(),
            folder: "Frieren".into(),
            category: None,
        })
        .await
        .expect("insert series");
    let binding = db
        .insert_binding(&NewSourceBinding {
            series_id: series,
            source_id: "mangadex".into(),
            series_key: "md-42".into(),
            scanlator: None,
            language: "en".into(),
            priority: 0,
        })
        .await
        .expect("insert binding");

    let chapters = r#"[{"index":0,"number":"1"},{"index":1,"number":"2"}]"#;
    assert!(
        db.update_binding_chapters(binding, chapters)
            .await
            .expect("update")
    );

    let rows = db.bindings_for_series(series).await.expect("list");
    assert_eq!(rows[0].chapter_list.as_deref(), Some(chapters));
}

#[tokio::test]
async fn series_pause_flag_toggles() {
    let db = test_db().await;

    let series = db
        .insert_series(&NewSeries {
            title: "Frieren".into(),
            folder: "Frieren".into(),
            category: None,
        })
        .await
        .expect("insert series");

    assert!(db.set_series_paused(series, true).await.expect("pause"));
    assert_eq!(
        db.get_series(series).await.expect("get").expect("exists").paused,
        1
    );

    assert!(db.set_series_paused(series, false).await.expect("resume"));
    assert_eq!(
        db.get_series(series).await.expect("get").expect("exists").paused,
        0
    );
}
