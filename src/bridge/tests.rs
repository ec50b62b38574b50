//! Bridge client tests against a mocked extension host.

use super::*;
use crate::config::BridgeConfig;
use crate::error::ErrorKind;
use std::time::Duration;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> BridgeClient {
    BridgeClient::new(&BridgeConfig {
        base_url: server.uri(),
        request_timeout: Duration::from_secs(5),
        rate_limit_attempts: 3,
    })
    .expect("client builds")
}

fn chapters_json() -> serde_json::Value {
    serde_json::json!([
        {"index": 0, "number": "1", "title": "Beginnings", "page_count": 20},
        {"index": 1, "number": "2", "page_count": null}
    ])
}

#[tokio::test]
async fn list_chapters_decodes_the_host_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .and(query_param("online_fetch", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chapters_json()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let chapters = client
        .list_chapters("md-42", true, &token)
        .await
        .expect("chapters decode");

    assert_eq!(chapters.len(), 2);
    assert_eq!(chapters[0].number, "1");
    assert_eq!(chapters[0].title.as_deref(), Some("Beginnings"));
    assert_eq!(chapters[0].page_count, Some(20));
    assert_eq!(chapters[1].page_count, None);
}

#[tokio::test]
async fn throttled_requests_retry_then_succeed() {
    let server = MockServer::start().await;

    // First hit is throttled, the retry succeeds
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .respond_with(ResponseTemplate::new(429))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chapters_json()))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let chapters = client
        .list_chapters("md-42", false, &token)
        .await
        .expect("retry succeeds");

    assert_eq!(chapters.len(), 2);
}

#[tokio::test]
async fn persistent_throttling_surfaces_as_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let err = client
        .list_chapters("md-42", false, &token)
        .await
        .expect_err("must exhaust");

    assert_eq!(err.kind(), ErrorKind::RateLimit);
}

#[tokio::test]
async fn page_404_is_the_distinguished_not_found_signal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/api/v1/manga/md-42/chapter/0/page/\d+$"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let err = client
        .fetch_page("md-42", 0, 7, &token)
        .await
        .expect_err("404 must error");

    assert!(err.is_bridge_not_found());
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn fetch_page_returns_bytes_and_content_type() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapter/0/page/0"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, 0x50, 0x4e, 0x47]),
        )
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let page = client
        .fetch_page("md-42", 0, 0, &token)
        .await
        .expect("page bytes");

    assert_eq!(page.content_type, "image/png");
    assert_eq!(page.bytes, vec![0x89, 0x50, 0x4e, 0x47]);
}

#[tokio::test]
async fn server_errors_carry_method_path_status_and_snippet() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .respond_with(ResponseTemplate::new(500).set_body_string("extension crashed: NPE at ..."))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let err = client
        .list_chapters("md-42", false, &token)
        .await
        .expect_err("500 must error");

    assert_eq!(err.kind(), ErrorKind::ServerError);
    let message = err.to_string();
    assert!(message.contains("GET"), "message: {message}");
    assert!(message.contains("/api/v1/manga/md-42/chapters"), "message: {message}");
    assert!(message.contains("500"), "message: {message}");
    assert!(message.contains("extension crashed"), "message: {message}");
}

#[tokio::test]
async fn malformed_payload_surfaces_as_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let err = client
        .list_chapters("md-42", false, &token)
        .await
        .expect_err("decode must fail");

    assert_eq!(err.kind(), ErrorKind::Parse);
}

#[tokio::test]
async fn cancelled_token_aborts_the_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/manga/md-42/chapters"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();

    let call = client.list_chapters("md-42", false, &token);
    token.cancel();
    let err = call.await.expect_err("cancel must surface");

    assert_eq!(err.kind(), ErrorKind::Cancelled);
}

#[tokio::test]
async fn search_decodes_pagination() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/source/mangadex/search"))
        .and(query_param("term", "witch hat"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "items": [{"key": "md-42", "title": "Witch Hat Atelier"}],
            "has_next_page": true
        })))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let page = client
        .search("mangadex", "witch hat", 1, &token)
        .await
        .expect("search decodes");

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].key, "md-42");
    assert!(page.has_next_page);
}

#[tokio::test]
async fn preferences_decode_as_closed_variants() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/source/mangadex/preferences"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"type": "combo_box", "key": "quality", "title": "Image quality",
             "entries": ["data", "data-saver"], "current": "data"},
            {"type": "switch", "key": "nsfw", "title": "Show NSFW", "enabled": false},
            {"type": "text_box", "key": "blocked_groups", "title": "Blocked groups"},
            {"type": "combo_check_box", "key": "langs", "title": "Languages",
             "entries": ["en", "fr"], "selected": ["en"]}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();
    let prefs = client
        .get_preferences("mangadex", &token)
        .await
        .expect("preferences decode");

    assert_eq!(prefs.len(), 4);
    assert!(matches!(&prefs[0], SourcePreference::ComboBox { key, .. } if key == "quality"));
    assert!(matches!(
        &prefs[1],
        SourcePreference::Switch { enabled: false, .. }
    ));
    assert!(matches!(&prefs[2], SourcePreference::TextBox { current: None, .. }));
    assert!(matches!(
        &prefs[3],
        SourcePreference::ComboCheckBox { selected, .. } if selected == &vec!["en".to_string()]
    ));
}

#[tokio::test]
async fn extension_lifecycle_round_trips() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/extension/list"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"pkg_name": "eu.kanade.mangadex", "name": "MangaDex", "version": "1.4.200",
             "lang": "all", "installed": true, "has_update": false}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/extension/install"))
        .respond_with(ResponseTemplate::new(201))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/v1/extension/uninstall/eu.kanade.mangadex"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let token = tokio_util::sync::CancellationToken::new();

    let extensions = client.list_extensions(&token).await.expect("list");
    assert_eq!(extensions.len(), 1);
    assert!(extensions[0].installed);

    client
        .install_extension(vec![1, 2, 3], "mangadex.apk", &token)
        .await
        .expect("install");
    client
        .uninstall_extension("eu.kanade.mangadex", &token)
        .await
        .expect("uninstall");
}

#[test]
fn invalid_base_url_is_a_config_error() {
    let err = BridgeClient::new(&BridgeConfig {
        base_url: "not a url".into(),
        request_timeout: Duration::from_secs(5),
        rate_limit_attempts: 3,
    })
    .expect_err("must reject");

    assert!(matches!(err, Error::Config { .. }));
}
