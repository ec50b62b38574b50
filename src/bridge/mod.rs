//! HTTP client for the out-of-process extension host.
//!
//! The host fronts the actual source extensions and exposes manga
//! metadata, chapter lists, page images, source preferences, and the
//! extension lifecycle. This client owns the transport concerns: JSON
//! request/response, raw byte retrieval, multipart upload, throttling
//! retries, and cancellation.
//!
//! Error contract:
//! - HTTP 404 surfaces as the distinguished [`BridgeError::NotFound`],
//!   which the chapter builder uses for end-of-chapter detection.
//! - HTTP 429 is retried here with 2^n-second backoff up to a fixed
//!   attempt budget, then surfaces as [`BridgeError::RateLimited`].
//! - Any other non-2xx becomes [`BridgeError::Status`] with method,
//!   path, status, and a body snippet.

use crate::config::BridgeConfig;
pub use crate::error::BridgeError;
use crate::error::{Error, Result};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;
use utoipa::ToSchema;

/// Maximum body bytes kept in a [`BridgeError::Status`] snippet
const BODY_SNIPPET_LEN: usize = 200;

/// Chapter entry as reported by the extension host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BridgeChapter {
    /// Position within the source's chapter list
    pub index: i64,

    /// Display chapter number ("10", "10.5", ...)
    pub number: String,

    /// Chapter title, when the source provides one
    #[serde(default)]
    pub title: Option<String>,

    /// Page count, when the source already knows it
    #[serde(default)]
    pub page_count: Option<u32>,

    /// Scanlator group attribution
    #[serde(default)]
    pub scanlator: Option<String>,

    /// Chapter language code
    #[serde(default)]
    pub language: Option<String>,

    /// Upload time as a Unix timestamp
    #[serde(default)]
    pub upload_date: Option<i64>,
}

/// Series metadata as reported by the extension host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SeriesMeta {
    /// Source-side series key
    pub key: String,

    /// Series title
    pub title: String,

    /// Cover thumbnail URL
    #[serde(default)]
    pub thumbnail_url: Option<String>,

    /// Long description
    #[serde(default)]
    pub description: Option<String>,

    /// Publication status string as the source reports it
    #[serde(default)]
    pub status: Option<String>,
}

/// One catalog entry in a search/latest/popular result page
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SeriesHit {
    /// Source-side series key
    pub key: String,

    /// Series title
    pub title: String,

    /// Cover thumbnail URL
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Paginated catalog result
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Paginated<T> {
    /// Entries on this page
    pub items: Vec<T>,

    /// Whether another page can be requested
    pub has_next_page: bool,
}

/// One downloaded page image
#[derive(Clone, Debug, PartialEq)]
pub struct PageBlob {
    /// Raw image bytes
    pub bytes: Vec<u8>,

    /// Content type reported by the host (e.g. "image/jpeg")
    pub content_type: String,
}

/// A source preference entry, mirrored from the extension host's
/// settings surface. Closed variant; the host does not grow new widget
/// kinds without a protocol change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourcePreference {
    /// Single-choice dropdown
    ComboBox {
        /// Preference key
        key: String,
        /// Display title
        title: String,
        /// Available entries
        entries: Vec<String>,
        /// Currently selected entry
        #[serde(default)]
        current: Option<String>,
    },
    /// Multi-choice dropdown
    ComboCheckBox {
        /// Preference key
        key: String,
        /// Display title
        title: String,
        /// Available entries
        entries: Vec<String>,
        /// Currently selected entries
        #[serde(default)]
        selected: Vec<String>,
    },
    /// Free-form text input
    TextBox {
        /// Preference key
        key: String,
        /// Display title
        title: String,
        /// Current value
        #[serde(default)]
        current: Option<String>,
    },
    /// Boolean toggle
    Switch {
        /// Preference key
        key: String,
        /// Display title
        title: String,
        /// Current state
        enabled: bool,
    },
}

/// Preference write request
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct PreferenceUpdate {
    /// Source whose preference is being written
    pub source_id: String,

    /// Preference key
    pub key: String,

    /// New value; shape depends on the preference kind
    pub value: serde_json::Value,
}

/// Installed or installable extension as reported by the host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct ExtensionInfo {
    /// Package name, unique per extension
    pub pkg_name: String,

    /// Display name
    pub name: String,

    /// Version string
    pub version: String,

    /// Extension language code
    pub lang: String,

    /// Whether the extension is installed on the host
    pub installed: bool,

    /// Whether a newer version is available
    #[serde(default)]
    pub has_update: bool,
}

/// HTTP client against the extension host's base URL
#[derive(Clone, Debug)]
pub struct BridgeClient {
    http: reqwest::Client,
    base: Url,
    rate_limit_attempts: u32,
}

impl BridgeClient {
    /// Build a client from configuration.
    ///
    /// The per-request timeout applies to every call made through this
    /// client; cancellation is handled per call via the token.
    pub fn new(config: &BridgeConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url).map_err(|e| Error::Config {
            message: format!("invalid bridge base URL '{}': {}", config.base_url, e),
            key: Some("bridge.base_url".to_string()),
        })?;

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(BridgeError::Transport)?;

        Ok(Self {
            http,
            base,
            rate_limit_attempts: config.rate_limit_attempts.max(1),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Other(format!("invalid bridge path '{}': {}", path, e)))
    }

    /// Send a request, retrying on 429 and mapping non-2xx statuses.
    async fn send(
        &self,
        method: &'static str,
        path: &str,
        build: impl Fn() -> reqwest::RequestBuilder,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0u32;

        loop {
            let request = build();

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                res = request.send() => res.map_err(BridgeError::Transport)?,
            };

            let status = response.status();
            if status.is_success() {
                return Ok(response);
            }

            if status == StatusCode::NOT_FOUND {
                return Err(BridgeError::NotFound {
                    method,
                    path: path.to_string(),
                }
                .into());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                attempt += 1;
                if attempt >= self.rate_limit_attempts {
                    return Err(BridgeError::RateLimited {
                        path: path.to_string(),
                        attempts: attempt,
                    }
                    .into());
                }

                let delay = Duration::from_secs(1 << (attempt - 1));
                tracing::warn!(path, attempt, delay_secs = delay.as_secs(), "bridge throttled, backing off");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(BODY_SNIPPET_LEN).collect();
            return Err(BridgeError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
                snippet,
            }
            .into());
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<T> {
        let url = self.endpoint(path)?;
        let response = self
            .send("GET", path, || self.http.get(url.clone()), cancel)
            .await?;

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = response.bytes() => res.map_err(BridgeError::Transport)?,
        };

        serde_json::from_slice(&bytes)
            .map_err(|e| BridgeError::Decode(format!("{path}: {e}")).into())
    }

    async fn get_bytes(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<PageBlob> {
        let url = self.endpoint(path)?;
        let response = self
            .send("GET", path, || self.http.get(url.clone()), cancel)
            .await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            res = response.bytes() => res.map_err(BridgeError::Transport)?,
        };

        Ok(PageBlob {
            bytes: bytes.to_vec(),
            content_type,
        })
    }

    /// Fetch series metadata by source-side key
    pub async fn get_series(
        &self,
        series_key: &str,
        online_fetch: bool,
        cancel: &CancellationToken,
    ) -> Result<SeriesMeta> {
        let path = format!(
            "/api/v1/manga/{}?online_fetch={}",
            urlencoding::encode(series_key),
            online_fetch
        );
        self.get_json(&path, cancel).await
    }

    /// List chapters for a series.
    ///
    /// `online_fetch` forces the host to refresh from the source rather
    /// than serve its cache.
    pub async fn list_chapters(
        &self,
        series_key: &str,
        online_fetch: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<BridgeChapter>> {
        let path = format!(
            "/api/v1/manga/{}/chapters?online_fetch={}",
            urlencoding::encode(series_key),
            online_fetch
        );
        self.get_json(&path, cancel).await
    }

    /// Fetch one page image of a chapter.
    ///
    /// Returns the distinguished NotFound error for pages past the end,
    /// which the builder relies on when the page count is unknown.
    pub async fn fetch_page(
        &self,
        series_key: &str,
        chapter_index: i64,
        page_index: u32,
        cancel: &CancellationToken,
    ) -> Result<PageBlob> {
        let path = format!(
            "/api/v1/manga/{}/chapter/{}/page/{}",
            urlencoding::encode(series_key),
            chapter_index,
            page_index
        );
        self.get_bytes(&path, cancel).await
    }

    /// Search a source's catalog
    pub async fn search(
        &self,
        source_id: &str,
        term: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Paginated<SeriesHit>> {
        let path = format!(
            "/api/v1/source/{}/search?term={}&page={}",
            urlencoding::encode(source_id),
            urlencoding::encode(term),
            page
        );
        self.get_json(&path, cancel).await
    }

    /// Latest-updated feed of a source's catalog
    pub async fn latest(
        &self,
        source_id: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Paginated<SeriesHit>> {
        let path = format!(
            "/api/v1/source/{}/latest/{}",
            urlencoding::encode(source_id),
            page
        );
        self.get_json(&path, cancel).await
    }

    /// Popularity feed of a source's catalog
    pub async fn popular(
        &self,
        source_id: &str,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Paginated<SeriesHit>> {
        let path = format!(
            "/api/v1/source/{}/popular/{}",
            urlencoding::encode(source_id),
            page
        );
        self.get_json(&path, cancel).await
    }

    /// Read a source's preference entries
    pub async fn get_preferences(
        &self,
        source_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<SourcePreference>> {
        let path = format!(
            "/api/v1/source/{}/preferences",
            urlencoding::encode(source_id)
        );
        self.get_json(&path, cancel).await
    }

    /// Write one source preference
    pub async fn set_preference(
        &self,
        update: &PreferenceUpdate,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = format!(
            "/api/v1/source/{}/preferences",
            urlencoding::encode(&update.source_id)
        );
        let url = self.endpoint(&path)?;
        self.send("POST", &path, || self.http.post(url.clone()).json(update), cancel)
            .await?;
        Ok(())
    }

    /// List extensions known to the host
    pub async fn list_extensions(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<ExtensionInfo>> {
        self.get_json("/api/v1/extension/list", cancel).await
    }

    /// Upload and install an extension package
    pub async fn install_extension(
        &self,
        apk: Vec<u8>,
        filename: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = "/api/v1/extension/install";
        let url = self.endpoint(path)?;
        let filename = filename.to_string();

        self.send(
            "POST",
            path,
            || {
                let part = reqwest::multipart::Part::bytes(apk.clone())
                    .file_name(filename.clone())
                    .mime_str("application/vnd.android.package-archive")
                    .unwrap_or_else(|_| reqwest::multipart::Part::bytes(apk.clone()));
                let form = reqwest::multipart::Form::new().part("file", part);
                self.http.post(url.clone()).multipart(form)
            },
            cancel,
        )
        .await?;
        Ok(())
    }

    /// Uninstall an extension by package name
    pub async fn uninstall_extension(
        &self,
        pkg_name: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let path = format!(
            "/api/v1/extension/uninstall/{}",
            urlencoding::encode(pkg_name)
        );
        let url = self.endpoint(&path)?;
        self.send("POST", &path, || self.http.post(url.clone()), cancel)
            .await?;
        Ok(())
    }

    /// Fetch an extension's icon
    pub async fn get_icon(
        &self,
        apk_name: &str,
        cancel: &CancellationToken,
    ) -> Result<PageBlob> {
        let path = format!("/api/v1/extension/icon/{}", urlencoding::encode(apk_name));
        self.get_bytes(&path, cancel).await
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
