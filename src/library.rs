//! Library storage layout.
//!
//! The on-disk library is partitioned by series:
//! `<storage_root>/<category?>/<series folder>/<chapter>.cbz`, with a
//! per-series `kaizoku.json` metadata file and an optional `cover.jpg`.
//! Everything that touches a file name goes through [`sanitize_name`].

use crate::db::{SeriesRow, SourceBindingRow};
use crate::error::Result;
use crate::types::DownloadArgs;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Name of the per-series metadata file
pub const SERIES_MANIFEST: &str = "kaizoku.json";

/// Name of the per-series cover image
pub const COVER_FILENAME: &str = "cover.jpg";

/// Strip characters that are unsafe in file names across platforms.
///
/// Path separators, reserved punctuation, and control characters are
/// replaced; trailing dots and whitespace are trimmed so Windows
/// accepts the result.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();

    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let trimmed = collapsed.trim_end_matches(['.', ' ']).to_string();

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// Directory holding a series' archives
pub fn series_dir(storage_root: &Path, category: Option<&str>, series_folder: &str) -> PathBuf {
    let mut dir = storage_root.to_path_buf();
    if let Some(category) = category {
        dir.push(sanitize_name(category));
    }
    dir.push(sanitize_name(series_folder));
    dir
}

/// File name for one chapter archive, e.g.
/// `Ch.10.5 The Day Off [somegroup][en].cbz`
pub fn chapter_filename(args: &DownloadArgs) -> String {
    let mut name = format!("Ch.{}", args.chapter_number);

    if let Some(title) = args.chapter_title.as_deref().filter(|t| !t.is_empty()) {
        name.push(' ');
        name.push_str(title);
    }
    if let Some(scanlator) = args.scanlator.as_deref().filter(|s| !s.is_empty()) {
        name.push_str(&format!(" [{}]", scanlator));
    }
    name.push_str(&format!(" [{}]", args.language));

    format!("{}.cbz", sanitize_name(&name))
}

/// Final archive path for a queue item
pub fn chapter_path(
    storage_root: &Path,
    category: Option<&str>,
    series_folder: &str,
    args: &DownloadArgs,
) -> PathBuf {
    series_dir(storage_root, category, series_folder).join(chapter_filename(args))
}

/// Binding summary stored in the series manifest
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ManifestBinding {
    /// Provider identifier
    pub source_id: String,

    /// Source-side series key
    pub series_key: String,

    /// Chapter language
    pub language: String,

    /// Binding priority; lower is preferred
    pub priority: i64,

    /// Whether the binding participates in source selection
    pub enabled: bool,
}

/// Per-series metadata written next to the archives
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SeriesManifest {
    /// Library-side series id
    pub id: i64,

    /// Series title
    pub title: String,

    /// Ranked source bindings
    pub sources: Vec<ManifestBinding>,

    /// Number of archived chapters at the last write
    pub chapter_count: usize,

    /// Unix timestamp of the last manifest write
    pub updated_at: i64,
}

impl SeriesManifest {
    /// Build a manifest from database rows
    pub fn from_rows(series: &SeriesRow, bindings: &[SourceBindingRow], chapter_count: usize) -> Self {
        Self {
            id: series.id,
            title: series.title.clone(),
            sources: bindings
                .iter()
                .map(|b| ManifestBinding {
                    source_id: b.source_id.clone(),
                    series_key: b.series_key.clone(),
                    language: b.language.clone(),
                    priority: b.priority,
                    enabled: b.enabled != 0,
                })
                .collect(),
            chapter_count,
            updated_at: Utc::now().timestamp(),
        }
    }
}

/// Write the series manifest, atomically (tmp sibling + rename)
pub async fn write_manifest(series_dir: &Path, manifest: &SeriesManifest) -> Result<()> {
    tokio::fs::create_dir_all(series_dir).await?;

    let json = serde_json::to_vec_pretty(manifest)?;
    let final_path = series_dir.join(SERIES_MANIFEST);
    let tmp_path = series_dir.join(format!("{SERIES_MANIFEST}.tmp"));

    tokio::fs::write(&tmp_path, &json).await?;
    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

/// Read the series manifest, if present
pub async fn read_manifest(series_dir: &Path) -> Result<Option<SeriesManifest>> {
    let path = series_dir.join(SERIES_MANIFEST);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Save the series cover image, atomically
pub async fn save_cover(series_dir: &Path, bytes: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(series_dir).await?;

    let final_path = series_dir.join(COVER_FILENAME);
    let tmp_path = series_dir.join(format!("{COVER_FILENAME}.tmp"));

    tokio::fs::write(&tmp_path, bytes).await?;
    tokio::fs::rename(&tmp_path, &final_path).await?;
    Ok(())
}

/// Count archived chapters in a series directory
pub async fn count_chapters(series_dir: &Path) -> usize {
    let Ok(mut entries) = tokio::fs::read_dir(series_dir).await else {
        return 0;
    };

    let mut count = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        if entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("cbz"))
            .unwrap_or(false)
        {
            count += 1;
        }
    }
    count
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn args() -> DownloadArgs {
        DownloadArgs {
            series_id: 1,
            source_id: "mangadex".into(),
            series_key: "md-42".into(),
            chapter_index: 12,
            chapter_number: "10.5".into(),
            chapter_title: Some("The Day Off".into()),
            language: "en".into(),
            scanlator: Some("somegroup".into()),
            expected_pages: None,
        }
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_name("a/b\\c:d*e?f\"g<h>i|j"), "a b c d e f g h i j");
        assert_eq!(sanitize_name("What If..."), "What If");
        assert_eq!(sanitize_name("  spaced   out  "), "spaced out");
    }

    #[test]
    fn sanitize_never_returns_an_empty_name() {
        assert_eq!(sanitize_name(""), "untitled");
        assert_eq!(sanitize_name("..."), "untitled");
        assert_eq!(sanitize_name("///"), "untitled");
    }

    #[test]
    fn series_dir_includes_optional_category() {
        let root = Path::new("/library");
        assert_eq!(
            series_dir(root, None, "Witch Hat Atelier"),
            Path::new("/library/Witch Hat Atelier")
        );
        assert_eq!(
            series_dir(root, Some("seinen"), "Witch Hat Atelier"),
            Path::new("/library/seinen/Witch Hat Atelier")
        );
    }

    #[test]
    fn chapter_filename_carries_number_title_scanlator_language() {
        assert_eq!(
            chapter_filename(&args()),
            "Ch.10.5 The Day Off [somegroup] [en].cbz"
        );
    }

    #[test]
    fn chapter_filename_omits_missing_title_and_scanlator() {
        let mut args = args();
        args.chapter_title = None;
        args.scanlator = None;
        assert_eq!(chapter_filename(&args), "Ch.10.5 [en].cbz");
    }

    #[test]
    fn chapter_filename_sanitizes_source_titles() {
        let mut args = args();
        args.chapter_title = Some("Side story: A/B testing?".into());
        assert_eq!(
            chapter_filename(&args),
            "Ch.10.5 Side story A B testing [somegroup] [en].cbz"
        );
    }

    #[tokio::test]
    async fn manifest_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = SeriesManifest {
            id: 3,
            title: "Frieren".into(),
            sources: vec![ManifestBinding {
                source_id: "mangadex".into(),
                series_key: "md-42".into(),
                language: "en".into(),
                priority: 0,
                enabled: true,
            }],
            chapter_count: 12,
            updated_at: 1_700_000_000,
        };

        write_manifest(dir.path(), &manifest).await.unwrap();
        let back = read_manifest(dir.path()).await.unwrap().expect("manifest");
        assert_eq!(back, manifest);

        // No tmp sibling survives the write
        assert!(!dir.path().join("kaizoku.json.tmp").exists());
    }

    #[tokio::test]
    async fn read_manifest_on_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_manifest(dir.path()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_cover_writes_atomically() {
        let dir = tempfile::tempdir().unwrap();
        save_cover(dir.path(), b"jpeg bytes").await.unwrap();

        let cover = dir.path().join(COVER_FILENAME);
        assert_eq!(tokio::fs::read(&cover).await.unwrap(), b"jpeg bytes");
        assert!(!dir.path().join("cover.jpg.tmp").exists());
    }

    #[tokio::test]
    async fn count_chapters_counts_cbz_files_only() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("Ch.1 [en].cbz"), b"a").await.unwrap();
        tokio::fs::write(dir.path().join("Ch.2 [en].cbz"), b"b").await.unwrap();
        tokio::fs::write(dir.path().join("kaizoku.json"), b"{}").await.unwrap();
        tokio::fs::write(dir.path().join("cover.jpg"), b"c").await.unwrap();

        assert_eq!(count_chapters(dir.path()).await, 2);
        assert_eq!(count_chapters(&dir.path().join("missing")).await, 0);
    }
}
