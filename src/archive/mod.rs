//! CBZ packaging and verification.
//!
//! A chapter is stored as a single compressed archive: zero-padded page
//! entries whose lexicographic order equals reading order, plus one
//! `ComicInfo.xml` descriptor entry carrying the chapter metadata and a
//! deterministic fingerprint over the page bytes.
//!
//! Writers never expose a partially-written file: pages are written to
//! a `.tmp` sibling, flushed, and atomically renamed into place.

use crate::error::{ArchiveError, Error, Result};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Fixed name of the embedded metadata descriptor entry
pub const DESCRIPTOR_ENTRY: &str = "ComicInfo.xml";

/// Marker prefixing the fingerprint inside the descriptor's Notes field
const FINGERPRINT_PREFIX: &str = "kaizoku:sha256=";

/// Page image extensions recognized by [`verify`]
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "gif"];

/// One page ready for packaging
#[derive(Clone, Debug, PartialEq)]
pub struct ArchivePage {
    /// Raw image bytes
    pub bytes: Vec<u8>,

    /// File extension derived from the content type
    pub extension: String,
}

impl ArchivePage {
    /// Build a page from raw bytes and an HTTP content type
    pub fn new(bytes: Vec<u8>, content_type: &str) -> Self {
        Self {
            bytes,
            extension: extension_for(content_type).to_string(),
        }
    }
}

/// Map an image content type to a file extension; unknown types fall
/// back to jpg so the entry still sorts as an image
pub fn extension_for(content_type: &str) -> &'static str {
    match content_type.split(';').next().unwrap_or("").trim() {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/avif" => "avif",
        _ => "jpg",
    }
}

/// Per-chapter metadata embedded in the archive
#[derive(Clone, Debug, PartialEq)]
pub struct ChapterDescriptor {
    /// Series title
    pub series_title: String,

    /// Provider the chapter was fetched from
    pub source: String,

    /// Scanlator group, if part of the binding identity
    pub scanlator: Option<String>,

    /// Chapter language code
    pub language: String,

    /// Display chapter number
    pub chapter_number: String,

    /// Chapter title
    pub chapter_title: Option<String>,

    /// Number of page entries
    pub page_count: u32,

    /// SHA-256 over the page bytes in reading order, hex encoded
    pub fingerprint: String,
}

/// Result of a surface archive check
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveCheck {
    /// Opens as an archive and contains page images
    Fine,
    /// Exists but cannot be opened as an archive
    NotAnArchive,
    /// Opens but holds no page images
    NoImages,
    /// No file at the path
    NotFound,
}

/// Deterministic fingerprint over page bytes in reading order
pub fn fingerprint_pages(pages: &[ArchivePage]) -> String {
    let mut hasher = Sha256::new();
    for page in pages {
        hasher.update(&page.bytes);
    }
    hex_encode(&hasher.finalize())
}

/// Write a chapter archive at `final_path`.
///
/// Pages are named by zero-padded index and extension so lexicographic
/// order equals reading order. A stale `.tmp` sibling from a crashed
/// attempt is removed first; the finished file is flushed and renamed
/// into place in one step.
pub fn package(
    final_path: &Path,
    pages: &[ArchivePage],
    descriptor: &ChapterDescriptor,
) -> Result<()> {
    if let Some(parent) = final_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            Error::Archive(ArchiveError::WriteFailed {
                path: final_path.to_path_buf(),
                reason: format!("failed to create series directory: {e}"),
            })
        })?;
    }

    let tmp_path = tmp_sibling(final_path);
    if tmp_path.exists() {
        std::fs::remove_file(&tmp_path).map_err(|e| {
            Error::Archive(ArchiveError::WriteFailed {
                path: final_path.to_path_buf(),
                reason: format!("failed to remove stale tmp file: {e}"),
            })
        })?;
    }

    let write_failed = |reason: String| {
        Error::Archive(ArchiveError::WriteFailed {
            path: final_path.to_path_buf(),
            reason,
        })
    };

    let file = std::fs::File::create(&tmp_path)
        .map_err(|e| write_failed(format!("failed to create tmp file: {e}")))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let width = page_name_width(pages.len());
    for (index, page) in pages.iter().enumerate() {
        let name = format!("{:0width$}.{}", index + 1, page.extension, width = width);
        zip.start_file(name, options)
            .map_err(|e| write_failed(format!("failed to start page entry: {e}")))?;
        zip.write_all(&page.bytes)
            .map_err(|e| write_failed(format!("failed to write page bytes: {e}")))?;
    }

    zip.start_file(DESCRIPTOR_ENTRY, options)
        .map_err(|e| write_failed(format!("failed to start descriptor entry: {e}")))?;
    zip.write_all(descriptor.to_comic_info().as_bytes())
        .map_err(|e| write_failed(format!("failed to write descriptor: {e}")))?;

    let file = zip
        .finish()
        .map_err(|e| write_failed(format!("failed to finish archive: {e}")))?;
    file.sync_all()
        .map_err(|e| write_failed(format!("failed to flush archive: {e}")))?;
    drop(file);

    std::fs::rename(&tmp_path, final_path)
        .map_err(|e| write_failed(format!("failed to rename into place: {e}")))?;

    Ok(())
}

/// Surface check of an archive on disk
pub fn verify(path: &Path) -> ArchiveCheck {
    if !path.exists() {
        return ArchiveCheck::NotFound;
    }

    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => return ArchiveCheck::NotAnArchive,
    };
    let mut archive = match zip::ZipArchive::new(file) {
        Ok(a) => a,
        Err(_) => return ArchiveCheck::NotAnArchive,
    };

    let mut image_count = 0usize;
    for i in 0..archive.len() {
        let Ok(entry) = archive.by_index(i) else {
            return ArchiveCheck::NotAnArchive;
        };
        if is_image_entry(entry.name()) {
            image_count += 1;
        }
    }

    if image_count == 0 {
        ArchiveCheck::NoImages
    } else {
        ArchiveCheck::Fine
    }
}

/// Deep check: recompute the page fingerprint and compare with the
/// descriptor's. Returns false on mismatch.
pub fn verify_deep(path: &Path) -> Result<bool> {
    let descriptor = read_descriptor(path)?.ok_or_else(|| {
        Error::Archive(ArchiveError::MissingDescriptor {
            path: path.to_path_buf(),
        })
    })?;

    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        Error::Archive(ArchiveError::VerificationFailed {
            path: path.to_path_buf(),
            reason: format!("failed to open archive: {e}"),
        })
    })?;

    // Page entries in name order; lexicographic equals reading order
    let mut names: Vec<String> = (0..archive.len())
        .filter_map(|i| archive.by_index(i).ok().map(|e| e.name().to_string()))
        .filter(|name| is_image_entry(name))
        .collect();
    names.sort();

    let mut hasher = Sha256::new();
    for name in &names {
        let mut entry = archive.by_name(name).map_err(|e| {
            Error::Archive(ArchiveError::VerificationFailed {
                path: path.to_path_buf(),
                reason: format!("failed to read page entry {name}: {e}"),
            })
        })?;
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes)?;
        hasher.update(&bytes);
    }

    Ok(hex_encode(&hasher.finalize()) == descriptor.fingerprint)
}

/// Read the embedded descriptor, if the archive carries one
pub fn read_descriptor(path: &Path) -> Result<Option<ChapterDescriptor>> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(|e| {
        Error::Archive(ArchiveError::VerificationFailed {
            path: path.to_path_buf(),
            reason: format!("failed to open archive: {e}"),
        })
    })?;

    let mut entry = match archive.by_name(DESCRIPTOR_ENTRY) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => return Ok(None),
        Err(e) => {
            return Err(Error::Archive(ArchiveError::VerificationFailed {
                path: path.to_path_buf(),
                reason: format!("failed to read descriptor entry: {e}"),
            }));
        }
    };

    let mut xml = String::new();
    entry.read_to_string(&mut xml)?;

    Ok(ChapterDescriptor::from_comic_info(&xml))
}

/// Remove a stale `.tmp` sibling left behind by a crashed attempt
pub fn cleanup_stale_tmp(final_path: &Path) -> Result<()> {
    let tmp_path = tmp_sibling(final_path);
    if tmp_path.exists() {
        tracing::debug!(path = %tmp_path.display(), "removing stale tmp archive");
        std::fs::remove_file(&tmp_path)?;
    }
    Ok(())
}

fn tmp_sibling(final_path: &Path) -> PathBuf {
    let mut name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "chapter.cbz".to_string());
    name.push_str(".tmp");
    final_path.with_file_name(name)
}

fn page_name_width(page_count: usize) -> usize {
    page_count.to_string().len().max(3)
}

fn is_image_entry(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

impl ChapterDescriptor {
    /// Render the descriptor as a ComicInfo.xml document
    pub fn to_comic_info(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<ComicInfo>\n");
        push_tag(&mut xml, "Series", &self.series_title);
        if let Some(title) = &self.chapter_title {
            push_tag(&mut xml, "Title", title);
        }
        push_tag(&mut xml, "Number", &self.chapter_number);
        push_tag(&mut xml, "Web", &self.source);
        if let Some(scanlator) = &self.scanlator {
            push_tag(&mut xml, "Translator", scanlator);
        }
        push_tag(&mut xml, "LanguageISO", &self.language);
        push_tag(&mut xml, "PageCount", &self.page_count.to_string());
        push_tag(
            &mut xml,
            "Notes",
            &format!("{FINGERPRINT_PREFIX}{}", self.fingerprint),
        );
        xml.push_str("</ComicInfo>\n");
        xml
    }

    /// Parse a ComicInfo.xml document written by [`Self::to_comic_info`]
    pub fn from_comic_info(xml: &str) -> Option<Self> {
        let fingerprint = extract_tag(xml, "Notes")?
            .strip_prefix(FINGERPRINT_PREFIX)?
            .to_string();

        Some(Self {
            series_title: extract_tag(xml, "Series")?,
            source: extract_tag(xml, "Web")?,
            scanlator: extract_tag(xml, "Translator"),
            language: extract_tag(xml, "LanguageISO")?,
            chapter_number: extract_tag(xml, "Number")?,
            chapter_title: extract_tag(xml, "Title"),
            page_count: extract_tag(xml, "PageCount")?.parse().ok()?,
            fingerprint,
        })
    }
}

fn push_tag(xml: &mut String, tag: &str, value: &str) {
    xml.push_str(&format!("  <{tag}>{}</{tag}>\n", xml_escape(value)));
}

fn extract_tag(xml: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = xml.find(&open)? + open.len();
    let end = xml[start..].find(&close)? + start;
    Some(xml_unescape(&xml[start..end]))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn xml_unescape(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&gt;", ">")
        .replace("&lt;", "<")
        .replace("&amp;", "&")
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn test_pages(count: usize) -> Vec<ArchivePage> {
        (0..count)
            .map(|i| ArchivePage {
                bytes: format!("page-{i}-bytes").into_bytes(),
                extension: "jpg".to_string(),
            })
            .collect()
    }

    fn test_descriptor(pages: &[ArchivePage]) -> ChapterDescriptor {
        ChapterDescriptor {
            series_title: "Witch Hat Atelier".into(),
            source: "mangadex".into(),
            scanlator: Some("somegroup".into()),
            language: "en".into(),
            chapter_number: "10.5".into(),
            chapter_title: Some("Bonus: The Day Off".into()),
            page_count: pages.len() as u32,
            fingerprint: fingerprint_pages(pages),
        }
    }

    #[test]
    fn package_then_verify_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        let pages = test_pages(3);

        package(&path, &pages, &test_descriptor(&pages)).unwrap();

        assert_eq!(verify(&path), ArchiveCheck::Fine);
        assert!(path.exists());
    }

    #[test]
    fn package_leaves_no_tmp_sibling_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        let pages = test_pages(2);

        package(&path, &pages, &test_descriptor(&pages)).unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty(), "tmp file must be renamed away");
    }

    #[test]
    fn package_replaces_a_stale_tmp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        std::fs::write(dir.path().join("ch10.cbz.tmp"), b"crashed attempt").unwrap();

        let pages = test_pages(2);
        package(&path, &pages, &test_descriptor(&pages)).unwrap();

        assert_eq!(verify(&path), ArchiveCheck::Fine);
        assert!(!dir.path().join("ch10.cbz.tmp").exists());
    }

    #[test]
    fn read_descriptor_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        let pages = test_pages(3);
        let descriptor = test_descriptor(&pages);

        package(&path, &pages, &descriptor).unwrap();

        let back = read_descriptor(&path).unwrap().expect("descriptor present");
        assert_eq!(back, descriptor);
    }

    #[test]
    fn descriptor_survives_xml_special_characters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch1.cbz");
        let pages = test_pages(1);
        let mut descriptor = test_descriptor(&pages);
        descriptor.series_title = "Fullmetal <Alchemist> & \"Friends\"".into();
        descriptor.chapter_title = Some("A > B".into());

        package(&path, &pages, &descriptor).unwrap();

        let back = read_descriptor(&path).unwrap().expect("descriptor present");
        assert_eq!(back, descriptor);
    }

    #[test]
    fn page_names_sort_in_reading_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        let pages = test_pages(12);

        package(&path, &pages, &test_descriptor(&pages)).unwrap();

        let file = std::fs::File::open(&path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .filter(|n| n != DESCRIPTOR_ENTRY)
            .collect();

        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted, "insertion order must equal lexicographic order");
        assert_eq!(sorted.first().unwrap(), "001.jpg");
        assert_eq!(sorted.last().unwrap(), "012.jpg");
    }

    #[test]
    fn page_name_width_grows_with_large_chapters() {
        assert_eq!(page_name_width(5), 3);
        assert_eq!(page_name_width(999), 3);
        assert_eq!(page_name_width(1000), 4);
    }

    #[test]
    fn verify_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(verify(&dir.path().join("nope.cbz")), ArchiveCheck::NotFound);
    }

    #[test]
    fn verify_garbage_file_is_not_an_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.cbz");
        std::fs::write(&path, b"this is not a zip").unwrap();
        assert_eq!(verify(&path), ArchiveCheck::NotAnArchive);
    }

    #[test]
    fn verify_archive_without_images_is_no_images() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.cbz");

        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("readme.txt", options).unwrap();
        zip.write_all(b"no pages here").unwrap();
        zip.finish().unwrap();

        assert_eq!(verify(&path), ArchiveCheck::NoImages);
    }

    #[test]
    fn verify_deep_accepts_an_untouched_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        let pages = test_pages(4);

        package(&path, &pages, &test_descriptor(&pages)).unwrap();
        assert!(verify_deep(&path).unwrap());
    }

    #[test]
    fn verify_deep_rejects_a_wrong_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ch10.cbz");
        let pages = test_pages(4);
        let mut descriptor = test_descriptor(&pages);
        descriptor.fingerprint = "0".repeat(64);

        package(&path, &pages, &descriptor).unwrap();
        assert!(!verify_deep(&path).unwrap());
    }

    #[test]
    fn verify_deep_without_descriptor_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.cbz");

        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::FileOptions::default();
        zip.start_file("001.jpg", options).unwrap();
        zip.write_all(b"page").unwrap();
        zip.finish().unwrap();

        assert!(verify_deep(&path).is_err());
        assert!(read_descriptor(&path).unwrap().is_none());
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_sensitive() {
        let pages = test_pages(3);
        assert_eq!(fingerprint_pages(&pages), fingerprint_pages(&pages));

        let mut reversed = pages.clone();
        reversed.reverse();
        assert_ne!(fingerprint_pages(&pages), fingerprint_pages(&reversed));
    }

    #[test]
    fn extension_mapping_covers_common_image_types() {
        assert_eq!(extension_for("image/jpeg"), "jpg");
        assert_eq!(extension_for("image/png"), "png");
        assert_eq!(extension_for("image/webp"), "webp");
        assert_eq!(extension_for("image/gif"), "gif");
        assert_eq!(extension_for("image/png; charset=binary"), "png");
        assert_eq!(extension_for("application/octet-stream"), "jpg");
    }

    #[test]
    fn cleanup_stale_tmp_removes_only_the_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let final_path = dir.path().join("ch1.cbz");
        let tmp = dir.path().join("ch1.cbz.tmp");
        std::fs::write(&tmp, b"partial").unwrap();
        std::fs::write(dir.path().join("other.cbz"), b"keep").unwrap();

        cleanup_stale_tmp(&final_path).unwrap();

        assert!(!tmp.exists());
        assert!(dir.path().join("other.cbz").exists());
    }
}
