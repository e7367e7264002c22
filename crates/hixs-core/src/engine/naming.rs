//! Destination file names
//!
//! Names come from the engine's suggestion or the URL, are stripped of
//! characters that are illegal in paths, and are made unique against both the
//! file system and every destination already handed to an in-flight job.

use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Name used when nothing usable is left after sanitizing
pub const FALLBACK_NAME: &str = "download";

/// Longest stem kept by [`sanitize_filename`], in characters
pub const MAX_STEM_CHARS: usize = 200;

/// File name limit, in UTF-8 bytes, of common file systems
pub const MAX_NAME_BYTES: usize = 255;

const ILLEGAL_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Last path segment of `url`, percent-decoded
pub fn filename_from_url(url: &url::Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .map(|segment| {
            urlencoding::decode(segment)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| segment.to_string())
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| FALLBACK_NAME.to_string())
}

/// Remove path-illegal characters and cap the stem length, keeping the extension.
///
/// The stem keeps at most [`MAX_STEM_CHARS`] characters, and the whole name
/// at most [`MAX_NAME_BYTES`] bytes.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !ILLEGAL_CHARS.contains(c)).collect();

    let truncated = {
        let (stem, ext) = split_extension(&cleaned);
        let budget = MAX_NAME_BYTES.saturating_sub(ext.map_or(0, |ext| ext.len() + 1));
        let kept = truncate_stem(stem, budget);
        (kept.len() < stem.len()).then(|| match ext {
            Some(ext) => format!("{kept}.{ext}"),
            None => kept.to_string(),
        })
    };
    let cleaned = truncated.unwrap_or(cleaned);

    if cleaned.trim().is_empty() || cleaned == "." || cleaned == ".." {
        FALLBACK_NAME.to_string()
    } else {
        cleaned
    }
}

/// Longest prefix of `stem` within both the character and the byte cap
fn truncate_stem(stem: &str, max_bytes: usize) -> &str {
    let mut end = 0;
    for (count, (start, c)) in stem.char_indices().enumerate() {
        if count == MAX_STEM_CHARS || start + c.len_utf8() > max_bytes {
            break;
        }
        end = start + c.len_utf8();
    }
    &stem[..end]
}

/// Split `name` at its last dot. Leading dots do not start an extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    let body_start = name.len() - name.trim_start_matches('.').len();
    match name[body_start..].rfind('.') {
        Some(dot) => {
            let dot = body_start + dot;
            (&name[..dot], Some(&name[dot + 1..]))
        }
        None => (name, None),
    }
}

pub fn has_extension(path: &Path) -> bool {
    path.extension().is_some_and(|ext| !ext.is_empty())
}

/// `dir/name.ext` -> `dir/name (n).ext`
pub fn numbered(path: &Path, n: u32) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_NAME.to_string());
    let name = match path.extension() {
        Some(ext) => format!("{} ({}).{}", stem, n, ext.to_string_lossy()),
        None => format!("{} ({})", stem, n),
    };
    path.with_file_name(name)
}

/// Destinations handed out to jobs that have not finished yet
#[derive(Debug, Clone, Default)]
pub struct PathReservations {
    reserved: Arc<Mutex<HashSet<PathBuf>>>,
}

impl PathReservations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `candidate`, or the first free `name (n).ext` variant of it
    pub fn reserve_unique(&self, candidate: &Path) -> PathBuf {
        let mut reserved = self.reserved.lock();
        let mut path = candidate.to_path_buf();
        let mut counter = 1;

        while path.exists() || reserved.contains(&path) {
            path = numbered(candidate, counter);
            counter += 1;
        }

        reserved.insert(path.clone());
        path
    }

    pub fn release(&self, path: &Path) {
        self.reserved.lock().remove(path);
    }

    pub fn is_reserved(&self, path: &Path) -> bool {
        self.reserved.lock().contains(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> url::Url {
        url::Url::parse(s).unwrap()
    }

    #[test]
    fn illegal_characters_are_stripped() {
        assert_eq!(sanitize_filename("con:doc*.pdf"), "condoc.pdf");
        assert_eq!(sanitize_filename(r#"a<b>c"d/e\f|g?h.txt"#), "abcdefgh.txt");
        assert_eq!(sanitize_filename("plain name (1).tar.gz"), "plain name (1).tar.gz");
    }

    #[test]
    fn empty_results_use_fallback_name() {
        assert_eq!(sanitize_filename(""), FALLBACK_NAME);
        assert_eq!(sanitize_filename("***"), FALLBACK_NAME);
        assert_eq!(sanitize_filename("../"), FALLBACK_NAME);
    }

    #[test]
    fn long_names_keep_their_extension() {
        let long = format!("{}.pdf", "a".repeat(300));
        let sanitized = sanitize_filename(&long);
        assert_eq!(sanitized, format!("{}.pdf", "a".repeat(MAX_STEM_CHARS)));

        let short = format!("{}.pdf", "b".repeat(MAX_STEM_CHARS - 1));
        assert_eq!(sanitize_filename(&short), short);
    }

    #[test]
    fn multibyte_names_fit_the_byte_limit() {
        let accented = format!("{}.pdf", "é".repeat(MAX_STEM_CHARS));
        let sanitized = sanitize_filename(&accented);
        assert!(sanitized.len() <= MAX_NAME_BYTES);
        assert_eq!(sanitized, format!("{}.pdf", "é".repeat(125)));

        let bare = sanitize_filename(&"é".repeat(250));
        assert_eq!(bare, "é".repeat(127));

        let wide = sanitize_filename(&format!("{}.txt", "日".repeat(100)));
        assert!(wide.len() <= MAX_NAME_BYTES);
        assert!(wide.ends_with(".txt"));
        assert_eq!(wide.chars().count(), 83 + 4);
    }

    #[test]
    fn split_extension_ignores_leading_dots() {
        assert_eq!(split_extension("report.pdf"), ("report", Some("pdf")));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", Some("gz")));
        assert_eq!(split_extension(".bashrc"), (".bashrc", None));
        assert_eq!(split_extension("README"), ("README", None));
    }

    #[test]
    fn filename_comes_from_last_decoded_segment() {
        assert_eq!(
            filename_from_url(&url("https://example.com/files/My%20Report.pdf?x=1")),
            "My Report.pdf"
        );
        assert_eq!(filename_from_url(&url("https://example.com/dir/")), "dir");
        assert_eq!(filename_from_url(&url("https://example.com/")), FALLBACK_NAME);
    }

    #[test]
    fn numbered_inserts_counter_before_extension() {
        assert_eq!(numbered(Path::new("/d/report.pdf"), 2), PathBuf::from("/d/report (2).pdf"));
        assert_eq!(numbered(Path::new("/d/notes"), 1), PathBuf::from("/d/notes (1)"));
    }

    #[test]
    fn existing_files_get_incrementing_suffixes() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("report.pdf");
        std::fs::write(&candidate, b"old").unwrap();

        let reservations = PathReservations::new();
        let first = reservations.reserve_unique(&candidate);
        let second = reservations.reserve_unique(&candidate);

        assert_eq!(first, dir.path().join("report (1).pdf"));
        assert_eq!(second, dir.path().join("report (2).pdf"));
    }

    #[test]
    fn released_paths_can_be_reused() {
        let dir = tempfile::tempdir().unwrap();
        let candidate = dir.path().join("image.png");

        let reservations = PathReservations::new();
        let first = reservations.reserve_unique(&candidate);
        assert_eq!(first, candidate);
        assert!(reservations.is_reserved(&candidate));

        reservations.release(&first);
        assert_eq!(reservations.reserve_unique(&candidate), candidate);
    }
}
