//! Static extension to MIME type table used for served content.

use std::path::Path;

/// Used for files whose extension is missing or not in the table.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const CONTENT_TYPES: &[(&str, &str)] = &[
    ("gif", "image/gif"),
    ("gz", "application/gzip"),
    ("htm", "text/html"),
    ("html", "text/html"),
    ("ico", "image/x-icon"),
    ("jpeg", "image/jpeg"),
    ("jpg", "image/jpeg"),
    ("pdf", "application/pdf"),
    ("png", "image/png"),
    ("rar", "application/vnd.rar"),
    ("tar", "application/x-tar"),
    ("txt", "text/plain"),
    ("zip", "application/zip"),
];

/// Looks up the `Content-Type` for `path` by its extension, ignoring case.
pub fn content_type(path: &Path) -> &'static str {
    let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
        return DEFAULT_CONTENT_TYPE;
    };

    CONTENT_TYPES
        .iter()
        .find(|(known, _)| known.eq_ignore_ascii_case(ext))
        .map(|(_, mime)| *mime)
        .unwrap_or(DEFAULT_CONTENT_TYPE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_extensions() {
        assert_eq!(content_type(Path::new("index.html")), "text/html");
        assert_eq!(content_type(Path::new("/a/b/logo.PNG")), "image/png");
        assert_eq!(content_type(Path::new("notes.txt")), "text/plain");
        assert_eq!(content_type(Path::new("archive.tar.gz")), "application/gzip");
    }

    #[test]
    fn test_unknown_or_missing_extension() {
        assert_eq!(content_type(Path::new("data.bin")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type(Path::new("README")), DEFAULT_CONTENT_TYPE);
        assert_eq!(content_type(Path::new("/")), DEFAULT_CONTENT_TYPE);
    }
}
