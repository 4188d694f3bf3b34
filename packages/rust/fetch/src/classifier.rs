//! Content classification from response headers and leading body bytes.
//!
//! Precedence: the extension of a `Content-Disposition` filename, then the
//! declared media type, then magic bytes for octet-stream bodies. A ZIP
//! container without further context is guessed to be a presentation.

use std::sync::LazyLock;

use regex::Regex;

use lectern_shared::{CANONICAL_EXTENSION, MimeKind};

static DISPOSITION_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"filename[*]?=["']?(?:UTF-8'')?([^"';\n]+)"#).expect("valid regex")
});

/// Declared media types with a known extension.
const MEDIA_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("application/vnd.ms-powerpoint", "ppt"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    ("application/vnd.ms-excel", "xls"),
];

/// ZIP local-file-header signature.
const ZIP_MAGIC: &[u8] = b"PK";
const PDF_MAGIC: &[u8] = b"%PDF";

/// Extension assumed for a bare ZIP container.
const ZIP_DEFAULT_EXTENSION: &str = "pptx";

/// Number of leading bytes the classifier looks at.
pub const SNIFF_LEN: usize = 8;

/// Inferred kind plus the extension to store the file under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: MimeKind,
    /// Lower-case, without the dot.
    pub extension: String,
}

impl Classification {
    fn from_extension(ext: &str) -> Self {
        let extension = ext.to_ascii_lowercase();
        Self {
            kind: MimeKind::from_extension(&extension),
            extension,
        }
    }

    fn canonical() -> Self {
        Self::from_extension(CANONICAL_EXTENSION)
    }
}

/// Classify a response. `head` is the first bytes of the body (may be empty).
pub fn classify(
    content_disposition: Option<&str>,
    content_type: Option<&str>,
    head: &[u8],
) -> Classification {
    if let Some(ext) = content_disposition.and_then(disposition_extension) {
        return Classification::from_extension(&ext);
    }

    let media_type = content_type.map(media_type_of).unwrap_or_default();

    if let Some((_, ext)) = MEDIA_TYPES.iter().find(|(mt, _)| *mt == media_type) {
        return Classification::from_extension(ext);
    }

    if media_type.ends_with("octet-stream") {
        if head.starts_with(ZIP_MAGIC) {
            return Classification::from_extension(ZIP_DEFAULT_EXTENSION);
        }
        if head.starts_with(PDF_MAGIC) {
            return Classification::canonical();
        }
    }

    Classification::canonical()
}

/// Extension of the filename in a `Content-Disposition` value, if it has one.
pub fn disposition_extension(header: &str) -> Option<String> {
    let name = DISPOSITION_FILENAME.captures(header)?.get(1)?.as_str().trim();
    let (stem, ext) = name.rsplit_once('.')?;
    let ext = ext.trim();
    if stem.is_empty() || ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// `Application/PDF; charset=binary` → `application/pdf`.
fn media_type_of(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}
