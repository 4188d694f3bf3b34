//! Deterministic, filesystem-safe names for course, unit, and class outputs.
//!
//! Every name here is a pure function of catalog data, so re-running the
//! pipeline against unchanged content yields identical paths.

use crate::types::CatalogEntry;

/// Longest class-name component kept in a file name.
const MAX_CLASS_NAME_CHARS: usize = 50;

/// Replace characters outside `[A-Za-z0-9 -]` with `-`, then collapse
/// whitespace runs into single hyphens.
pub fn hyphenate(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == ' ' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join("-")
}

/// Keep only alphanumerics, space, `-`, `_`; trim and truncate.
pub fn safe_file_stem(raw: &str) -> String {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    kept.trim().chars().take(MAX_CLASS_NAME_CHARS).collect::<String>().trim().to_string()
}

/// `{subjectCode}-{SafeTitle}`, shared by the course directory and merge artifacts.
pub fn course_prefix(course: &CatalogEntry) -> String {
    format!("{}-{}", course.subject_code(), hyphenate(course.course_title()))
}

/// `course{id}_{subjectCode}-{SafeTitle}`.
pub fn course_dir_name(course: &CatalogEntry) -> String {
    format!("course{}_{}", course.id, course_prefix(course))
}

/// `unit_{n}_{SafeTitle}`, falling back to `Unit-{n}` when the title is empty.
pub fn unit_dir_name(unit_number: usize, unit: &CatalogEntry) -> String {
    let title = hyphenate(unit.unit_title());
    let title = title.trim_matches('-');
    if title.is_empty() {
        format!("unit_{unit_number}_Unit-{unit_number}")
    } else {
        format!("unit_{unit_number}_{title}")
    }
}

/// Stem (no extension) for a class document.
///
/// A class with a single reference gets `{NN}_{Class}`; with several, each
/// sibling also carries its own two-digit position and link text so that
/// identical link texts still never collide.
pub fn class_file_stem(
    ordinal: usize,
    class_name: &str,
    reference: Option<(usize, &str)>,
) -> String {
    let class = safe_file_stem(class_name);
    let base = if class.is_empty() {
        format!("{ordinal:02}_class")
    } else {
        format!("{ordinal:02}_{class}")
    };
    match reference {
        None => base,
        Some((position, link_text)) => {
            let link = hyphenate(&safe_file_stem(link_text));
            if link.is_empty() {
                format!("{base}_{position:02}")
            } else {
                format!("{base}_{position:02}_{link}")
            }
        }
    }
}

/// `{prefix}_u{n}_merged.pdf`.
pub fn unit_merge_name(prefix: &str, unit_number: usize) -> String {
    format!("{prefix}_u{unit_number}_merged.pdf")
}

/// `{prefix}_combined.pdf`.
pub fn course_merge_name(prefix: &str) -> String {
    format!("{prefix}_combined.pdf")
}
