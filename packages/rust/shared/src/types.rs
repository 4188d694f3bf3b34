//! Core domain types: catalog entries, document references, and fetch outcomes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{LecternError, Result};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

/// Level of a node in the subject → unit → class hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CatalogLevel {
    Subject,
    Unit,
    Class,
}

/// One selectable node from a catalog response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Opaque remote identifier, already cleaned of quoting artifacts.
    pub id: String,
    /// Human-readable label as shown by the portal.
    pub display_name: String,
    /// Which level this entry belongs to.
    pub level: CatalogLevel,
}

impl CatalogEntry {
    /// Build an entry, rejecting blank identifiers or names.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        level: CatalogLevel,
    ) -> Result<Self> {
        let id = id.into();
        let display_name = display_name.into();
        if id.trim().is_empty() {
            return Err(LecternError::validation("catalog entry has an empty id"));
        }
        if display_name.trim().is_empty() {
            return Err(LecternError::validation(format!(
                "catalog entry {id} has an empty name"
            )));
        }
        Ok(Self {
            id,
            display_name: display_name.trim().to_string(),
            level,
        })
    }

    /// Subject code: the part of the name before the first `-`.
    pub fn subject_code(&self) -> &str {
        match self.display_name.split_once('-') {
            Some((code, _)) => code.trim(),
            None => self.display_name.as_str(),
        }
    }

    /// Course title: the part of the name after the first `-`.
    pub fn course_title(&self) -> &str {
        match self.display_name.split_once('-') {
            Some((_, title)) => title.trim(),
            None => self.display_name.as_str(),
        }
    }

    /// Unit title: the part after the first `:` with any trailing colon
    /// removed, or the part before it when nothing follows.
    pub fn unit_title(&self) -> &str {
        match self.display_name.split_once(':') {
            Some((label, rest)) => {
                let rest = rest.trim().trim_end_matches(':').trim();
                if rest.is_empty() { label.trim() } else { rest }
            }
            None => self.display_name.trim(),
        }
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// A downloadable resource discovered on one class's detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    /// Absolute URL, fragment removed.
    pub source_url: String,
    /// Visible label of the element the reference came from.
    pub link_text: String,
}

/// Finite set of document kinds the pipeline distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MimeKind {
    /// The canonical, mergeable format (PDF).
    Canonical,
    /// Slide decks (pptx, ppt).
    Presentation,
    /// Word-processor documents (docx, doc).
    WordProcessor,
    /// Spreadsheets (xlsx, xls).
    Spreadsheet,
    /// Anything else, kept as downloaded.
    Unknown,
}

impl MimeKind {
    /// Map a file extension (without the dot, any case) to a kind.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Self::Canonical,
            "pptx" | "ppt" => Self::Presentation,
            "docx" | "doc" => Self::WordProcessor,
            "xlsx" | "xls" => Self::Spreadsheet,
            _ => Self::Unknown,
        }
    }

    pub fn is_canonical(self) -> bool {
        self == Self::Canonical
    }
}

/// Extension of the canonical format.
pub const CANONICAL_EXTENSION: &str = "pdf";

/// A successfully retrieved, non-empty document on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDocument {
    /// Where the document lives.
    pub path: PathBuf,
    /// Size on disk; always greater than zero.
    pub size_bytes: u64,
    /// Kind after any conversion.
    pub mime_kind: MimeKind,
    /// Reference the document was downloaded from.
    pub source: DocumentReference,
}

impl FetchedDocument {
    /// Build a document record. Zero-byte files are rejected with
    /// [`LecternError::EmptyArtifact`].
    pub fn new(
        path: PathBuf,
        size_bytes: u64,
        mime_kind: MimeKind,
        source: DocumentReference,
    ) -> Result<Self> {
        if size_bytes == 0 {
            return Err(LecternError::EmptyArtifact { path });
        }
        Ok(Self {
            path,
            size_bytes,
            mime_kind,
            source,
        })
    }

    /// File name component, lossily converted.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Extension without the dot, lower-cased.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Result status of one class job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassStatus {
    Success,
    Failed,
}

/// A discarded or failed item, kept for the run's failure ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    /// Human-readable scope, e.g. `unit 2 / class 04 "Sensors"`.
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub reason: String,
}

/// Everything one class job produced.
#[derive(Debug, Clone)]
pub struct ClassOutcome {
    /// 1-based position of the class within its unit.
    pub ordinal: usize,
    pub class_id: String,
    pub class_name: String,
    /// Surviving documents in reference order.
    pub files: Vec<FetchedDocument>,
    pub status: ClassStatus,
    /// Items discarded along the way.
    pub failures: Vec<FailureRecord>,
}

impl ClassOutcome {
    /// Build an outcome; the status is derived from whether any file survived.
    pub fn new(
        ordinal: usize,
        class: &CatalogEntry,
        files: Vec<FetchedDocument>,
        failures: Vec<FailureRecord>,
    ) -> Self {
        let status = if files.is_empty() {
            ClassStatus::Failed
        } else {
            ClassStatus::Success
        };
        Self {
            ordinal,
            class_id: class.id.clone(),
            class_name: class.display_name.clone(),
            files,
            status,
            failures,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ClassStatus::Success
    }
}

/// Aggregated result of one unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    /// 1-based position of the unit within the course.
    pub unit_number: usize,
    pub unit_id: String,
    pub unit_name: String,
    /// Unit directory name relative to the course directory.
    pub unit_directory: String,
    /// Ordered by class ordinal.
    pub class_outcomes: Vec<ClassOutcome>,
    /// Set only when the unit merge produced an artifact.
    pub merged_artifact_path: Option<PathBuf>,
}

impl UnitOutcome {
    /// Number of documents fetched across the unit's classes.
    pub fn total_files(&self) -> usize {
        self.class_outcomes.iter().map(|c| c.files.len()).sum()
    }

    /// Number of classes that produced nothing.
    pub fn failed_files(&self) -> usize {
        self.class_outcomes.iter().filter(|c| !c.is_success()).count()
    }

    /// Canonical documents in class-ordinal order.
    pub fn canonical_documents(&self) -> Vec<&FetchedDocument> {
        self.class_outcomes
            .iter()
            .flat_map(|c| c.files.iter())
            .filter(|f| f.mime_kind.is_canonical())
            .collect()
    }
}
