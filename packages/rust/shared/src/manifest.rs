//! Persisted JSON shapes: the per-course run manifest and the root discovery index.
//!
//! Field names are camelCase because the files are consumed by external tooling.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CatalogEntry, ClassStatus, UnitOutcome};

/// File name of the manifest inside a course directory.
pub const MANIFEST_FILE_NAME: &str = "course_summary.json";

/// File name of the failure ledger inside a course directory.
pub const FAILURE_LOG_FILE_NAME: &str = "failures.log";

/// File name of the discovery index inside the output root.
pub const INDEX_FILE_NAME: &str = "index.json";

// ---------------------------------------------------------------------------
// CourseRunManifest
// ---------------------------------------------------------------------------

/// The authoritative record of one complete pipeline run for one course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseRunManifest {
    pub course_id: String,
    pub course_name: String,
    /// When the run finished; the only field that differs between identical runs.
    pub timestamp: DateTime<Utc>,
    pub units: Vec<ManifestUnit>,
    pub total_downloaded: usize,
    pub total_failed: usize,
    /// Course-wide merge, relative to the course directory.
    pub combined_artifact: Option<String>,
    /// Failure ledger, relative to the course directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_log: Option<String>,
}

/// One unit's entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestUnit {
    pub unit_number: usize,
    pub unit_id: String,
    pub unit_name: String,
    pub unit_directory: String,
    pub classes: Vec<ManifestClass>,
    pub total_files: usize,
    pub failed_files: usize,
    /// Unit merge, relative to the unit directory.
    pub merged_artifact: Option<String>,
}

/// One class's entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestClass {
    pub class_number: usize,
    pub class_id: String,
    pub class_name: String,
    pub files: Vec<ManifestFile>,
    pub status: ClassStatus,
}

/// One fetched file's entry in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestFile {
    /// File name relative to the unit directory.
    pub filename: String,
    pub size: u64,
    /// Extension without the dot.
    #[serde(rename = "type")]
    pub file_type: String,
}

impl CourseRunManifest {
    /// Project finished unit outcomes into the persisted shape.
    pub fn build(
        course: &CatalogEntry,
        units: &[UnitOutcome],
        combined_artifact: Option<&Path>,
        failure_log: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let units: Vec<ManifestUnit> = units.iter().map(ManifestUnit::from).collect();
        let total_downloaded = units.iter().map(|u| u.total_files).sum();
        let total_failed = units.iter().map(|u| u.failed_files).sum();

        Self {
            course_id: course.id.clone(),
            course_name: course.display_name.clone(),
            timestamp,
            units,
            total_downloaded,
            total_failed,
            combined_artifact: combined_artifact.and_then(file_name_of),
            failure_log: failure_log.map(str::to_string),
        }
    }
}

impl From<&UnitOutcome> for ManifestUnit {
    fn from(unit: &UnitOutcome) -> Self {
        let classes = unit
            .class_outcomes
            .iter()
            .map(|c| ManifestClass {
                class_number: c.ordinal,
                class_id: c.class_id.clone(),
                class_name: c.class_name.clone(),
                files: c
                    .files
                    .iter()
                    .map(|f| ManifestFile {
                        filename: f.file_name(),
                        size: f.size_bytes,
                        file_type: f.extension(),
                    })
                    .collect(),
                status: c.status,
            })
            .collect();

        Self {
            unit_number: unit.unit_number,
            unit_id: unit.unit_id.clone(),
            unit_name: unit.unit_name.clone(),
            unit_directory: unit.unit_directory.clone(),
            classes,
            total_files: unit.total_files(),
            failed_files: unit.failed_files(),
            merged_artifact: unit.merged_artifact_path.as_deref().and_then(file_name_of),
        }
    }
}

fn file_name_of(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}

// ---------------------------------------------------------------------------
// CourseIndex
// ---------------------------------------------------------------------------

/// Root-level listing of course directories that hold a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseIndex {
    /// Course directory names, sorted.
    pub courses: Vec<String>,
    pub updated_at: DateTime<Utc>,
}
