//! Run bookkeeping: accumulate outcomes, persist the manifest and failure
//! ledger, and rebuild the discovery index over the output root.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use lectern_shared::{
    CatalogEntry, CourseIndex, CourseRunManifest, FAILURE_LOG_FILE_NAME, FailureRecord,
    INDEX_FILE_NAME, LecternError, MANIFEST_FILE_NAME, Result, UnitOutcome,
};

/// Collects one course run's outcomes and writes them out once at the end.
#[derive(Debug)]
pub struct RunSummaryStore {
    course: CatalogEntry,
    course_dir: PathBuf,
    units: Vec<UnitOutcome>,
    failures: Vec<FailureRecord>,
}

impl RunSummaryStore {
    pub fn new(course: CatalogEntry, course_dir: impl Into<PathBuf>) -> Self {
        Self {
            course,
            course_dir: course_dir.into(),
            units: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Record a finished unit; its class failures join the run's ledger.
    pub fn record_unit(&mut self, unit: UnitOutcome) {
        for class in &unit.class_outcomes {
            self.failures.extend(class.failures.iter().cloned());
        }
        self.units.push(unit);
    }

    /// Record a failure outside any class (listing, merge, filesystem).
    pub fn record_failure(&mut self, failure: FailureRecord) {
        warn!(scope = %failure.scope, reason = %failure.reason, "recorded failure");
        self.failures.push(failure);
    }

    pub fn units(&self) -> &[UnitOutcome] {
        &self.units
    }

    pub fn failures(&self) -> &[FailureRecord] {
        &self.failures
    }

    pub fn course_dir(&self) -> &Path {
        &self.course_dir
    }

    /// Path the manifest is written to.
    pub fn manifest_path(&self) -> PathBuf {
        self.course_dir.join(MANIFEST_FILE_NAME)
    }

    /// Write the failure ledger (or remove a stale one) and then the
    /// manifest, replacing whatever a previous run left behind.
    #[instrument(skip_all, fields(course_id = %self.course.id))]
    pub fn persist(&self, combined_artifact: Option<&Path>) -> Result<CourseRunManifest> {
        std::fs::create_dir_all(&self.course_dir)
            .map_err(|e| LecternError::io(&self.course_dir, e))?;

        let ledger = self.course_dir.join(FAILURE_LOG_FILE_NAME);
        let failure_log = if self.failures.is_empty() {
            if ledger.exists() {
                std::fs::remove_file(&ledger).map_err(|e| LecternError::io(&ledger, e))?;
            }
            None
        } else {
            write_failure_log(&ledger, &self.failures)?;
            Some(FAILURE_LOG_FILE_NAME)
        };

        let manifest = CourseRunManifest::build(
            &self.course,
            &self.units,
            combined_artifact,
            failure_log,
            Utc::now(),
        );
        write_json_atomic(&self.manifest_path(), &manifest)?;

        info!(
            downloaded = manifest.total_downloaded,
            failed = manifest.total_failed,
            path = %self.manifest_path().display(),
            "manifest written"
        );
        Ok(manifest)
    }
}

/// Read a persisted manifest.
pub fn load_manifest(path: &Path) -> Result<CourseRunManifest> {
    let content = std::fs::read_to_string(path).map_err(|e| LecternError::io(path, e))?;
    serde_json::from_str(&content)
        .map_err(|e| LecternError::validation(format!("invalid manifest {}: {e}", path.display())))
}

/// Rebuild `index.json` from the immediate subdirectories of `root` that
/// hold a manifest. Nothing else under `root` is touched.
#[instrument(skip_all, fields(root = %root.display()))]
pub fn refresh_index(root: &Path) -> Result<CourseIndex> {
    std::fs::create_dir_all(root).map_err(|e| LecternError::io(root, e))?;

    let mut courses = Vec::new();
    let entries = std::fs::read_dir(root).map_err(|e| LecternError::io(root, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| LecternError::io(root, e))?;
        let path = entry.path();
        if path.is_dir() && path.join(MANIFEST_FILE_NAME).is_file() {
            courses.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    courses.sort();

    let index = CourseIndex {
        courses,
        updated_at: Utc::now(),
    };
    write_json_atomic(&root.join(INDEX_FILE_NAME), &index)?;

    debug!(courses = index.courses.len(), "index refreshed");
    Ok(index)
}

/// Serialize as pretty JSON to a temp sibling, then rename over `path`.
fn write_json_atomic<T: serde::Serialize>(path: &Path, data: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| LecternError::validation(format!("JSON serialization failed: {e}")))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| LecternError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| LecternError::io(path, e))?;
    Ok(())
}

/// One JSON object per line.
fn write_failure_log(path: &Path, failures: &[FailureRecord]) -> Result<()> {
    let temp = path.with_file_name(format!(".{FAILURE_LOG_FILE_NAME}.tmp"));
    let mut file = std::fs::File::create(&temp).map_err(|e| LecternError::io(&temp, e))?;
    for failure in failures {
        let line = serde_json::to_string(failure)
            .map_err(|e| LecternError::validation(format!("JSON serialization failed: {e}")))?;
        writeln!(file, "{line}").map_err(|e| LecternError::io(&temp, e))?;
    }
    file.flush().map_err(|e| LecternError::io(&temp, e))?;
    drop(file);
    std::fs::rename(&temp, path).map_err(|e| LecternError::io(path, e))?;
    Ok(())
}
