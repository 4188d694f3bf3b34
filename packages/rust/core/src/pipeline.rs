//! End-to-end course run: units → classes → fetch → unit merge → course merge → manifest.

use std::future::Future;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tracing::{info, instrument, warn};

use lectern_catalog::{CatalogResolver, Portal};
use lectern_convert::DocumentConverter;
use lectern_fetch::{ClassFetchJob, ClassTarget, FetchOrchestrator, FetchProgress};
use lectern_shared::{
    CatalogEntry, ClassOutcome, CourseRunManifest, FailureRecord, FetchConfig, LecternError,
    Result, UnitOutcome, course_dir_name, course_merge_name, course_prefix, unit_dir_name,
    unit_merge_name,
};

use crate::assembler;
use crate::summary::{self, RunSummaryStore};

/// Base delay between catalog retries; multiplied by the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Configuration for one course run.
#[derive(Debug, Clone)]
pub struct CourseRunConfig {
    /// Root under which the course directory is created.
    pub output_root: PathBuf,
    pub fetch: FetchConfig,
}

/// Result of a completed course run.
#[derive(Debug)]
pub struct CourseRunResult {
    pub course_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub manifest: CourseRunManifest,
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called before a unit's classes are fetched.
    fn unit_started(&self, unit_number: usize, total_units: usize, name: &str, classes: usize);
    /// Called as each class finishes, in completion order.
    fn class_finished(&self, outcome: &ClassOutcome, finished: usize, total: usize);
    /// Called after a unit has been fetched and merged.
    fn unit_finished(&self, unit: &UnitOutcome);
    /// Called when the pipeline completes.
    fn done(&self, result: &CourseRunResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn unit_started(&self, _unit_number: usize, _total_units: usize, _name: &str, _classes: usize) {}
    fn class_finished(&self, _outcome: &ClassOutcome, _finished: usize, _total: usize) {}
    fn unit_finished(&self, _unit: &UnitOutcome) {}
    fn done(&self, _result: &CourseRunResult) {}
}

/// Forwards orchestrator completions to a [`ProgressReporter`].
struct ClassProgress<'a>(&'a dyn ProgressReporter);

impl FetchProgress for ClassProgress<'_> {
    fn class_finished(&self, outcome: &ClassOutcome, finished: usize, total: usize) {
        self.0.class_finished(outcome, finished, total);
    }
}

/// Drives a whole course through the catalog, fetch, and merge stages.
#[derive(Debug, Clone)]
pub struct CoursePipeline {
    resolver: CatalogResolver,
    orchestrator: FetchOrchestrator,
    config: CourseRunConfig,
}

impl CoursePipeline {
    pub fn new(portal: Portal, converter: DocumentConverter, config: CourseRunConfig) -> Self {
        let job = ClassFetchJob::new(portal.clone(), converter, config.fetch.rate_limit);
        Self {
            resolver: CatalogResolver::new(portal),
            orchestrator: FetchOrchestrator::new(job, config.fetch.concurrency),
            config,
        }
    }

    pub fn resolver(&self) -> &CatalogResolver {
        &self.resolver
    }

    /// Run the full pipeline for one course.
    ///
    /// 1. List units (failure aborts the run, no manifest is written)
    /// 2. Per unit, sequentially: list classes, fetch them concurrently, merge
    /// 3. Merge the unit artifacts into the course artifact
    /// 4. Persist the manifest and failure ledger, refresh the index
    #[instrument(skip_all, fields(course_id = %course.id, course = %course.display_name))]
    pub async fn run(
        &self,
        course: &CatalogEntry,
        progress: &dyn ProgressReporter,
    ) -> Result<CourseRunResult> {
        let start = Instant::now();
        let retries = self.config.fetch.catalog_retries;
        let course_dir = self.config.output_root.join(course_dir_name(course));
        let prefix = course_prefix(course);

        info!(dir = %course_dir.display(), "starting course run");

        // --- Phase 1: Units ---
        progress.phase("Listing units");
        let units = with_retries(retries, "list units", || {
            self.resolver.list_units(&course.id)
        })
        .await?;

        std::fs::create_dir_all(&course_dir).map_err(|e| LecternError::io(&course_dir, e))?;
        let mut store = RunSummaryStore::new(course.clone(), &course_dir);

        // --- Phase 2: Units, one at a time ---
        progress.phase("Fetching units");
        let total_units = units.len();
        for (index, unit) in units.iter().enumerate() {
            let unit_number = index + 1;
            let outcome = self
                .run_unit(course, unit, unit_number, total_units, &prefix, &mut store, progress)
                .await;
            progress.unit_finished(&outcome);
            store.record_unit(outcome);
        }

        // --- Phase 3: Course merge ---
        progress.phase("Merging course");
        let course_output = course_dir.join(course_merge_name(&prefix));
        let combined = match assembler::merge_course(store.units(), &course_output) {
            Ok(path) => path,
            Err(e) => {
                store.record_failure(FailureRecord {
                    scope: "course merge".into(),
                    class_id: None,
                    url: None,
                    reason: e.to_string(),
                });
                None
            }
        };

        // --- Phase 4: Manifest + index ---
        progress.phase("Writing manifest");
        let manifest = store.persist(combined.as_deref())?;
        if let Err(e) = summary::refresh_index(&self.config.output_root) {
            warn!(error = %e, "failed to refresh course index");
        }

        let result = CourseRunResult {
            manifest_path: store.manifest_path(),
            course_dir,
            manifest,
            elapsed: start.elapsed(),
        };

        info!(
            downloaded = result.manifest.total_downloaded,
            failed = result.manifest.total_failed,
            elapsed_ms = result.elapsed.as_millis(),
            "course run complete"
        );

        progress.done(&result);
        Ok(result)
    }

    /// Fetch and merge one unit. Listing and merge failures are recorded on
    /// the store; the unit still yields an outcome.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip_all, fields(unit = unit_number, unit_id = %unit.id))]
    async fn run_unit(
        &self,
        course: &CatalogEntry,
        unit: &CatalogEntry,
        unit_number: usize,
        total_units: usize,
        prefix: &str,
        store: &mut RunSummaryStore,
        progress: &dyn ProgressReporter,
    ) -> UnitOutcome {
        let unit_directory = unit_dir_name(unit_number, unit);
        let unit_dir = store.course_dir().join(&unit_directory);
        let scope = format!("unit {unit_number} \"{}\"", unit.display_name);

        let mut outcome = UnitOutcome {
            unit_number,
            unit_id: unit.id.clone(),
            unit_name: unit.display_name.clone(),
            unit_directory,
            class_outcomes: Vec::new(),
            merged_artifact_path: None,
        };

        let classes = match with_retries(
            self.config.fetch.catalog_retries,
            "list classes",
            || self.resolver.list_classes(&unit.id),
        )
        .await
        {
            Ok(classes) => classes,
            Err(e) => {
                store.record_failure(FailureRecord {
                    scope,
                    class_id: None,
                    url: None,
                    reason: format!("class listing failed: {e}"),
                });
                progress.unit_started(unit_number, total_units, &unit.display_name, 0);
                return outcome;
            }
        };

        if let Err(e) = std::fs::create_dir_all(&unit_dir) {
            store.record_failure(FailureRecord {
                scope,
                class_id: None,
                url: None,
                reason: LecternError::io(&unit_dir, e).to_string(),
            });
            return outcome;
        }

        progress.unit_started(unit_number, total_units, &unit.display_name, classes.len());

        let targets: Vec<ClassTarget> = classes
            .into_iter()
            .enumerate()
            .map(|(i, class)| ClassTarget {
                subject_id: course.id.clone(),
                unit_number,
                ordinal: i + 1,
                class,
                unit_dir: unit_dir.clone(),
            })
            .collect();

        outcome.class_outcomes = self
            .orchestrator
            .run_unit(targets, &ClassProgress(progress))
            .await;

        let merge_output = unit_dir.join(unit_merge_name(prefix, unit_number));
        match assembler::merge_unit(&outcome.class_outcomes, &merge_output) {
            Ok(merged) => outcome.merged_artifact_path = merged,
            Err(e) => store.record_failure(FailureRecord {
                scope: format!("{scope} merge"),
                class_id: None,
                url: None,
                reason: e.to_string(),
            }),
        }

        info!(
            files = outcome.total_files(),
            failed = outcome.failed_files(),
            merged = outcome.merged_artifact_path.is_some(),
            "unit complete"
        );
        outcome
    }
}

/// Retry `op` on retryable errors, up to `retries` extra attempts.
async fn with_retries<T, F, Fut>(retries: u32, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e) if e.is_retryable() && attempt < retries => {
                attempt += 1;
                warn!(what, attempt, error = %e, "retrying");
                tokio::time::sleep(RETRY_BACKOFF * attempt).await;
            }
            other => return other,
        }
    }
}
