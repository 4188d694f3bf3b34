//! Course-run orchestration for Lectern.
//!
//! Ties the catalog, fetch, and conversion crates together into a single
//! course run, then merges the results and persists the run's manifest.

pub mod assembler;
pub mod pipeline;
pub mod summary;

pub use assembler::{merge_course, merge_documents, merge_unit};
pub use pipeline::{CoursePipeline, CourseRunConfig, CourseRunResult, ProgressReporter, SilentProgress};
pub use summary::{RunSummaryStore, load_manifest, refresh_index};
