//! Per-class document acquisition.
//!
//! - [`classify`] infers a document's kind from headers and leading bytes.
//! - [`LinkExtractor`] turns a class detail fragment into document references.
//! - [`ClassFetchJob`] downloads, converts, and validates one class's documents.
//! - [`FetchOrchestrator`] runs a unit's jobs under a worker limit.

mod classifier;
mod job;
mod links;
mod orchestrator;

pub use classifier::{Classification, SNIFF_LEN, classify, disposition_extension};
pub use job::{ClassFetchJob, ClassTarget};
pub use links::{DEFAULT_LINK_TEXT, LinkExtractor};
pub use orchestrator::{FetchOrchestrator, FetchProgress, NoProgress};
