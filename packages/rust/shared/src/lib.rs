//! Shared types, error model, and configuration for Lectern.
//!
//! This crate is the foundation depended on by all other Lectern crates.
//! It provides:
//! - [`LecternError`]: the unified error type
//! - Domain types ([`CatalogEntry`], [`FetchedDocument`], [`ClassOutcome`], [`UnitOutcome`])
//! - Persisted shapes ([`CourseRunManifest`], [`CourseIndex`])
//! - Configuration ([`AppConfig`] and the runtime configs derived from it)
//! - Deterministic output naming ([`naming`])

pub mod config;
pub mod error;
pub mod manifest;
pub mod naming;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ConvertConfig, ConvertSection, FetchConfig, FetchSection, OutputSection,
    PortalConfig, PortalSection, config_dir, config_file_path, credentials_from_env, init_config,
    load_config, load_config_from, resolve_output_root,
};
pub use error::{LecternError, Result};
pub use manifest::{
    CourseIndex, CourseRunManifest, FAILURE_LOG_FILE_NAME, INDEX_FILE_NAME, MANIFEST_FILE_NAME,
    ManifestClass, ManifestFile, ManifestUnit,
};
pub use naming::{
    class_file_stem, course_dir_name, course_merge_name, course_prefix, hyphenate, safe_file_stem,
    unit_dir_name, unit_merge_name,
};
pub use types::{
    CANONICAL_EXTENSION, CatalogEntry, CatalogLevel, ClassOutcome, ClassStatus,
    DocumentReference, FailureRecord, FetchedDocument, MimeKind, UnitOutcome,
};
