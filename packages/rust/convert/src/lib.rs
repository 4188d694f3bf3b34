//! Best-effort conversion of downloaded documents to the canonical format.
//!
//! Conversion goes through an ordered list of [`ConverterBackend`]s. The
//! first backend that leaves a non-empty canonical file next to the input
//! wins. A corrupt-container diagnostic from the first backend triggers one
//! [`ArchiveRepair`] pass and one retry of that same backend. When nothing
//! succeeds the original file is left untouched and the caller gets
//! [`ConversionOutcome::Unchanged`].

mod backends;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use lectern_shared::{CANONICAL_EXTENSION, ConvertConfig, LecternError, Result};

pub use backends::{OfficeBackend, ZipRepair, find_executable};

/// Diagnostic fragments that mark an input as a damaged container.
const CORRUPT_MARKERS: &[&str] = &[
    "corrupt",
    "could not be loaded",
    "bad zip",
    "not a zip file",
    "zip file",
    "end-of-central-directory",
    "general input/output error",
];

// ---------------------------------------------------------------------------
// Capabilities
// ---------------------------------------------------------------------------

/// An external tool able to turn one document into the canonical format.
#[async_trait]
pub trait ConverterBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Whether the backend can be invoked at all on this machine.
    fn is_available(&self) -> bool;

    /// Convert `input`, leaving the result at `output`.
    ///
    /// Failures are [`LecternError::Conversion`] carrying the tool's diagnostic output.
    async fn convert(&self, input: &Path, output: &Path) -> Result<()>;
}

/// An external tool able to rebuild a damaged archive container.
#[async_trait]
pub trait ArchiveRepair: Send + Sync {
    fn name(&self) -> &str;

    /// Write a repaired copy of `input` to `repaired`.
    async fn repair(&self, input: &Path, repaired: &Path) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DocumentConverter
// ---------------------------------------------------------------------------

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    /// The input was already canonical; nothing was done.
    AlreadyCanonical,
    /// A canonical copy now exists at this path.
    Converted(PathBuf),
    /// No backend produced output; the original is kept as-is.
    Unchanged { reason: String },
}

/// Runs the backend chain with a per-invocation timeout.
#[derive(Clone)]
pub struct DocumentConverter {
    backends: Vec<Arc<dyn ConverterBackend>>,
    repair: Option<Arc<dyn ArchiveRepair>>,
    timeout: Duration,
}

impl std::fmt::Debug for DocumentConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentConverter")
            .field(
                "backends",
                &self.backends.iter().map(|b| b.name()).collect::<Vec<_>>(),
            )
            .field("repair", &self.repair.as_ref().map(|r| r.name()))
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl DocumentConverter {
    pub fn new(
        backends: Vec<Arc<dyn ConverterBackend>>,
        repair: Option<Arc<dyn ArchiveRepair>>,
        timeout: Duration,
    ) -> Self {
        Self {
            backends,
            repair,
            timeout,
        }
    }

    /// Build the chain from config: one [`OfficeBackend`] per distinct
    /// installed binary, plus [`ZipRepair`] if its tool is installed.
    pub fn from_config(config: &ConvertConfig) -> Self {
        let mut seen: Vec<PathBuf> = Vec::new();
        let mut backends: Vec<Arc<dyn ConverterBackend>> = Vec::new();

        for candidate in &config.office_binaries {
            if let Some(backend) = OfficeBackend::locate(candidate) {
                if seen.contains(&backend.binary().to_path_buf()) {
                    continue;
                }
                seen.push(backend.binary().to_path_buf());
                backends.push(Arc::new(backend));
            }
        }

        let repair = ZipRepair::locate(&config.repair_binary)
            .map(|r| Arc::new(r) as Arc<dyn ArchiveRepair>);

        if backends.is_empty() {
            warn!("no office converter found; non-canonical documents will be kept as downloaded");
        } else {
            debug!(count = backends.len(), "converter backends available");
        }

        Self::new(backends, repair, config.timeout)
    }

    /// Canonical path a conversion of `input` lands on.
    pub fn target_path(input: &Path) -> PathBuf {
        input.with_extension(CANONICAL_EXTENSION)
    }

    /// Convert one document if it is not canonical already.
    #[instrument(skip_all, fields(path = %input.display()))]
    pub async fn convert(&self, input: &Path) -> ConversionOutcome {
        if is_canonical_path(input) {
            return ConversionOutcome::AlreadyCanonical;
        }
        if !input.exists() {
            return ConversionOutcome::Unchanged {
                reason: format!("{} does not exist", input.display()),
            };
        }

        let output = Self::target_path(input);
        // A stale result from an earlier run must not pass for fresh output.
        let _ = tokio::fs::remove_file(&output).await;

        let mut last_reason = String::from("no converter backend available");
        let mut first_attempt = true;

        for backend in self.backends.iter().filter(|b| b.is_available()) {
            let repairable = std::mem::replace(&mut first_attempt, false);

            match self.attempt(backend.as_ref(), input, &output).await {
                Ok(()) => return self.converted(backend.as_ref(), output),
                Err(e) => {
                    let diagnostic = e.to_string();
                    debug!(backend = backend.name(), error = %diagnostic, "conversion attempt failed");

                    if repairable && looks_corrupt(&diagnostic) && self.repair_in_place(input).await
                    {
                        match self.attempt(backend.as_ref(), input, &output).await {
                            Ok(()) => return self.converted(backend.as_ref(), output),
                            Err(e) => last_reason = e.to_string(),
                        }
                    } else {
                        last_reason = diagnostic;
                    }
                }
            }
        }

        warn!(reason = %last_reason, "could not convert; keeping original format");
        ConversionOutcome::Unchanged {
            reason: last_reason,
        }
    }

    fn converted(&self, backend: &dyn ConverterBackend, output: PathBuf) -> ConversionOutcome {
        info!(backend = backend.name(), output = %output.display(), "converted");
        ConversionOutcome::Converted(output)
    }

    /// One bounded backend call; success requires a non-empty output file.
    async fn attempt(
        &self,
        backend: &dyn ConverterBackend,
        input: &Path,
        output: &Path,
    ) -> Result<()> {
        match tokio::time::timeout(self.timeout, backend.convert(input, output)).await {
            Err(_) => {
                let _ = tokio::fs::remove_file(output).await;
                Err(LecternError::Conversion(format!(
                    "{} timed out after {}s",
                    backend.name(),
                    self.timeout.as_secs_f32()
                )))
            }
            Ok(Err(e)) => {
                let _ = tokio::fs::remove_file(output).await;
                Err(e)
            }
            Ok(Ok(())) => match tokio::fs::metadata(output).await {
                Ok(meta) if meta.len() > 0 => Ok(()),
                Ok(_) => {
                    let _ = tokio::fs::remove_file(output).await;
                    Err(LecternError::EmptyArtifact {
                        path: output.to_path_buf(),
                    })
                }
                Err(_) => Err(LecternError::Conversion(format!(
                    "{} reported success but wrote no output",
                    backend.name()
                ))),
            },
        }
    }

    /// Repair `input` into a sibling file and move it over the original.
    /// Returns whether a usable repaired copy replaced the input.
    async fn repair_in_place(&self, input: &Path) -> bool {
        let Some(repair) = &self.repair else {
            debug!("input looks corrupt but no repair tool is available");
            return false;
        };

        let repaired = repaired_path(input);
        info!(tool = repair.name(), "attempting archive repair");

        let result = match tokio::time::timeout(self.timeout, repair.repair(input, &repaired)).await
        {
            Ok(r) => r,
            Err(_) => Err(LecternError::Conversion(format!(
                "{} timed out",
                repair.name()
            ))),
        };

        let usable = matches!(tokio::fs::metadata(&repaired).await, Ok(m) if m.len() > 0);
        match result {
            Ok(()) if usable => match tokio::fs::rename(&repaired, input).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "could not replace input with repaired copy");
                    let _ = tokio::fs::remove_file(&repaired).await;
                    false
                }
            },
            Ok(()) => {
                warn!("repair produced no output");
                let _ = tokio::fs::remove_file(&repaired).await;
                false
            }
            Err(e) => {
                warn!(error = %e, "archive repair failed");
                let _ = tokio::fs::remove_file(&repaired).await;
                false
            }
        }
    }
}

/// Whether a diagnostic describes an unreadable or damaged container.
pub fn looks_corrupt(diagnostic: &str) -> bool {
    let lower = diagnostic.to_ascii_lowercase();
    CORRUPT_MARKERS.iter().any(|m| lower.contains(m))
}

fn is_canonical_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(CANONICAL_EXTENSION))
}

/// `dir/name.ext` → `dir/name.repaired.ext`.
fn repaired_path(input: &Path) -> PathBuf {
    let ext = input
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    input.with_extension(format!("repaired.{ext}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    const BROKEN: &[u8] = b"PK broken";
    const FIXED: &[u8] = b"PK repaired";

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("lectern-convert-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    enum Behavior {
        Succeed,
        SucceedEmpty,
        Fail(&'static str),
        /// Fails with the diagnostic until the input has been repaired.
        FailUntilRepaired(&'static str),
        Hang,
    }

    struct FakeBackend {
        name: &'static str,
        available: bool,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl FakeBackend {
        fn new(name: &'static str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: true,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }

        fn unavailable(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                available: false,
                behavior: Behavior::Succeed,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConverterBackend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn is_available(&self) -> bool {
            self.available
        }

        async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.behavior {
                Behavior::Succeed => {
                    std::fs::write(output, b"%PDF-1.4 converted").unwrap();
                    Ok(())
                }
                Behavior::SucceedEmpty => {
                    std::fs::write(output, b"").unwrap();
                    Ok(())
                }
                Behavior::Fail(diag) => Err(LecternError::Conversion((*diag).into())),
                Behavior::FailUntilRepaired(diag) => {
                    if std::fs::read(input).unwrap() == FIXED {
                        std::fs::write(output, b"%PDF-1.4 converted").unwrap();
                        Ok(())
                    } else {
                        Err(LecternError::Conversion((*diag).into()))
                    }
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }
    }

    #[derive(Default)]
    struct FakeRepair {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ArchiveRepair for FakeRepair {
        fn name(&self) -> &str {
            "fake-zip"
        }

        async fn repair(&self, _input: &Path, repaired: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(repaired, FIXED).unwrap();
            Ok(())
        }
    }

    fn dyn_backend(backend: &Arc<FakeBackend>) -> Arc<dyn ConverterBackend> {
        backend.clone()
    }

    fn dyn_repair(repair: &Arc<FakeRepair>) -> Option<Arc<dyn ArchiveRepair>> {
        Some(repair.clone())
    }

    fn converter(
        backends: Vec<Arc<dyn ConverterBackend>>,
        repair: Option<Arc<dyn ArchiveRepair>>,
    ) -> DocumentConverter {
        DocumentConverter::new(backends, repair, Duration::from_secs(5))
    }

    fn write_input(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, BROKEN).unwrap();
        path
    }

    #[tokio::test]
    async fn canonical_input_is_left_alone() {
        let backend = FakeBackend::new("office", Behavior::Succeed);
        let conv = converter(vec![dyn_backend(&backend)], None);

        let outcome = conv.convert(Path::new("/nowhere/01_Intro.PDF")).await;
        assert_eq!(outcome, ConversionOutcome::AlreadyCanonical);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn falls_through_to_next_available_backend() {
        let dir = temp_dir();
        let input = write_input(&dir, "01_Intro.pptx");

        let missing = FakeBackend::unavailable("missing");
        let failing = FakeBackend::new("failing", Behavior::Fail("unsupported filter"));
        let working = FakeBackend::new("working", Behavior::Succeed);
        let conv = converter(
            vec![dyn_backend(&missing), dyn_backend(&failing), dyn_backend(&working)],
            None,
        );

        let outcome = conv.convert(&input).await;
        assert_eq!(outcome, ConversionOutcome::Converted(dir.join("01_Intro.pdf")));
        assert_eq!(missing.calls(), 0);
        assert_eq!(failing.calls(), 1);
        assert_eq!(working.calls(), 1);
        assert!(input.exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn corrupt_container_is_repaired_once_then_retried() {
        let dir = temp_dir();
        let input = write_input(&dir, "02_Sensors.pptx");

        let office = FakeBackend::new(
            "office",
            Behavior::FailUntilRepaired("Error: source file could not be loaded"),
        );
        let repair = Arc::new(FakeRepair::default());
        let conv = converter(vec![dyn_backend(&office)], dyn_repair(&repair));

        let outcome = conv.convert(&input).await;
        assert_eq!(outcome, ConversionOutcome::Converted(dir.join("02_Sensors.pdf")));
        assert_eq!(office.calls(), 2);
        assert_eq!(repair.calls.load(Ordering::SeqCst), 1);
        assert_eq!(std::fs::read(&input).unwrap(), FIXED);
        assert!(!dir.join("02_Sensors.repaired.pptx").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn plain_failure_does_not_trigger_repair() {
        let dir = temp_dir();
        let input = write_input(&dir, "03_Labs.docx");

        let office = FakeBackend::new("office", Behavior::Fail("unknown filter"));
        let repair = Arc::new(FakeRepair::default());
        let conv = converter(vec![dyn_backend(&office)], dyn_repair(&repair));

        let outcome = conv.convert(&input).await;
        assert!(matches!(outcome, ConversionOutcome::Unchanged { .. }));
        assert_eq!(office.calls(), 1);
        assert_eq!(repair.calls.load(Ordering::SeqCst), 0);
        assert_eq!(std::fs::read(&input).unwrap(), BROKEN);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn no_backends_keeps_original() {
        let dir = temp_dir();
        let input = write_input(&dir, "04_Data.xlsx");

        let conv = converter(vec![dyn_backend(&FakeBackend::unavailable("missing"))], None);
        match conv.convert(&input).await {
            ConversionOutcome::Unchanged { reason } => {
                assert!(reason.contains("no converter backend"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(std::fs::read(&input).unwrap(), BROKEN);
        assert!(!dir.join("04_Data.pdf").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn timeout_counts_as_failure() {
        let dir = temp_dir();
        let input = write_input(&dir, "05_Slow.pptx");

        let slow = FakeBackend::new("slow", Behavior::Hang);
        let working = FakeBackend::new("working", Behavior::Succeed);
        let conv = DocumentConverter::new(
            vec![dyn_backend(&slow), dyn_backend(&working)],
            None,
            Duration::from_millis(50),
        );

        let outcome = conv.convert(&input).await;
        assert_eq!(outcome, ConversionOutcome::Converted(dir.join("05_Slow.pdf")));
        assert_eq!(slow.calls(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_output_is_discarded() {
        let dir = temp_dir();
        let input = write_input(&dir, "06_Empty.ppt");

        let conv = converter(
            vec![dyn_backend(&FakeBackend::new("office", Behavior::SucceedEmpty))],
            None,
        );
        let outcome = conv.convert(&input).await;
        assert!(matches!(outcome, ConversionOutcome::Unchanged { .. }));
        assert!(!dir.join("06_Empty.pdf").exists());

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn corrupt_markers() {
        assert!(looks_corrupt("Error: source file could not be loaded"));
        assert!(looks_corrupt("zip error: End-of-central-directory signature not found"));
        assert!(!looks_corrupt("unknown output filter"));
    }

    #[test]
    fn repaired_sibling_name() {
        assert_eq!(
            repaired_path(Path::new("/d/01_A.pptx")),
            PathBuf::from("/d/01_A.repaired.pptx")
        );
    }
}
