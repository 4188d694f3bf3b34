//! Subprocess-backed capabilities: an office suite in headless mode and `zip -FF`.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use lectern_shared::{CANONICAL_EXTENSION, LecternError, Result};

use crate::{ArchiveRepair, ConverterBackend};

/// Locate an executable: a candidate containing a path separator must exist
/// as given, anything else is searched for on `PATH`.
pub fn find_executable(candidate: &str) -> Option<PathBuf> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }

    let direct = Path::new(candidate);
    if direct.components().count() > 1 {
        return direct.is_file().then(|| direct.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(candidate))
        .find(|p| p.is_file())
}

/// Combined stderr and stdout, trimmed, for error diagnostics.
fn diagnostic(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    format!("{} {}", stderr.trim(), stdout.trim()).trim().to_string()
}

// ---------------------------------------------------------------------------
// OfficeBackend
// ---------------------------------------------------------------------------

/// `soffice --headless --convert-to pdf --outdir <dir> <input>`.
#[derive(Debug, Clone)]
pub struct OfficeBackend {
    binary: PathBuf,
    name: String,
}

impl OfficeBackend {
    pub fn new(binary: PathBuf) -> Self {
        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "office".into());
        Self { binary, name }
    }

    /// Backend for `candidate` if it is installed.
    pub fn locate(candidate: &str) -> Option<Self> {
        find_executable(candidate).map(Self::new)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }
}

#[async_trait]
impl ConverterBackend for OfficeBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_available(&self) -> bool {
        self.binary.is_file()
    }

    async fn convert(&self, input: &Path, output: &Path) -> Result<()> {
        let outdir = output
            .parent()
            .ok_or_else(|| LecternError::Conversion(format!("{} has no parent", output.display())))?;

        debug!(binary = %self.binary.display(), input = %input.display(), "invoking office converter");
        let result = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg(CANONICAL_EXTENSION)
            .arg("--outdir")
            .arg(outdir)
            .arg(input)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| LecternError::Conversion(format!("{}: {e}", self.name)))?;

        // The office suite names its output after the input stem.
        let produced = outdir.join(
            Path::new(input.file_name().unwrap_or_default()).with_extension(CANONICAL_EXTENSION),
        );

        if !result.status.success() || !produced.exists() {
            return Err(LecternError::Conversion(format!(
                "{} exited with {}: {}",
                self.name,
                result.status,
                diagnostic(&result)
            )));
        }

        if produced != output {
            tokio::fs::rename(&produced, output)
                .await
                .map_err(|e| LecternError::io(output, e))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ZipRepair
// ---------------------------------------------------------------------------

/// `zip -FF <input> --out <repaired>`.
#[derive(Debug, Clone)]
pub struct ZipRepair {
    binary: PathBuf,
}

impl ZipRepair {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn locate(candidate: &str) -> Option<Self> {
        find_executable(candidate).map(Self::new)
    }
}

#[async_trait]
impl ArchiveRepair for ZipRepair {
    fn name(&self) -> &str {
        "zip"
    }

    async fn repair(&self, input: &Path, repaired: &Path) -> Result<()> {
        let mut child = Command::new(&self.binary)
            .arg("-FF")
            .arg(input)
            .arg("--out")
            .arg(repaired)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LecternError::Conversion(format!("zip: {e}")))?;

        // `-FF` may ask whether the archive is single-disk.
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"y\n").await;
        }

        let result = child
            .wait_with_output()
            .await
            .map_err(|e| LecternError::Conversion(format!("zip: {e}")))?;
        if !result.status.success() {
            return Err(LecternError::Conversion(format!(
                "zip -FF exited with {}: {}",
                result.status,
                diagnostic(&result)
            )));
        }
        Ok(())
    }
}
