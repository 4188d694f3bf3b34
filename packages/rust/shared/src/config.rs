//! Application configuration for Lectern.
//!
//! User config lives at `~/.lectern/lectern.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LecternError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "lectern.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".lectern";

/// Environment variable that overrides `[output] root_dir`.
pub const OUTPUT_DIR_ENV: &str = "LECTERN_OUTPUT_DIR";

// ---------------------------------------------------------------------------
// Config structs (matching lectern.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote portal settings.
    #[serde(default)]
    pub portal: PortalSection,

    /// Download settings.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Conversion backend settings.
    #[serde(default)]
    pub convert: ConvertSection,

    /// Output layout.
    #[serde(default)]
    pub output: OutputSection,
}

/// `[portal]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortalSection {
    /// API base URL; every endpoint is resolved under it.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_portal_timeout")]
    pub timeout_secs: u64,

    /// Name of the env var holding the username (never store the value itself).
    #[serde(default = "default_username_env")]
    pub username_env: String,

    /// Name of the env var holding the password.
    #[serde(default = "default_password_env")]
    pub password_env: String,
}

impl Default for PortalSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_portal_timeout(),
            username_env: default_username_env(),
            password_env: default_password_env(),
        }
    }
}

fn default_base_url() -> String {
    "https://www.pesuacademy.com/Academy".into()
}
fn default_portal_timeout() -> u64 {
    30
}
fn default_username_env() -> String {
    "LECTERN_USERNAME".into()
}
fn default_password_env() -> String {
    "LECTERN_PASSWORD".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Maximum class jobs running at once within a unit.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Minimum ms a job waits before each request it issues.
    #[serde(default)]
    pub rate_limit_ms: u64,

    /// Extra attempts for catalog lookups that fail with a transport error.
    #[serde(default = "default_catalog_retries")]
    pub catalog_retries: u32,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            rate_limit_ms: 0,
            catalog_retries: default_catalog_retries(),
        }
    }
}

fn default_concurrency() -> usize {
    5
}
fn default_catalog_retries() -> u32 {
    2
}

/// `[convert]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertSection {
    /// Wall-clock limit for each converter or repair invocation.
    #[serde(default = "default_convert_timeout")]
    pub timeout_secs: u64,

    /// Office converter executables, tried in order. Bare names are looked up on `PATH`.
    #[serde(default = "default_office_binaries")]
    pub office_binaries: Vec<String>,

    /// Archive repair executable (invoked as `<bin> -FF <in> --out <out>`).
    #[serde(default = "default_repair_binary")]
    pub repair_binary: String,
}

impl Default for ConvertSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_convert_timeout(),
            office_binaries: default_office_binaries(),
            repair_binary: default_repair_binary(),
        }
    }
}

fn default_convert_timeout() -> u64 {
    120
}
fn default_office_binaries() -> Vec<String> {
    vec![
        "/Applications/LibreOffice.app/Contents/MacOS/soffice".into(),
        "soffice".into(),
        "libreoffice".into(),
    ]
}
fn default_repair_binary() -> String {
    "zip".into()
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSection {
    /// Root directory holding one directory per course.
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
        }
    }
}

fn default_root_dir() -> String {
    "courses".into()
}

// ---------------------------------------------------------------------------
// Runtime configs (derived from AppConfig + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime portal configuration.
#[derive(Debug, Clone)]
pub struct PortalConfig {
    /// API base URL without a trailing slash.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl From<&AppConfig> for PortalConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            base_url: config.portal.base_url.trim_end_matches('/').to_string(),
            timeout: Duration::from_secs(config.portal.timeout_secs),
        }
    }
}

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Worker limit per unit.
    pub concurrency: usize,
    /// Delay before each request a job issues.
    pub rate_limit: Duration,
    /// Extra attempts for transport failures during catalog lookups.
    pub catalog_retries: u32,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.fetch.concurrency.max(1),
            rate_limit: Duration::from_millis(config.fetch.rate_limit_ms),
            catalog_retries: config.fetch.catalog_retries,
        }
    }
}

/// Runtime conversion configuration.
#[derive(Debug, Clone)]
pub struct ConvertConfig {
    /// Limit for each external invocation.
    pub timeout: Duration,
    /// Office converter candidates in preference order.
    pub office_binaries: Vec<String>,
    /// Archive repair executable.
    pub repair_binary: String,
}

impl From<&AppConfig> for ConvertConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.convert.timeout_secs),
            office_binaries: config.convert.office_binaries.clone(),
            repair_binary: config.convert.repair_binary.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.lectern/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| LecternError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.lectern/lectern.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| LecternError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| LecternError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| LecternError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| LecternError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| LecternError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Resolve the output root: explicit flag, then env override, then config.
pub fn resolve_output_root(config: &AppConfig, flag: Option<&str>) -> PathBuf {
    if let Some(dir) = flag {
        return PathBuf::from(dir);
    }
    match std::env::var(OUTPUT_DIR_ENV) {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(&config.output.root_dir),
    }
}

/// Read portal credentials from the env vars named in the config.
/// Returns `None` if either is missing or empty.
pub fn credentials_from_env(config: &AppConfig) -> Option<(String, String)> {
    let user = std::env::var(&config.portal.username_env).ok()?;
    let pass = std::env::var(&config.portal.password_env).ok()?;
    if user.is_empty() || pass.is_empty() {
        return None;
    }
    Some((user, pass))
}
