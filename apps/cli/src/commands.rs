//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, Write};
use std::path::Path;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use lectern_catalog::{CatalogResolver, Portal};
use lectern_convert::DocumentConverter;
use lectern_core::pipeline::{CoursePipeline, CourseRunConfig, CourseRunResult, ProgressReporter};
use lectern_core::refresh_index;
use lectern_shared::{
    AppConfig, CatalogEntry, ClassOutcome, ConvertConfig, FetchConfig, PortalConfig, UnitOutcome,
    credentials_from_env, init_config, load_config, resolve_output_root,
};
use tracing::{info, warn};

/// File the `courses` command writes into the output root.
const COURSES_FILE_NAME: &str = "courses.json";

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Lectern: fetch course material and merge it into one document per unit and per course.
#[derive(Parser)]
#[command(
    name = "lectern",
    version,
    about = "Fetch a course's class documents, convert them to PDF, and merge them per unit and per course.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// List the courses visible to the signed-in user.
    Courses {
        /// Only show courses whose code or name contains this text (case-insensitive).
        #[arg(short, long)]
        filter: Option<String>,

        /// Output root (defaults to config / LECTERN_OUTPUT_DIR).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Fetch and merge every unit of one course.
    Fetch {
        /// Course id or subject code.
        #[arg(short, long)]
        course: String,

        /// Output root (defaults to config / LECTERN_OUTPUT_DIR).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Rebuild the discovery index over the output root.
    Index {
        /// Output root (defaults to config / LECTERN_OUTPUT_DIR).
        #[arg(short, long)]
        out: Option<String>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "lectern=info",
        1 => "lectern=debug",
        _ => "lectern=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Courses { filter, out } => cmd_courses(filter.as_deref(), out.as_deref()).await,
        Command::Fetch { course, out } => cmd_fetch(&course, out.as_deref()).await,
        Command::Index { out } => cmd_index(out.as_deref()).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_courses(filter: Option<&str>, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let output_root = resolve_output_root(&config, out);
    let portal = signed_in_portal(&config).await?;

    let listed = CatalogResolver::new(portal.clone()).list_subjects().await;
    portal.logout().await;

    let courses: Vec<CatalogEntry> = listed?
        .into_iter()
        .filter(|c| matches_filter(c, filter))
        .collect();

    for course in &courses {
        println!("{} | {} | {}", course.id, course.subject_code(), course.course_title());
    }

    std::fs::create_dir_all(&output_root)?;
    let path = output_root.join(COURSES_FILE_NAME);
    std::fs::write(&path, serde_json::to_string_pretty(&courses)?)?;

    println!();
    println!("  {} course(s) written to {}", courses.len(), path.display());
    Ok(())
}

async fn cmd_fetch(course_ref: &str, out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let output_root = resolve_output_root(&config, out);
    let portal = signed_in_portal(&config).await?;

    let course = match CatalogResolver::new(portal.clone()).find_subject(course_ref).await {
        Ok(course) => course,
        Err(e) => {
            portal.logout().await;
            return Err(e.into());
        }
    };

    info!(
        course_id = %course.id,
        course = %course.display_name,
        root = %output_root.display(),
        "fetching course"
    );

    let converter = DocumentConverter::from_config(&ConvertConfig::from(&config));
    let run_config = CourseRunConfig {
        output_root,
        fetch: FetchConfig::from(&config),
    };
    let pipeline = CoursePipeline::new(portal.clone(), converter, run_config);
    let reporter = CliProgress::new();

    let outcome = tokio::select! {
        result = pipeline.run(&course, &reporter) => result,
        _ = tokio::signal::ctrl_c() => {
            reporter.abandon();
            portal.logout().await;
            return Err(eyre!("interrupted; no manifest was written for this run"));
        }
    };
    portal.logout().await;
    let result = outcome?;

    print_summary(&course, &result);
    Ok(())
}

async fn cmd_index(out: Option<&str>) -> Result<()> {
    let config = load_config()?;
    let root = resolve_output_root(&config, out);
    let index = refresh_index(&root)?;

    for course in &index.courses {
        println!("{course}");
    }
    println!();
    println!("  {} course(s) indexed under {}", index.courses.len(), root.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Build a portal session and sign in with env credentials, prompting when absent.
async fn signed_in_portal(config: &AppConfig) -> Result<Portal> {
    let portal = Portal::new(&PortalConfig::from(config))?;
    let (username, password) = match credentials_from_env(config) {
        Some(creds) => creds,
        None => {
            warn!(
                username_env = %config.portal.username_env,
                password_env = %config.portal.password_env,
                "credentials not set in environment, prompting"
            );
            (prompt("Username: ")?, prompt("Password: ")?)
        }
    };
    portal.login(&username, &password).await?;
    Ok(portal)
}

fn prompt(label: &str) -> Result<String> {
    let mut stderr = std::io::stderr();
    stderr.write_all(label.as_bytes())?;
    stderr.flush()?;

    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let value = line.trim().to_string();
    if value.is_empty() {
        return Err(eyre!("{} is required", label.trim_end_matches([':', ' '])));
    }
    Ok(value)
}

fn matches_filter(course: &CatalogEntry, filter: Option<&str>) -> bool {
    match filter {
        None => true,
        Some(text) => course
            .display_name
            .to_lowercase()
            .contains(&text.trim().to_lowercase()),
    }
}

fn print_summary(course: &CatalogEntry, result: &CourseRunResult) {
    let m = &result.manifest;
    println!();
    println!("  Course fetched: {}", course.display_name);
    println!("  Downloaded: {}", m.total_downloaded);
    println!("  Failed:     {}", m.total_failed);
    println!("  Location:   {}", result.course_dir.display());
    println!("  Manifest:   {}", result.manifest_path.display());
    if let Some(combined) = &m.combined_artifact {
        println!("  Combined:   {}", display_in(&result.course_dir, combined));
    }
    if let Some(log) = &m.failure_log {
        println!("  Failures:   {}", display_in(&result.course_dir, log));
    }
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    println!();
}

fn display_in(dir: &Path, name: &str) -> String {
    dir.join(name).display().to_string()
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// One bar per unit, one printed line per finished class.
struct CliProgress {
    bars: MultiProgress,
    spinner: ProgressBar,
    unit: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    fn new() -> Self {
        let bars = MultiProgress::new();
        let spinner = bars.add(ProgressBar::new_spinner());
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .expect("valid spinner template")
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            bars,
            spinner,
            unit: Mutex::new(None),
        }
    }

    fn current_unit(&self) -> Option<ProgressBar> {
        self.unit.lock().ok().and_then(|bar| bar.clone())
    }

    /// Stop drawing without a final summary (interrupted run).
    fn abandon(&self) {
        if let Some(bar) = self.current_unit() {
            bar.abandon();
        }
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn unit_started(&self, unit_number: usize, total_units: usize, name: &str, classes: usize) {
        let bar = self.bars.add(ProgressBar::new(classes as u64));
        bar.set_style(
            ProgressStyle::with_template("  [{bar:30.green/white}] {pos}/{len} {msg}")
                .expect("valid unit template")
                .progress_chars("=> "),
        );
        bar.set_message(format!("unit {unit_number}/{total_units} {name}"));
        if let Ok(mut slot) = self.unit.lock() {
            *slot = Some(bar);
        }
    }

    fn class_finished(&self, outcome: &ClassOutcome, _finished: usize, _total: usize) {
        let marker = if outcome.is_success() { "ok  " } else { "FAIL" };
        let _ = self.bars.println(format!(
            "  {marker} {:02} {} ({} file(s))",
            outcome.ordinal,
            outcome.class_name,
            outcome.files.len()
        ));
        if let Some(bar) = self.current_unit() {
            bar.inc(1);
        }
    }

    fn unit_finished(&self, unit: &UnitOutcome) {
        let Some(bar) = self.unit.lock().ok().and_then(|mut slot| slot.take()) else {
            return;
        };
        let merged = if unit.merged_artifact_path.is_some() {
            "merged"
        } else {
            "no merge"
        };
        bar.finish_with_message(format!(
            "unit {} {} ({} file(s), {merged})",
            unit.unit_number,
            unit.unit_name,
            unit.total_files()
        ));
    }

    fn done(&self, _result: &CourseRunResult) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lectern_shared::CatalogLevel;

    #[test]
    fn filter_is_case_insensitive_over_code_and_title() {
        let course =
            CatalogEntry::new("20975", "UE23CS342AA3-Internet of Things", CatalogLevel::Subject)
                .unwrap();
        assert!(matches_filter(&course, None));
        assert!(matches_filter(&course, Some("internet")));
        assert!(matches_filter(&course, Some("ue23cs342")));
        assert!(!matches_filter(&course, Some("compilers")));
    }

    #[test]
    fn cli_parses_fetch() {
        let cli = Cli::parse_from(["lectern", "-vv", "fetch", "--course", "20975", "--out", "/tmp/c"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Fetch { course, out } => {
                assert_eq!(course, "20975");
                assert_eq!(out.as_deref(), Some("/tmp/c"));
            }
            _ => panic!("expected fetch"),
        }
    }
}
