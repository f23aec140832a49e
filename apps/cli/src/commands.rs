//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use postscout_core::{
    EnrichmentProgress, EnrichmentRouter, PollReport, RunOutcome, SubmissionReport,
};
use postscout_gemini::{EnrichmentApi, GeminiClient};
use postscout_shared::{
    AppConfig, EnrichmentConfig, RunSummary, init_config, load_config, validate_api_key,
};
use tracing::{info, warn};

use crate::state::{default_scope, load_posts, merge_posts, save_posts};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PostScout: enrich scraped competitor blog posts.
#[derive(Parser)]
#[command(
    name = "postscout",
    version,
    about = "Summarise and classify scraped competitor blog posts with Gemini.",
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
    /// Enrich the posts in a state file, live or as a bulk job.
    Enrich {
        /// JSON array of posts; rewritten in place.
        #[arg(short, long)]
        input: PathBuf,

        /// Scope for bulk jobs (defaults to the state file name).
        #[arg(short, long)]
        scope: Option<String>,

        /// Re-enrich every post with content, not only the ones lacking results.
        #[arg(long)]
        all: bool,
    },

    /// Poll bulk jobs and write finished results into the state file.
    Check {
        /// JSON array of posts the jobs were submitted from.
        #[arg(short, long)]
        input: PathBuf,

        /// Scope to check (defaults to the state file name).
        #[arg(short, long)]
        scope: Option<String>,

        /// Keep polling until no job is pending.
        #[arg(long)]
        wait: bool,

        /// Seconds between polls with --wait.
        #[arg(long, default_value = "60")]
        interval: u64,
    },

    /// Inspect or cancel recorded bulk jobs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Bulk job subcommands.
#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// List recorded jobs.
    List {
        #[arg(short, long)]
        scope: Option<String>,
    },
    /// Cancel every unfinished job. Run `check` afterwards to release the posts.
    Cancel {
        #[arg(short, long)]
        scope: Option<String>,
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
        0 => "postscout=info",
        1 => "postscout=debug",
        _ => "postscout=trace",
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
        Command::Enrich { input, scope, all } => cmd_enrich(&input, scope, all).await,
        Command::Check {
            input,
            scope,
            wait,
            interval,
        } => cmd_check(&input, scope, wait, Duration::from_secs(interval.max(1))).await,
        Command::Jobs { action } => match action {
            JobsAction::List { scope } => cmd_jobs_list(scope.as_deref()).await,
            JobsAction::Cancel { scope } => cmd_jobs_cancel(scope.as_deref()).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Load config, check the API key, and build the router.
fn build_router() -> Result<EnrichmentRouter> {
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;
    let enrichment = EnrichmentConfig::from(&config);

    let client = GeminiClient::new(api_key, &config.gemini.base_url, enrichment.request_timeout)?;
    let api: Arc<dyn EnrichmentApi> = Arc::new(client);
    Ok(EnrichmentRouter::new(api, enrichment)?)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_enrich(input: &Path, scope: Option<String>, all: bool) -> Result<()> {
    let router = build_router()?;
    let scope = scope.unwrap_or_else(|| default_scope(input));

    let mut state = load_posts(input)?;
    if state.is_empty() {
        return Err(eyre!("no posts found in {}", input.display()));
    }

    let candidates: Vec<_> = state
        .iter()
        .filter(|p| if all { p.has_enrichable_content() } else { p.needs_enrichment() })
        .cloned()
        .collect();

    if candidates.is_empty() {
        println!("All {} posts are already enriched.", state.len());
        return Ok(());
    }

    info!(
        scope = %scope,
        total = state.len(),
        candidates = candidates.len(),
        "starting enrichment"
    );

    let reporter = CliProgress::new();
    let outcome = router.enrich(&scope, candidates, &reporter).await?;
    reporter.finish();

    match outcome {
        RunOutcome::Live(report) => {
            merge_posts(&mut state, report.posts);
            save_posts(input, &mut state)?;
            print_summary("Live enrichment finished", &report.summary);
        }
        RunOutcome::Batch(report) => {
            if !report.rejected.is_empty() {
                merge_posts(&mut state, report.rejected.clone());
                save_posts(input, &mut state)?;
            }
            print_submission(&report);
        }
    }

    Ok(())
}

async fn cmd_check(
    input: &Path,
    scope: Option<String>,
    wait: bool,
    interval: Duration,
) -> Result<()> {
    let router = build_router()?;
    let scope = scope.unwrap_or_else(|| default_scope(input));

    loop {
        let reporter = CliProgress::new();
        let report = router.check(Some(&scope), &reporter).await?;
        reporter.finish();

        persist_completed(&router, input, &report)?;
        print_poll(&report);

        if !wait || report.pending.is_empty() {
            break;
        }
        info!(
            pending = report.pending.len(),
            interval_secs = interval.as_secs(),
            "waiting for bulk jobs"
        );
        tokio::time::sleep(interval).await;
    }

    Ok(())
}

/// Write finished jobs into the state file, then release their workspace files.
fn persist_completed(router: &EnrichmentRouter, input: &Path, report: &PollReport) -> Result<()> {
    if report.completed.is_empty() {
        return Ok(());
    }

    let mut state = load_posts(input)?;
    for job in &report.completed {
        merge_posts(&mut state, job.posts.clone());
    }
    save_posts(input, &mut state)?;

    for job in &report.completed {
        if let Err(e) = router.batch().confirm_persisted(job) {
            warn!(job_id = %job.record.job_id, error = %e, "results saved but cleanup failed");
        }
    }
    Ok(())
}

async fn cmd_jobs_list(scope: Option<&str>) -> Result<()> {
    let router = build_router()?;
    let (records, corrupt) = router.batch().list(scope)?;

    if records.is_empty() && corrupt.is_empty() {
        println!("No recorded bulk jobs.");
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  scope={}  posts={}  chunks={}  model={}  created={}",
            record.job_id,
            record.scope,
            record.post_count,
            record.chunk_count,
            record.model,
            record.created_at.format("%Y-%m-%d %H:%M UTC"),
        );
    }
    for err in &corrupt {
        println!("unreadable record: {err}");
    }
    Ok(())
}

async fn cmd_jobs_cancel(scope: Option<&str>) -> Result<()> {
    let router = build_router()?;
    let report = router.cancel_pending(scope).await?;

    for job_id in &report.cancelled {
        println!("cancelled {job_id}");
    }
    for err in &report.errors {
        println!("error: {err}");
    }
    if report.cancelled.is_empty() && report.errors.is_empty() {
        println!("No unfinished jobs to cancel.");
    }
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
// Output
// ---------------------------------------------------------------------------

fn print_summary(title: &str, summary: &RunSummary) {
    println!();
    println!("  {title}");
    println!("  Total:     {}", summary.total);
    println!("  Completed: {}", summary.completed);
    println!("  Failed:    {}", summary.failed);
    println!("  Pending:   {}", summary.pending);
    println!();
}

fn print_submission(report: &SubmissionReport) {
    println!();
    println!("  Bulk enrichment submitted");
    for job in &report.submitted {
        println!(
            "  {}  ({} posts, {} chunks)",
            job.record.job_id, job.record.post_count, job.record.chunk_count
        );
    }
    for failed in &report.failed {
        println!("  Not submitted ({} posts): {}", failed.posts.len(), failed.error);
    }
    if !report.rejected.is_empty() {
        println!("  Rejected:  {} posts could not be chunked", report.rejected.len());
    }
    if report.skipped > 0 {
        println!("  Skipped:   {} posts without content", report.skipped);
    }
    println!("  Run `postscout check` later to collect the results.");
    println!();
}

fn print_poll(report: &PollReport) {
    for job in &report.completed {
        print_summary(&format!("Job {} {}", job.record.job_id, job.state), &job.summary);
    }
    for job in &report.pending {
        println!("  {} is {}", job.record.job_id, job.state);
    }
    for err in report.errors.iter().chain(&report.corrupt) {
        println!("  error: {err}");
    }
    if report.completed.is_empty() && report.pending.is_empty() && report.errors.is_empty() {
        println!("  No bulk jobs to check.");
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl EnrichmentProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn task_progress(&self, current: usize, total: usize, detail: &str) {
        self.spinner.set_message(format!("[{current}/{total}] {detail}"));
    }
}
