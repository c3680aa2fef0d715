//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use billsync_core::pipeline::{ProgressReporter, SyncOptions, SyncReport, run_sync};
use billsync_core::reconcile::ReconcileReport;
use billsync_govinfo::{ClientOptions, GovInfoClient};
use billsync_shared::{
    AppConfig, StoreBackend, config_file_path, database_path, init_config, load_config,
    load_config_from, read_secret, validate_config,
};
use billsync_storage::{ArcGisStore, Storage, SyncRunRecord};
use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{error, info};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// billsync: keep a map layer of bill sponsors in step with GovInfo.
#[derive(Parser)]
#[command(
    name = "billsync",
    version,
    about = "Sync recently changed congressional bills and their sponsors into a feature store.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.billsync/billsync.toml).
    #[arg(long, global = true, env = "BILLSYNC_CONFIG")]
    pub config: Option<PathBuf>,

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
    /// Run one sync: collect, enrich, reconcile and prune.
    Run {
        /// Lookback window in days (overrides sync.days_back).
        #[arg(long)]
        days: Option<u32>,

        /// Report what would change without writing to the store.
        #[arg(long)]
        dry_run: bool,
    },

    /// List recent sync runs from the local ledger.
    History {
        /// Number of runs to show.
        #[arg(long, default_value = "10")]
        limit: u32,
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
    /// Write a default config file to ~/.billsync/.
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
        0 => "billsync=info",
        1 => "billsync=debug",
        _ => "billsync=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { days, dry_run } => cmd_run(config_path, days, dry_run).await,
        Command::History { limit } => cmd_history(config_path, limit).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, days: Option<u32>, dry_run: bool) -> Result<()> {
    // Config problems are fatal before any network activity
    let config = resolve_config(config_path)?;
    validate_config(&config)?;
    let api_key = read_secret(&config.api.api_key_env, "bill API key")?;

    let mut options = SyncOptions::from_config(&config);
    if let Some(days) = days {
        options.days_back = days;
    }
    options.dry_run = dry_run;

    let client = GovInfoClient::new(ClientOptions::from_config(&config.api, api_key))?;
    let ledger = Storage::open(&database_path(&config)?).await?;

    info!(
        days_back = options.days_back,
        dry_run,
        backend = ?config.store.backend,
        "starting sync run"
    );

    let start = Instant::now();
    let reporter = CliProgress::new();
    let result = match config.store.backend {
        StoreBackend::Local => {
            run_sync(&client, &ledger, Some(&ledger), &options, &reporter).await
        }
        StoreBackend::Arcgis => {
            let token = read_secret(&config.store.token_env, "feature store token")?;
            let store = ArcGisStore::new(Some(token), config.api.timeout_secs)?;
            run_sync(&client, &store, Some(&ledger), &options, &reporter).await
        }
    };
    reporter.finish();

    report_outcome(result, start.elapsed());
    Ok(())
}

/// Print the run outcome. A failed run is logged and printed, never
/// propagated; returns the failure line.
fn report_outcome(
    result: billsync_shared::Result<SyncReport>,
    elapsed: Duration,
) -> Option<String> {
    match result {
        Ok(report) => {
            print_report(&report);
            None
        }
        Err(e) => {
            let elapsed_ms = elapsed.as_millis() as u64;
            error!(error = %e, elapsed_ms, "sync run failed");
            let line = format!("  Sync failed after {:.1}s: {e}", elapsed.as_secs_f64());
            println!();
            println!("{line}");
            println!();
            Some(line)
        }
    }
}

fn print_report(report: &SyncReport) {
    println!();
    if report.dry_run {
        println!("  Dry run complete, nothing was written.");
    } else {
        println!("  Sync complete!");
    }
    println!("  Run:       {}", report.run_id);
    println!("  Since:     {}", report.since);
    println!(
        "  Packages:  {} found, {} resolved, {} skipped",
        report.packages_found, report.packages_resolved, report.packages_skipped
    );
    if !report.classes_failed.is_empty() {
        println!("  Failed:    {}", report.classes_failed.join(", "));
    }
    println!(
        "  Rows:      {} assembled, {} kept, {} joined",
        report.rows_assembled, report.rows_kept, report.rows_joined
    );
    for layer in [&report.members, &report.bills].into_iter().flatten() {
        print_layer(layer);
    }
    for pruned in &report.pruned {
        println!("  Pruned:    {} from {}", pruned.deleted, pruned.layer);
    }
    println!("  Time:      {:.1}s", report.elapsed_ms as f64 / 1000.0);
    println!();
}

fn print_layer(layer: &ReconcileReport) {
    println!(
        "  {}: +{} ~{} ={} ({} untouched, {} skipped)",
        layer.layer, layer.added, layer.updated, layer.unchanged, layer.untouched, layer.skipped
    );
    let failed = layer.adds.failed_batches.len() + layer.updates.failed_batches.len();
    if failed > 0 {
        println!("    {failed} batch(es) failed, see log");
    }
}

async fn cmd_history(config_path: Option<&Path>, limit: u32) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open_readonly(&database_path(&config)?).await?;
    let runs = storage.list_sync_runs(limit).await?;

    if runs.is_empty() {
        println!("No sync runs recorded.");
        return Ok(());
    }

    for run in &runs {
        println!("{}", history_line(run));
    }
    Ok(())
}

fn history_line(run: &SyncRunRecord) -> String {
    let mode = if run.dry_run { " (dry run)" } else { "" };
    let stats: Option<serde_json::Value> = run
        .stats_json
        .as_deref()
        .and_then(|s| serde_json::from_str(s).ok());

    let outcome = match (&run.finished_at, stats) {
        (None, _) => "unfinished".to_string(),
        (Some(_), Some(stats)) if stats.get("error").is_some() => {
            format!("failed: {}", stats["error"].as_str().unwrap_or("unknown"))
        }
        (Some(_), Some(stats)) => format!(
            "{} rows, {} packages in {}ms",
            stats["rows_joined"], stats["packages_resolved"], stats["elapsed_ms"]
        ),
        (Some(_), None) => "finished".to_string(),
    };
    format!("  {}  {}{mode}  {outcome}", run.started_at, run.id)
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let source = match config_path {
        Some(path) => path.to_path_buf(),
        None => config_file_path()?,
    };
    println!("# {}", source.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        if !self.spinner.is_finished() {
            self.spinner.finish_and_clear();
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn package_resolved(&self, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Resolving packages [{current}/{total}]"));
    }

    fn done(&self, _report: &SyncReport) {
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use billsync_shared::BillSyncError;

    use super::*;

    fn record(stats: Option<&str>, finished: bool) -> SyncRunRecord {
        SyncRunRecord {
            id: "0190-run".into(),
            started_at: "2024-03-04T12:00:00Z".into(),
            finished_at: finished.then(|| "2024-03-04T12:01:00Z".into()),
            dry_run: false,
            stats_json: stats.map(str::to_string),
        }
    }

    #[test]
    fn history_line_summarizes_stats() {
        let line = history_line(&record(
            Some(r#"{"rows_joined":12,"packages_resolved":3,"elapsed_ms":950}"#),
            true,
        ));
        assert!(line.contains("12 rows, 3 packages in 950ms"));
    }

    #[test]
    fn history_line_shows_failures_and_unfinished_runs() {
        let failed = history_line(&record(Some(r#"{"error":"network error: boom"}"#), true));
        assert!(failed.contains("failed: network error: boom"));

        let open = history_line(&record(None, false));
        assert!(open.contains("unfinished"));
    }

    #[test]
    fn failed_run_is_reported_not_propagated() {
        let result = Err(BillSyncError::Network("connection reset".into()));
        let line = report_outcome(result, Duration::from_millis(2500));
        assert_eq!(
            line.as_deref(),
            Some("  Sync failed after 2.5s: network error: connection reset")
        );
    }

    #[test]
    fn successful_run_has_no_failure_line() {
        let report = SyncReport {
            run_id: "0190-run".into(),
            ..SyncReport::default()
        };
        assert!(report_outcome(Ok(report), Duration::from_secs(1)).is_none());
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = Cli::parse_from(["billsync", "-v", "run", "--days", "7", "--dry-run"]);
        assert_eq!(cli.verbose, 1);
        assert!(matches!(
            cli.command,
            Command::Run {
                days: Some(7),
                dry_run: true
            }
        ));
    }
}
