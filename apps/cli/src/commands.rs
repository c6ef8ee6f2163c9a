//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use manualforge_core::{
    BatchResult, CancellationToken, Pipeline, ProgressReporter, import_catalog,
};
use manualforge_fetcher::Fetcher;
use manualforge_shared::{
    AppConfig, PipelineConfig, RecordState, RunId, Stage, TrimPolicy, config_file_path,
    init_config, load_config, load_config_from, render_config,
};
use manualforge_storage::{ContentStore, FsContentStore, RawCache, Storage};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ManualForge: workshop-manual PDFs in, scrubbed plain text out.
#[derive(Parser)]
#[command(
    name = "manualforge",
    version,
    about = "Import repair-manual listings and convert pending PDFs into searchable text.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.manualforge/manualforge.toml.
    #[arg(long, global = true, env = "MANUALFORGE_CONFIG")]
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
    /// Fetch the manual catalog and add unseen manuals as pending records.
    Import {
        /// Catalog URL (defaults to `catalog.url` from the config).
        #[arg(long)]
        url: Option<String>,
    },

    /// Run one batch over every pending record.
    Run {
        /// Number of concurrent workers.
        #[arg(long)]
        pool_size: Option<usize>,

        /// Page trimming policy: cover-and-back or cover-only.
        #[arg(long, value_parser = parse_trim_policy)]
        trim: Option<TrimPolicy>,
    },

    /// Move records back to pending so the next run picks them up again.
    Requeue {
        /// States to requeue (repeatable). Defaults to failed.
        #[arg(long = "state", value_parser = parse_state)]
        states: Vec<RecordState>,
    },

    /// List records, optionally filtered by state.
    List {
        /// Only show records in this state.
        #[arg(long, value_parser = parse_state)]
        state: Option<RecordState>,
    },

    /// Show record counts and recent runs.
    Status {
        /// Number of runs to show.
        #[arg(long, default_value = "5")]
        runs: u32,
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

fn parse_state(s: &str) -> std::result::Result<RecordState, String> {
    s.parse().map_err(|e: manualforge_shared::ManualForgeError| e.to_string())
}

fn parse_trim_policy(s: &str) -> std::result::Result<TrimPolicy, String> {
    s.parse().map_err(|e: manualforge_shared::ManualForgeError| e.to_string())
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "manualforge=info",
        1 => "manualforge=debug",
        _ => "manualforge=trace",
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
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Import { url } => cmd_import(config_path, url.as_deref()).await,
        Command::Run { pool_size, trim } => cmd_run(config_path, pool_size, trim).await,
        Command::Requeue { states } => cmd_requeue(config_path, &states).await,
        Command::List { state } => cmd_list(config_path, state).await,
        Command::Status { runs } => cmd_status(config_path, runs).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

/// Load the config from `--config` if given, else the default location.
fn resolve_config(path: Option<&Path>) -> Result<AppConfig> {
    Ok(match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    })
}

/// Runtime pipeline settings: config file values, then flag overrides.
fn pipeline_config(
    config: &AppConfig,
    pool_size: Option<usize>,
    trim: Option<TrimPolicy>,
) -> Result<PipelineConfig> {
    let mut pipeline = PipelineConfig::from(config);
    if let Some(n) = pool_size {
        pipeline.pool_size = n;
    }
    if let Some(policy) = trim {
        pipeline.trim_policy = policy;
    }
    pipeline.validate()?;
    Ok(pipeline)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_import(config_path: Option<&Path>, url: Option<&str>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let url = url.unwrap_or(&config.catalog.url);

    let storage = Storage::open(&config.storage.db_path).await?;
    let fetcher = Fetcher::new(&PipelineConfig::from(&config))?;

    info!(url, "importing catalog");
    let summary = import_catalog(&fetcher, &storage, url).await?;

    println!();
    println!("  Catalog imported");
    println!("  Listed:   {}", summary.listed);
    println!("  New:      {}", summary.inserted);
    println!("  Skipped:  {}", summary.skipped);
    println!();
    Ok(())
}

async fn cmd_run(
    config_path: Option<&Path>,
    pool_size: Option<usize>,
    trim: Option<TrimPolicy>,
) -> Result<()> {
    let config = resolve_config(config_path)?;
    let pipeline_config = pipeline_config(&config, pool_size, trim)?;

    let storage = Arc::new(Storage::open(&config.storage.db_path).await?);
    let content: Arc<dyn ContentStore> = Arc::new(FsContentStore::new(&config.storage.text_dir));

    let mut pipeline = Pipeline::new(storage, content, pipeline_config)?;
    if let Some(dir) = &config.storage.raw_cache_dir {
        pipeline = pipeline.with_raw_cache(RawCache::new(dir));
    }

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, letting in-flight records finish");
                cancel.cancel();
            }
        })
    };

    info!(
        pool_size = pipeline.config().pool_size,
        trim = pipeline.config().trim_policy.as_str(),
        "running batch"
    );
    let result = pipeline.run_batch(&cancel, Arc::new(CliProgress::new())).await;
    interrupt.abort();
    let result = result?;

    print_batch(&result);
    Ok(())
}

fn print_batch(result: &BatchResult) {
    println!();
    if result.cancelled {
        println!("  Run {} cancelled", result.run_id);
    } else {
        println!("  Run {} finished", result.run_id);
    }
    println!("  Processed:     {}", result.processed);
    println!("  Rejected:      {}", result.rejected);
    println!("  Failed:        {}", result.failed);
    if result.not_attempted > 0 {
        println!("  Not attempted: {}", result.not_attempted);
    }
    println!("  Time:          {:.1}s", result.elapsed.as_secs_f64());

    if !result.errors.is_empty() {
        println!();
        println!("  Errors:");
        for err in &result.errors {
            println!("    #{} [{}] {}", err.id, err.stage, err.cause);
        }
    }
    println!();
}

async fn cmd_requeue(config_path: Option<&Path>, states: &[RecordState]) -> Result<()> {
    let config = resolve_config(config_path)?;
    let states = if states.is_empty() {
        vec![RecordState::Failed]
    } else {
        states.to_vec()
    };
    if states.contains(&RecordState::Pending) {
        return Err(eyre!("pending records are already queued"));
    }

    let storage = Storage::open(&config.storage.db_path).await?;
    let count = storage.requeue(&states).await?;

    let names: Vec<&str> = states.iter().map(RecordState::as_str).collect();
    println!("Requeued {count} record(s) ({})", names.join(", "));
    Ok(())
}

async fn cmd_list(config_path: Option<&Path>, state: Option<RecordState>) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open_readonly(&config.storage.db_path).await?;
    let records = storage.list_records(state).await?;

    if records.is_empty() {
        println!("No records.");
        return Ok(());
    }

    println!("{:>8}  {:<10}  {:>6}  TITLE", "ID", "STATE", "PAGES");
    for record in &records {
        let extent = record.extent().map(|n| n.to_string()).unwrap_or_else(|| "-".into());
        println!(
            "{:>8}  {:<10}  {:>6}  {}",
            record.id(),
            record.state().as_str(),
            extent,
            record.title()
        );
        if let Some(err) = record.last_error() {
            println!("{:>8}  {:<10}  {:>6}  ! {err}", "", "", "");
        }
    }
    println!();
    println!("{} record(s)", records.len());
    Ok(())
}

async fn cmd_status(config_path: Option<&Path>, runs: u32) -> Result<()> {
    let config = resolve_config(config_path)?;
    let storage = Storage::open_readonly(&config.storage.db_path).await?;

    println!();
    for (state, count) in storage.count_by_state().await? {
        println!("  {:<10} {count}", state.as_str());
    }

    let recent = storage.recent_runs(runs).await?;
    if !recent.is_empty() {
        println!();
        println!("  Recent runs:");
        for run in &recent {
            println!(
                "    {}  pool={} trim={}  processed={} rejected={} failed={}{}",
                run.started_at.format("%Y-%m-%d %H:%M:%S"),
                run.pool_size,
                run.trim_policy.as_str(),
                run.processed,
                run.rejected,
                run.failed,
                if run.cancelled { " (cancelled)" } else { "" }
            );
        }
    }
    println!();
    Ok(())
}

fn cmd_config_init(config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(p) => {
            if let Some(parent) = p.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(p, render_config(&AppConfig::default())?)?;
            p.to_path_buf()
        }
        None => {
            let default = config_file_path()?;
            if default.exists() {
                return Err(eyre!("config already exists at '{}'", default.display()));
            }
            init_config()?
        }
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = resolve_config(config_path)?;
    println!("{}", render_config(&config)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Progress bar over the pending set, advanced as records settle.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }
}

impl ProgressReporter for CliProgress {
    fn batch_started(&self, _run_id: &RunId, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_message("starting");
    }

    fn stage(&self, id: i64, stage: Stage) {
        self.bar.set_message(format!("#{id} {stage}"));
    }

    fn record_settled(&self, id: i64, state: RecordState) {
        self.bar.inc(1);
        if state == RecordState::Failed {
            self.bar.println(format!("  #{id} failed"));
        }
    }

    fn done(&self, _result: &BatchResult) {
        self.bar.finish_and_clear();
    }
}
