//! StockBatch - concurrent batch technical analysis
//!
//! A CLI tool that fetches daily bars for a universe of A-share codes,
//! runs one strategy over each code with a bounded worker pool and writes
//! a single report in universe order.
//!
//! Exit codes:
//!   0   - Every code analyzed (no failures)
//!   1   - Runtime error (config, I/O, internal invariant violation)
//!   2   - At least one code ended as a failure
//!   130 - Run cancelled (Ctrl-C)

mod aggregator;
mod analysis;
mod cli;
mod config;
mod error;
mod models;
mod report;
mod scheduler;
mod source;
mod universe;

use anyhow::{Context, Result};
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use indicatif::{ProgressBar, ProgressStyle};
use models::Report;
use report::{FileSink, ReportSink, StdoutSink};
use scheduler::Scheduler;
use std::future::Future;
use std::path::Path;
use tracing::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::FmtSubscriber;
use universe::Universe;

const EXIT_OK: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_FAILURES: i32 = 2;
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(EXIT_ERROR);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // The config file can turn on verbose logging, so it loads first
    let (config, origin) = match prepare_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(EXIT_ERROR);
        }
    };

    // Initialize logging
    init_logging(config.log_level(args.quiet));

    info!("StockBatch v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", origin);
    debug!("Arguments: {:?}", args);

    match run_batch(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Batch failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(EXIT_ERROR);
        }
    }
}

/// Handle --init-config: generate a default .stockbatch.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(EXIT_ERROR);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize workers, retries, data source and strategy.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the whole batch. Returns the process exit code.
async fn run_batch(args: Args, config: Config) -> Result<i32> {
    let output = config.general.output.clone();
    let to_stdout = cli::is_stdout(Path::new(&output));
    // Banners would corrupt a report written to stdout
    let chatty = !args.quiet && !to_stdout;

    // Step 1: Resolve the universe
    let universe = resolve_universe(&args, &config)?;
    if chatty {
        println!("📋 Universe: {} codes", universe.len());
    }

    if args.dry_run {
        return Ok(handle_dry_run(&universe));
    }

    // Step 2: Wire the data source, analyzer and scheduler
    let source = source::build_source(&config.source, config.per_call_timeout())?;
    let analyzer = analysis::build_analyzer(config.analysis.strategy);
    let concurrency = config.general.concurrency.min(universe.len().max(1));

    if chatty {
        println!("⚙️  Running batch analysis...");
        println!("   Strategy: {}", analyzer.name());
        println!("   Source: {}", source.name());
        println!("   Workers: {}", concurrency);
        println!(
            "   Retries: {} attempts, {}ms timeout per call",
            config.retry.max_attempts, config.retry.per_call_timeout_ms
        );
    }

    let progress = if chatty {
        Some(progress_bar(universe.len() as u64))
    } else {
        None
    };

    let mut scheduler = Scheduler::new(source, analyzer, config.scheduler_config());
    if let Some(ref pb) = progress {
        let pb = pb.clone();
        scheduler = scheduler.on_outcome(move |outcome| {
            if !outcome.is_success() {
                pb.set_message(format!("{} {}", outcome.code(), outcome.label()));
            }
            pb.inc(1);
        });
    }

    // Step 3: Cancel on Ctrl-C
    let cancel = CancellationToken::new();
    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling run");
                cancel.cancel();
            }
        })
    };

    let result = with_quiet_panics(scheduler.run(&universe, config.general.concurrency, &cancel))
        .await;
    ctrl_c.abort();

    if let Some(pb) = progress {
        pb.finish_and_clear();
    }

    let report = result.context("Batch orchestration failed")?;

    // Step 4: Hand the report to the sink
    let sink: Box<dyn ReportSink> = if to_stdout {
        Box::new(StdoutSink::new(args.format))
    } else {
        Box::new(FileSink::new(output.clone().into(), args.format))
    };
    sink.emit(&report)?;

    if chatty {
        print_summary(&report, &output, args.format);
    }

    Ok(exit_code(&report))
}

/// Run `fut` with panic messages sent to the debug log.
///
/// Adapter and analyzer panics are caught and recorded per code; the default
/// hook would still print them over the progress bar.
async fn with_quiet_panics<F: Future>(fut: F) -> F::Output {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(|info| debug!("Caught panic: {}", info)));
    let output = fut.await;
    std::panic::set_hook(previous);
    output
}

/// Map a finished report to the process exit code.
fn exit_code(report: &Report) -> i32 {
    if report.metadata.cancelled {
        EXIT_CANCELLED
    } else if report.summary.failed > 0 {
        EXIT_FAILURES
    } else {
        EXIT_OK
    }
}

fn print_summary(report: &Report, output: &str, format: OutputFormat) {
    let summary = &report.summary;
    let counts = report.recommendation_counts();
    let count = |r: models::Recommendation| counts.get(&r).copied().unwrap_or(0);

    println!("\n📊 Batch Summary:");
    println!(
        "   Codes: {} | ✅ Succeeded: {} | ❌ Failed: {} | ⏭️ Skipped: {}",
        summary.total(),
        summary.succeeded,
        summary.failed,
        summary.skipped
    );
    println!(
        "   - 🟢 Buy: {} | 🟡 Hold: {} | 🔴 Sell: {}",
        count(models::Recommendation::Buy),
        count(models::Recommendation::Hold),
        count(models::Recommendation::Sell)
    );
    println!(
        "   Duration: {:.1}s",
        summary.total_duration_ms as f64 / 1000.0
    );

    if report.metadata.cancelled {
        eprintln!("\n⛔ Run cancelled; unfinished codes are marked as skipped.");
    } else if summary.failed > 0 {
        eprintln!(
            "\n⚠️  {} code(s) failed, see the report for reasons (exit code 2).",
            summary.failed
        );
    }

    let kind = match format {
        OutputFormat::Markdown => "Markdown",
        OutputFormat::Json => "JSON",
    };
    println!("\n✅ Batch complete! {} report saved to: {}", kind, output);
}

fn progress_bar(len: u64) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

/// Handle --dry-run: print the resolved universe and exit.
fn handle_dry_run(universe: &Universe) -> i32 {
    println!("\n🔍 Dry run: no market data will be fetched.\n");

    if universe.is_empty() {
        println!("   The universe is empty.");
    } else {
        for code in universe.codes() {
            let market = code
                .exchange()
                .map(|e| e.prefix())
                .unwrap_or("??");
            println!("     📈 {} ({})", code, market);
        }
        println!("\n   Total: {} codes", universe.len());
    }

    println!("\n✅ Dry run complete.");
    EXIT_OK
}

/// Combine codes given on the command line with the universe file.
///
/// The main-board filter applies to the universe file only; explicitly
/// named codes are always kept.
fn resolve_universe(args: &Args, config: &Config) -> Result<Universe> {
    let explicit = Universe::from_tokens(args.code_tokens());

    let universe = match args.universe {
        Some(ref path) => {
            info!("Loading universe from: {}", path.display());
            let listed = universe::load_universe_file(path, config.universe.main_board_only)?;
            explicit.extend(listed)
        }
        None => explicit,
    };

    if universe.is_empty() {
        warn!("Resolved universe is empty");
    }
    Ok(universe)
}

/// Load, merge and validate the configuration.
///
/// Runs before logging is installed, so it returns a description of where
/// the settings came from instead of logging it.
fn prepare_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, origin) = load_config(args)?;
    config.merge_with_args(args);
    config.validate().context("Invalid configuration")?;
    Ok((config, origin))
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, String)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, config_path.display().to_string()));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, DEFAULT_CONFIG_FILE.to_string())),
        Ok(None) => Ok((Config::default(), "built-in defaults".to_string())),
        Err(e) => {
            eprintln!("⚠️  Ignoring {}: {:#}", DEFAULT_CONFIG_FILE, e);
            Ok((Config::default(), "built-in defaults".to_string()))
        }
    }
}
