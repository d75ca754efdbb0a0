use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use futures::stream::{self, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use registry_resilience::recovery::ReportArchive;
use registry_resilience::simulation::{self, Scenario, SimulatedEnvironment};
use registry_resilience::*;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "resilience")]
#[command(about = "Retry, recovery and graceful degradation for module registry operations")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Also write daily-rolling log files into this directory
    #[arg(long, global = true, env = "RESILIENCE_LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Engine configuration file (TOML, YAML or JSON)
    #[arg(short, long, global = true, env = "RESILIENCE_CONFIG_FILE")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated registrations through the engine
    Simulate {
        /// Number of registrations
        #[arg(short = 'n', long, default_value = "100")]
        operations: usize,

        /// Failure scenario (transient, auth, dependency, validation, outage, unknown, mixed)
        #[arg(short, long, default_value = "mixed", value_parser = parse_scenario)]
        scenario: Scenario,

        /// Concurrent registrations (defaults to the number of CPUs)
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Mean latency of a simulated registry call
        #[arg(long, default_value = "5ms", value_parser = humantime::parse_duration)]
        latency: Duration,

        /// Use millisecond retry delays instead of the configured ones
        #[arg(long)]
        fast: bool,

        /// Archive sealed reports into this SQLite database
        #[arg(long)]
        archive: Option<PathBuf>,

        /// Print statistics as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective engine configuration
    Config,

    /// List reports from a SQLite archive
    Archive {
        /// Archive database path
        path: PathBuf,

        /// Number of reports to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print full reports as JSON
        #[arg(long)]
        json: bool,

        /// Delete reports older than this age first (e.g. "30days")
        #[arg(long, value_parser = humantime::parse_duration)]
        prune: Option<Duration>,
    },
}

fn parse_scenario(s: &str) -> Result<Scenario, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keep the appender guard alive so buffered file logs are flushed on exit
    let _log_guard = setup_logging(cli.debug, cli.json_logs, cli.log_dir.as_deref())?;

    #[cfg(not(feature = "color-output"))]
    colored::control::set_override(false);

    match &cli.command {
        Commands::Simulate {
            operations,
            scenario,
            concurrency,
            latency,
            fast,
            archive,
            json,
        } => {
            let config = if *fast {
                EngineConfig::fast()
            } else {
                EngineConfig::load(cli.config.as_deref())?
            };
            let options = SimulateOptions {
                operations: *operations,
                scenario: *scenario,
                concurrency: concurrency.unwrap_or_else(num_cpus::get).max(1),
                latency: *latency,
                archive: archive.clone(),
                json: *json,
            };
            simulate(config, options).await?;
        }
        Commands::Config => {
            let config = EngineConfig::load(cli.config.as_deref())?;
            show_config(&config, cli.config.as_deref())?;
        }
        Commands::Archive {
            path,
            limit,
            json,
            prune,
        } => {
            list_archive(path, *limit, *json, *prune)?;
        }
    }

    Ok(())
}

fn setup_logging(
    debug: bool,
    json: bool,
    log_dir: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::prelude::*;

    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = if json {
        fmt::layer().json().with_writer(std::io::stderr).boxed()
    } else {
        fmt::layer().with_writer(std::io::stderr).with_target(false).boxed()
    };

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "resilience.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(guard)
}

/// Cancel in-flight operations on SIGINT/SIGTERM; a second signal terminates immediately
fn setup_signal_handlers(cancellation: &CancellationFlag) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::flag;

    for signal in [SIGINT, SIGTERM] {
        // Registered first so it only fires once the flag is already set
        flag::register_conditional_shutdown(signal, 1, cancellation.as_atomic())?;
        flag::register(signal, cancellation.as_atomic())?;
    }

    Ok(())
}

struct SimulateOptions {
    operations: usize,
    scenario: Scenario,
    concurrency: usize,
    latency: Duration,
    archive: Option<PathBuf>,
    json: bool,
}

async fn simulate(config: EngineConfig, options: SimulateOptions) -> Result<()> {
    let cancellation = CancellationFlag::new();
    setup_signal_handlers(&cancellation)?;

    let environment = SimulatedEnvironment::new();
    let collaborators = environment.collaborators();

    let mut builder = ResilienceEngine::builder()
        .config(config)
        .with_builtin_strategies(&collaborators)
        .with_builtin_fallbacks(&collaborators);
    if let Some(path) = &options.archive {
        let archive = ReportArchive::open(Some(path.as_path()))
            .with_context(|| format!("Failed to open archive {}", path.display()))?;
        builder = builder.archive(Arc::new(archive));
    }
    let engine = builder.build()?;

    println!(
        "{} {} registrations ({} scenario, concurrency {})",
        "Simulating".bold(),
        options.operations,
        options.scenario.to_string().cyan(),
        options.concurrency
    );

    let progress = ProgressBar::new(options.operations as u64);
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        )?
        .progress_chars("=>-"),
    );

    let started = Instant::now();
    let latency = options.latency;
    let outcomes: Vec<Outcome> = stream::iter(0..options.operations)
        .map(|index| {
            let ctx = simulation::plan(options.scenario, index).with_cancellation(cancellation.clone());
            let engine = &engine;
            let progress = &progress;
            async move {
                let outcome = match engine
                    .execute(ctx, |ctx| simulation::publish(ctx.clone(), latency))
                    .await
                {
                    Ok(completion) => completion.outcome(),
                    Err(failed) => failed.outcome(),
                };
                progress.inc(1);
                outcome
            }
        })
        .buffer_unordered(options.concurrency)
        .collect()
        .await;

    if cancellation.is_cancelled() {
        progress.abandon_with_message("cancelled");
    } else {
        progress.finish_with_message("done");
    }

    let statistics = engine.statistics(None);

    if options.json {
        let summary = serde_json::json!({
            "elapsed": humantime::format_duration(started.elapsed()).to_string(),
            "statistics": statistics,
            "strategies": engine.strategy_stats(),
            "fallbacks": engine.fallback_stats(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    print_summary(&outcomes, started.elapsed());
    print_statistics(&engine, &statistics);

    if environment.keys_issued() > 0 || environment.tickets_issued() > 0 {
        println!(
            "\n{} {} credentials regenerated, {} registrations queued locally",
            "Environment:".bold(),
            environment.keys_issued(),
            environment.tickets_issued()
        );
    }

    Ok(())
}

fn colored_outcome(outcome: Outcome) -> ColoredString {
    match outcome {
        Outcome::Succeeded => outcome.to_string().green(),
        Outcome::Degraded => outcome.to_string().yellow(),
        Outcome::Failed => outcome.to_string().red(),
    }
}

fn print_summary(outcomes: &[Outcome], elapsed: Duration) {
    let mut counts: BTreeMap<Outcome, usize> = BTreeMap::new();
    for outcome in outcomes {
        *counts.entry(*outcome).or_insert(0) += 1;
    }

    println!("\n{}", "Outcomes".bold().underline());
    for outcome in Outcome::ALL {
        let count = counts.get(&outcome).copied().unwrap_or(0);
        let share = if outcomes.is_empty() {
            0.0
        } else {
            count as f64 * 100.0 / outcomes.len() as f64
        };
        println!("  {:<10} {:>6}  ({:5.1}%)", colored_outcome(outcome), count, share);
    }
    println!(
        "  {} operations in {}",
        outcomes.len(),
        humantime::format_duration(Duration::from_millis(elapsed.as_millis() as u64))
    );
}

fn print_statistics(engine: &ResilienceEngine, statistics: &Statistics) {
    if !statistics.failures_by_category.is_empty() {
        println!("\n{}", "Failures by category".bold().underline());
        for (category, count) in &statistics.failures_by_category {
            println!("  {:<14} {:>6}", category.to_string(), count);
        }
    }

    println!("\n{}", "Recovery strategies".bold().underline());
    for stats in engine.strategy_stats() {
        println!(
            "  {:<24} {:>5} attempts {:>5} successes  ({:.0}%)",
            stats.id,
            stats.attempts,
            stats.successes,
            stats.success_rate * 100.0
        );
    }

    println!("\n{}", "Fallback modes".bold().underline());
    for stats in engine.fallback_stats() {
        println!(
            "  {:<24} priority {:>3}  {:>5} activations {:>5} failures",
            stats.id, stats.priority, stats.activations, stats.failures
        );
    }

    for pattern in &statistics.patterns {
        println!(
            "\n{} {} failures in {} within {} (threshold {})",
            "⚠ Pattern:".yellow().bold(),
            pattern.count,
            pattern.category,
            humantime::format_duration(pattern.window),
            pattern.threshold
        );
    }
}

fn show_config(config: &EngineConfig, path: Option<&Path>) -> Result<()> {
    let source = path
        .map(Path::to_path_buf)
        .or_else(EngineConfig::default_path)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<defaults>".to_string());

    eprintln!("{} {}", "Configuration file:".dimmed(), source.dimmed());
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn list_archive(path: &Path, limit: usize, json: bool, prune: Option<Duration>) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Archive {} does not exist", path.display());
    }
    let archive = ReportArchive::open(Some(path))?;

    if let Some(age) = prune {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(age).context("Prune age is out of range")?;
        let deleted = archive.prune_older_than(cutoff)?;
        println!("Pruned {} reports sealed before {}", deleted, cutoff.to_rfc3339());
    }

    let reports = archive.recent(limit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }

    println!(
        "{} ({} reports, showing {})",
        path.display().to_string().bold(),
        archive.count()?,
        reports.len()
    );
    for report in &reports {
        print_report_line(report);
    }

    Ok(())
}

fn print_report_line(report: &ErrorReport) {
    let outcome = report
        .outcome
        .map(colored_outcome)
        .unwrap_or_else(|| "OPEN".normal());
    let sealed = report
        .sealed_at
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default();
    let last_error = report
        .last_error()
        .map(|e| e.kind.to_string())
        .unwrap_or_else(|| "-".to_string());

    println!(
        "  {}  {:<10} {:<36} {:<14} entries={:<3} last_error={}",
        sealed,
        outcome,
        report.operation_id,
        report.actor,
        report.entries.len(),
        last_error
    );
}
