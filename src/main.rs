use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::{error, info, warn};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

mod cli;
mod config;

use cli::Cli;
use cli::commands::{ClassifyArgs, Commands};
use config::Config;
use floodnel::checkpoint::is_output_path;
use floodnel::domain::{ClassificationStatus, Platform};
use floodnel::llm::OllamaClassifier;
use floodnel::runner::{RunController, RunOptions, RunOutcome, RunSummary};
use floodnel::scheduler::RowEvent;
use floodnel::store::RowStore;

/// Exit status for load errors and aborted runs
const EXIT_FATAL: i32 = 2;

/// Exit status after an operator interrupt
const EXIT_INTERRUPTED: i32 = 130;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("floodnel")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("floodnel.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let default_level = if verbose {
        "debug".to_string()
    } else {
        config.log_level.clone().unwrap_or_else(|| "info".to_string())
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Cancel `cancel` on SIGINT or SIGTERM; a second signal exits immediately
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        warn!("Shutdown signal received");
        eprintln!(
            "{}",
            "Interrupt received: finishing in-flight rows and saving progress (press again to force quit)".yellow()
        );
        cancel.cancel();

        shutdown_signal().await;
        eprintln!("{}", "Forced exit".red());
        std::process::exit(EXIT_INTERRUPTED);
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Print per-row progress until every sender is gone
fn spawn_progress_printer(mut rx: UnboundedReceiver<RowEvent>, verbose: bool) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RowEvent::Started { id } => {
                    if verbose {
                        println!("{} {}", "→".cyan(), id);
                    }
                }
                RowEvent::Retrying {
                    id,
                    attempt,
                    delay,
                    reason,
                } => {
                    if verbose {
                        println!(
                            "{} {} attempt {} failed ({}), retrying in {:.1}s",
                            "↻".yellow(),
                            id,
                            attempt,
                            reason,
                            delay.as_secs_f64()
                        );
                    }
                }
                RowEvent::Done { id, attempts, present } => {
                    let labels = if present.is_empty() {
                        "no loss signals".dimmed().to_string()
                    } else {
                        present.iter().map(|t| t.as_str()).collect::<Vec<_>>().join(", ")
                    };
                    let retries = if attempts > 1 {
                        format!(" ({} attempts)", attempts).dimmed().to_string()
                    } else {
                        String::new()
                    };
                    println!("{} {} {}{}", "✓".green(), id, labels, retries);
                }
                RowEvent::Failed { id, attempts, reason } => {
                    println!("{} {} after {} attempt(s): {}", "✗".red(), id, attempts, reason);
                }
                RowEvent::Checkpointed { done, total } => {
                    println!("{} {}/{} rows done", "checkpoint".blue(), done, total);
                }
            }
        }
    })
}

fn build_controller(config: &Config, args: &ClassifyArgs) -> Result<RunController> {
    let mut ollama = config.ollama_config();
    if let Some(model) = &args.model {
        ollama.model = model.clone();
    }
    if let Some(base_url) = &args.base_url {
        ollama.base_url = base_url.clone();
    }
    if let Some(media_root) = &args.media_root {
        ollama.media_root = Some(media_root.clone());
    }
    let classifier = OllamaClassifier::new(ollama).context("Failed to create classifier")?;

    let mut scheduler = config.scheduler_config();
    if let Some(n) = args.max_concurrent {
        scheduler.max_concurrent = n.max(1);
    }

    Ok(RunController::new(Arc::new(classifier), scheduler)
        .with_checkpoint_every(config.checkpoint.every_rows)
        .with_marker(config.checkpoint.marker.clone())
        .with_warm_up(config.classifier.warm_up))
}

fn run_options(input: &Path, output: Option<&PathBuf>, args: &ClassifyArgs, config: &Config) -> RunOptions {
    RunOptions {
        input: input.to_path_buf(),
        output: output.cloned(),
        start_offset: args.start_offset.unwrap_or(config.run.start_offset),
        max_rows: args.max_rows.or(config.run.max_rows),
        resume: config.run.resume && !args.overwrite,
        columns: config.columns_for(args.platform),
    }
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("{}", "Run summary".bold());
    println!(
        "  {} total, {} done, {} failed, {} pending",
        summary.total,
        summary.done.to_string().green(),
        summary.failed.to_string().red(),
        summary.pending.to_string().yellow()
    );
    println!(
        "  {} resumed, {} processed in {:.1}s",
        summary.resumed,
        summary.processed,
        summary.elapsed.as_secs_f64()
    );
    if summary.skipped > 0 {
        println!("  {} skipped (no text and no media)", summary.skipped);
    }
    println!("  output: {}", summary.output.display());

    if !summary.failures.is_empty() {
        println!("{}", "Failures:".red());
        for (id, reason) in summary.failures.iter().take(20) {
            println!("  {}: {}", id, reason);
        }
        if summary.failures.len() > 20 {
            println!("  ... and {} more", summary.failures.len() - 20);
        }
    }

    if summary.outcome == RunOutcome::Interrupted {
        println!("{}", "Interrupted: run the same command again to resume".yellow());
    }
}

/// Run one file and map the result to an exit status
async fn classify_file(
    input: &Path,
    output: Option<&PathBuf>,
    args: &ClassifyArgs,
    cli: &Cli,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<i32> {
    let (tx, rx) = mpsc::unbounded_channel();
    let printer = spawn_progress_printer(rx, cli.is_verbose());

    let controller = build_controller(config, args)?.with_events(tx);
    let options = run_options(input, output, args, config);

    println!(
        "{} {} ({}) -> {}",
        "Classifying".cyan(),
        input.display(),
        args.platform,
        controller.output_path(&options).display()
    );

    let result = controller.run(&options, cancel).await;
    drop(controller);
    printer.await.context("Progress printer failed")?;

    match result {
        Ok(summary) => {
            print_summary(&summary);
            Ok(summary.exit_code())
        }
        Err(e) => {
            error!("Run for {} failed: {}", input.display(), e);
            eprintln!("{} {}", "Error:".red(), e);
            Ok(EXIT_FATAL)
        }
    }
}

/// Expand glob patterns to a sorted, de-duplicated file list without outputs
fn expand_patterns(patterns: &[String], marker: &str) -> Result<Vec<PathBuf>> {
    let mut files = BTreeSet::new();
    for pattern in patterns {
        let paths = glob::glob(pattern).context(format!("Invalid glob pattern: {}", pattern))?;
        for entry in paths {
            match entry {
                Ok(path) if path.is_file() && !is_output_path(&path, marker) => {
                    files.insert(path);
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable path: {}", e),
            }
        }
    }
    Ok(files.into_iter().collect())
}

async fn handle_batch(
    patterns: &[String],
    args: &ClassifyArgs,
    cli: &Cli,
    config: &Config,
    cancel: &CancellationToken,
) -> Result<i32> {
    let files = expand_patterns(patterns, &config.checkpoint.marker)?;
    if files.is_empty() {
        println!("{}", "No input files matched".yellow());
        return Ok(0);
    }

    info!("Batch of {} files", files.len());
    let mut worst = 0;
    for (n, input) in files.iter().enumerate() {
        println!("{} [{}/{}]", "Batch".bold(), n + 1, files.len());
        let code = classify_file(input, None, args, cli, config, cancel).await?;
        worst = worst.max(code);
        if cancel.is_cancelled() {
            worst = EXIT_INTERRUPTED;
            break;
        }
    }
    Ok(worst)
}

fn handle_status(output: &Path, platform: Platform, config: &Config) -> Result<i32> {
    let store = RowStore::load(output, &config.columns_for(platform))
        .context(format!("Failed to read {}", output.display()))?;
    let counts = store.counts();

    println!("{} {}", "Status for:".green(), output.display());
    println!("  {:<8} {}", "DONE", counts.done.to_string().green());
    println!("  {:<8} {}", "FAILED", counts.failed.to_string().red());
    println!("  {:<8} {}", "PENDING", (counts.pending + counts.in_progress).to_string().yellow());
    println!("  {:<8} {}", "TOTAL", counts.total());

    let failures: Vec<_> = store
        .rows()
        .iter()
        .filter(|r| r.status == ClassificationStatus::Failed)
        .collect();
    if !failures.is_empty() {
        println!("{}", "Failures:".red());
        for row in failures {
            println!("  {}: {}", row.id, row.error_detail.as_deref().unwrap_or(""));
        }
    }
    Ok(0)
}

async fn run_application(cli: &Cli, config: &Config) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let cancel = CancellationToken::new();

    match &cli.command {
        Commands::Run { input, output, args } => {
            spawn_signal_handler(cancel.clone());
            classify_file(input, output.as_ref(), args, cli, config, &cancel).await
        }
        Commands::Batch { patterns, args } => {
            spawn_signal_handler(cancel.clone());
            handle_batch(patterns, args, cli, config, &cancel).await
        }
        Commands::Status { output, platform } => handle_status(output, *platform, config),
    }
}

#[tokio::main]
async fn main() {
    let code = match try_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:?}", "Error:".red(), e);
            EXIT_FATAL
        }
    };
    std::process::exit(code);
}

async fn try_main() -> Result<i32> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    setup_logging(&config, cli.is_verbose()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    run_application(&cli, &config).await.context("Application failed")
}
