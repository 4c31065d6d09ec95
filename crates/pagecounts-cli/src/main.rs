mod commands;
mod logging;
mod progress;

use std::fs::File;
use std::io::{self, BufWriter};
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use pagecounts_core::engine::DayResult;
use pagecounts_core::extract::{self, KeywordQuery};
use pagecounts_core::{AppConfig, ArtifactStore, DayFilter, DayOutcome, Pipeline};
use progress::CliReporter;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

fn main() -> Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let mut config = match pagecounts_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();
    if let Some(start) = args.start {
        config.start = start;
    }
    if let Some(end) = args.end {
        config.end = end;
    }
    let filter = DayFilter::matching(args.day.unwrap_or_default());

    let result = match args.command {
        Some(Commands::Run) => run_pipeline(config, &filter),
        Some(Commands::Fetch) => run_fetch(config, &filter),
        Some(Commands::Verify { bad_list }) => run_verify(config, &filter, &bad_list),
        Some(Commands::Aggregate) => run_aggregate(config, &filter),
        Some(Commands::Extract {
            keywords,
            domains,
            output,
        }) => run_extract(&config, &filter, &keywords, domains, output),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {:#}", err);
        process::exit(1);
    }

    Ok(())
}

fn pipeline(config: AppConfig) -> Result<Pipeline> {
    Pipeline::with_http(config).context("Could not set up the pipeline")
}

fn run_pipeline(config: AppConfig, filter: &DayFilter) -> Result<()> {
    let pipeline = pipeline(config)?;
    let reporter = CliReporter::new();
    let summary = pipeline.run(filter, &reporter)?;

    println!();
    info!(
        "Fetch: {}, Aggregate: {}",
        format!("{:.2}s", summary.fetch.duration.as_secs_f64()).green(),
        format!("{:.2}s", summary.aggregate_duration.as_secs_f64()).green(),
    );
    info!(
        "{} files fetched, {} fetch failures",
        format!("{}", summary.fetch.fetched.len()).green(),
        format!("{}", summary.fetch.failures.len()).red(),
    );
    for failure in &summary.fetch.failures {
        warn!("  {}: {}", failure.id.file_name(), failure.error);
    }
    info!(
        "{} days persisted ({} with warnings), {} already done, {} failed",
        format!("{}", summary.persisted()).green(),
        format!("{}", summary.incomplete()).yellow(),
        format!("{}", summary.skipped()).cyan(),
        format!("{}", summary.failed()).red(),
    );
    print_failed_days(&summary.days);

    Ok(())
}

fn run_fetch(config: AppConfig, filter: &DayFilter) -> Result<()> {
    let pipeline = pipeline(config)?;
    let reporter = CliReporter::new();
    let summary = pipeline.fetch(filter, &reporter)?;

    info!(
        "{} files fetched, {} failures in {}",
        format!("{}", summary.fetched.len()).green(),
        format!("{}", summary.failures.len()).red(),
        format!("{:.2}s", summary.duration.as_secs_f64()).green(),
    );
    for failure in &summary.failures {
        warn!("  {}: {}", failure.id.file_name(), failure.error);
    }
    Ok(())
}

fn run_verify(config: AppConfig, filter: &DayFilter, bad_list: &Path) -> Result<()> {
    let pipeline = pipeline(config)?;
    let reporter = CliReporter::new();
    let audit = pipeline.audit(filter, &reporter)?;

    for failure in &audit.manifest_failures {
        error!("{}", failure);
    }
    for name in &audit.missing_entries {
        warn!("No checksum entry for {}", name);
    }
    audit
        .write_bad_list(bad_list)
        .with_context(|| format!("Could not write {}", bad_list.display()))?;

    info!(
        "{} files checked: {} verified, {} corrupted, {} unreadable, {} without checksum",
        audit.checked,
        format!("{}", audit.verified).green(),
        format!("{}", audit.corrupted.len()).red(),
        format!("{}", audit.unreadable.len()).red(),
        format!("{}", audit.missing_entries.len()).yellow(),
    );
    info!("Bad file list written to {}", bad_list.display());
    Ok(())
}

fn run_aggregate(config: AppConfig, filter: &DayFilter) -> Result<()> {
    let pipeline = pipeline(config)?;
    let reporter = CliReporter::new();
    let days = pipeline.aggregate_local(filter, &reporter)?;

    let persisted = days
        .iter()
        .filter(|d| matches!(d.outcome, DayOutcome::Persisted { .. }))
        .count();
    let skipped = days
        .iter()
        .filter(|d| matches!(d.outcome, DayOutcome::AlreadyComplete))
        .count();
    info!(
        "{} days persisted, {} already done, {} failed",
        format!("{}", persisted).green(),
        format!("{}", skipped).cyan(),
        format!("{}", days.len() - persisted - skipped).red(),
    );
    print_failed_days(&days);
    Ok(())
}

fn run_extract(
    config: &AppConfig,
    filter: &DayFilter,
    keywords: &Path,
    domains: Vec<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut query = KeywordQuery::new(extract::load_keywords(keywords)?);
    if !domains.is_empty() {
        query = query.with_domains(domains);
    }

    let artifacts: Vec<PathBuf> = ArtifactStore::new(&config.artifact_dir)
        .list()?
        .into_iter()
        .filter(|(date, _)| filter.accepts(*date))
        .map(|(_, path)| path)
        .collect();
    info!(
        "Searching {} artifacts for {} articles...",
        artifacts.len(),
        query.len()
    );

    let rows = extract::extract(&query, &artifacts)?;
    match output {
        Some(path) => {
            let file = File::create(&path)
                .with_context(|| format!("Could not create {}", path.display()))?;
            extract::write_rows(&rows, BufWriter::new(file))?;
            info!(
                "{} matching rows written to {}",
                format!("{}", rows.len()).green(),
                path.display()
            );
        }
        None => extract::write_rows(&rows, io::stdout().lock())?,
    }
    Ok(())
}

fn print_failed_days(days: &[DayResult]) {
    for day in days {
        if let DayOutcome::Failed { reason } = &day.outcome {
            error!("{} failed: {}", day.date.format("%Y%m%d"), reason);
        }
    }
}
