mod commands;
mod export;
mod logging;
mod progress;
mod scan;
mod view;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, bail, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use dupe_sieve_core::config::{load_configuration, load_configuration_from};
use dupe_sieve_core::{
    AppConfig, DeliveryBatcher, DetectionJob, DetectionOutcome, DetectionPipeline,
    FilenameParser, ResultRouter, ResultStore, RunStatus,
};
use progress::CliReporter;
use tracing::{error, info, warn};
use view::DeliveredView;

/// Groups listed in the terminal summary; the exports always hold all of them.
const SUMMARY_GROUP_LIMIT: usize = 25;

fn main() {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    let loaded = match &args.config {
        Some(path) => load_configuration_from(path),
        None => load_configuration(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    match args.command {
        Some(Commands::Detect {
            paths,
            csv,
            json,
            no_hash,
        }) => {
            if let Err(err) = run_detect(&config, paths, csv, json, no_hash) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::Parse { names }) => run_parse(&names),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:#?}", config);
        }
        None => {
            let _ = Cli::command().print_long_help();
        }
    }
}

fn run_detect(
    config: &AppConfig,
    paths: Vec<String>,
    csv: Option<PathBuf>,
    json: Option<PathBuf>,
    no_hash: bool,
) -> Result<()> {
    let requested = if paths.is_empty() {
        &config.root_paths
    } else {
        &paths
    };
    let roots: Vec<String> = requested
        .iter()
        .map(|root| scan::canonical_root(root))
        .collect();

    let spinner = progress::scan_spinner("Scanning files...");
    let scan_start = Instant::now();
    let scanned = scan::scan(&roots, &config.ignore_patterns, !no_hash);
    spinner.finish_and_clear();
    let records = scanned?;
    eprintln!(
        "  \x1b[32m✓\x1b[0m Scan complete: {} files in {:.2}s",
        records.len(),
        scan_start.elapsed().as_secs_f64()
    );

    let detector = config.detector.clone();
    let store = Arc::new(ResultStore::new(detector.store_lock_timeout()));
    let (tx, rx) = crossbeam_channel::unbounded();
    let batcher = Arc::new(DeliveryBatcher::new(detector.batch_policy(), tx)?);
    let router = Arc::new(ResultRouter::new(Arc::clone(&store), Arc::clone(&batcher)));

    let consumer = thread::Builder::new()
        .name("dupe-sieve-view".to_string())
        .spawn(move || {
            let mut view = DeliveredView::default();
            for event in rx {
                view.apply(event);
            }
            view
        })?;

    let handle = DetectionJob::new(DetectionPipeline::new(detector), records, router)
        .with_reporter(Arc::new(CliReporter::new()))
        .spawn()?;
    let outcome = handle.join();

    batcher.shutdown();
    drop(batcher);
    let view = consumer
        .join()
        .map_err(|_| anyhow!("delivery consumer panicked"))?;

    match outcome.status {
        RunStatus::Completed => {}
        RunStatus::Cancelled => warn!("Detection was cancelled; results are partial"),
        RunStatus::Failed => bail!(
            "detection failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
    }

    print_summary(&outcome, &view);

    if let Some(path) = csv {
        let written = export::write_csv(&path, view.rows())?;
        info!("Wrote {} rows to {}", written, path.display());
    }
    if let Some(path) = json {
        export::write_json(&path, &outcome)?;
        info!("Wrote {} groups to {}", outcome.groups.len(), path.display());
    }
    Ok(())
}

fn print_summary(outcome: &DetectionOutcome, view: &DeliveredView) {
    let stats = &outcome.stats;
    println!();
    for group in view.groups().iter().take(SUMMARY_GROUP_LIMIT) {
        println!(
            "{} {} conf {:.2}, {} bytes savable",
            format!("#{}", group.group_id()).bold(),
            format!("{:?}", group.group_type()).to_uppercase().yellow(),
            group.confidence(),
            group.bytes_savable()
        );
        for &id in group.member_ids() {
            let path = view.row(id).map_or("?", |row| row.short_path.as_str());
            if id == group.canonical_id() {
                println!("    {} {}", "keep".green(), path);
            } else {
                println!("    {} {}", "    ".normal(), path.dimmed());
            }
        }
    }
    if view.groups().len() > SUMMARY_GROUP_LIMIT {
        println!("    ... and {} more groups", view.groups().len() - SUMMARY_GROUP_LIMIT);
    }

    let timings: Vec<String> = stats
        .timings
        .iter()
        .map(|t| format!("{} {:.2}s", t.stage.name(), t.seconds))
        .collect();
    info!("{}", timings.join(", ").green());
    info!(
        "{} files, {} blocks, {} comparisons, {} edges",
        format!("{}", stats.files).cyan(),
        format!("{}", stats.blocks).cyan(),
        format!("{}", stats.comparisons).cyan(),
        format!("{}", stats.edges).cyan(),
    );
    info!(
        "{} duplicate groups, {} bytes savable ({} delivery events)",
        format!("{}", stats.groups).red(),
        format!("{}", stats.bytes_savable).red(),
        view.events(),
    );
}

fn run_parse(names: &[String]) {
    let parser = FilenameParser::new();
    for name in names {
        let parsed = parser.parse(name);
        println!("{}", name.bold());
        println!("    title      {}", parsed.title.cyan());
        for segment in &parsed.segments {
            let label = segment.label.as_deref().unwrap_or("-");
            println!(
                "    segment    {:?} {}-{} unit {:?} label {}",
                segment.kind, segment.start, segment.end, segment.unit, label
            );
        }
        if !parsed.tags.is_empty() {
            let tags: Vec<String> = parsed.tags.iter().map(|tag| tag.to_string()).collect();
            println!("    tags       {}", tags.join(", "));
        }
        println!(
            "    confidence {:.2} ({:?})",
            parsed.confidence, parsed.method
        );
    }
}
