//! CLI entry point for pagegrab.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use pagegrab_core::config::DEFAULT_SETTINGS_FILE;
use pagegrab_core::download::clean_incomplete_files;
use pagegrab_core::link::dedup_links;
use pagegrab_core::{
    BrowserOptions, ChromeFactory, Config, Link, Orchestrator, StatsSnapshot, parse_url_list,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

mod cli;
mod progress;

use cli::Args;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = load_config(&args)?;
    let output_dir = config.output_directory()?.to_path_buf();

    if args.clean_only {
        std::fs::create_dir_all(&output_dir)
            .with_context(|| format!("cannot create {}", output_dir.display()))?;
        let removed = clean_incomplete_files(&output_dir)
            .with_context(|| format!("cannot clean {}", output_dir.display()))?;
        for name in &removed {
            println!("removed {name}");
        }
        println!("{} incomplete file(s) removed", removed.len());
        return Ok(ExitCode::SUCCESS);
    }

    let mut links = read_links(&args)?;
    if links.is_empty() && args.page.is_none() {
        info!("No input provided. Pass URLs as arguments, with --input-file, or via stdin.");
        info!("Example: pagegrab -o ./downloads https://example.com/file.zip");
        return Ok(ExitCode::SUCCESS);
    }

    let download_dir = std::path::absolute(&output_dir)
        .with_context(|| format!("cannot resolve {}", output_dir.display()))?;
    let options = BrowserOptions {
        headless: config.headless,
        block_images: config.block_images,
        download_dir,
        executable: config.chrome_executable.clone(),
    };
    let factory = ChromeFactory::new(options);

    let cancel = CancellationToken::new();
    let mut orchestrator = Orchestrator::new(config, Arc::new(factory))?
        .with_cancellation(cancel.clone());

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping");
            cancel.cancel();
        }
    });

    if let Some(page) = &args.page {
        let page = Link::parse(page).with_context(|| format!("invalid page URL {page}"))?;
        links.extend(orchestrator.discover_links(&page).await?);
    }
    let links = dedup_links(links);
    info!(links = links.len(), output_dir = %output_dir.display(), "starting downloads");

    let use_spinner = !args.quiet && io::stderr().is_terminal();
    let (progress, stop) =
        progress::spawn_progress_ui(use_spinner, orchestrator.subscribe(), links.len());

    let result = orchestrator.run(links).await;

    stop.cancel();
    if let Some(handle) = progress {
        let _ = handle.await;
    }

    match result {
        Ok(snapshot) => {
            print_summary(&snapshot);
            Ok(if snapshot.failed == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Err(e) => {
            if let Some(snapshot) = e.snapshot() {
                print_summary(snapshot);
            }
            Err(e.into())
        }
    }
}

/// Settings file, then flag overrides, then validation. Saves when asked.
fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(Path::new(DEFAULT_SETTINGS_FILE))?,
    };
    args.apply_to(&mut config);
    config.validate()?;

    if args.save_config {
        let path = args
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
        config.save(&path)?;
        info!(path = %path.display(), "settings saved");
    }
    Ok(config)
}

/// Links from positional arguments, the input file, or stdin.
fn read_links(args: &Args) -> Result<Vec<Link>> {
    let mut text = args.urls.join("\n");
    if let Some(path) = &args.input_file {
        let file = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read input file {}", path.display()))?;
        text.push('\n');
        text.push_str(&file);
    } else if args.urls.is_empty() && args.page.is_none() && !io::stdin().is_terminal() {
        io::stdin().read_to_string(&mut text)?;
    }

    let parsed = parse_url_list(&text);
    for rejected in &parsed.rejected {
        warn!(input = %rejected, "Skipped unusable URL");
    }
    debug!(links = parsed.links.len(), rejected = parsed.rejected.len(), "Parsed input");
    Ok(parsed.links)
}

fn print_summary(snapshot: &StatsSnapshot) {
    println!(
        "completed: {}, skipped: {}, failed: {}",
        snapshot.succeeded, snapshot.skipped, snapshot.failed
    );
    for failure in snapshot.failures() {
        println!(
            "  FAILED {} ({}, {:.1}s): {}",
            failure.link,
            failure.reason,
            failure.elapsed.as_secs_f64(),
            failure.message
        );
    }
}
