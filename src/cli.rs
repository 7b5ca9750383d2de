//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;
use pagegrab_core::Config;

/// Drive a browser through a list of download links and collect verified files.
///
/// Links come from arguments, an input file, stdin, or a page scraped with
/// `--page`. Settings are read from `pagegrab.json` (or `--config`) and
/// overridden by the flags below.
#[derive(Parser, Debug)]
#[command(name = "pagegrab")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download (reads stdin when empty and not a terminal)
    pub urls: Vec<String>,

    /// Read URLs from a text file, one or more per line
    #[arg(short = 'f', long, value_name = "FILE")]
    pub input_file: Option<PathBuf>,

    /// Collect links from this page before downloading
    #[arg(short = 'p', long, value_name = "URL")]
    pub page: Option<String>,

    /// Directory downloads are saved into
    #[arg(short = 'o', long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Settings file (default: ./pagegrab.json when present)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Maximum seconds to wait for one download (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub max_wait: Option<u64>,

    /// Recycle the browser session after this many downloads (1-10000)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10000))]
    pub refresh_every: Option<u32>,

    /// Seconds to pause between downloads
    #[arg(long)]
    pub delay: Option<f64>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,

    /// Load images in the browser
    #[arg(long)]
    pub show_images: bool,

    /// Keep only download-looking links when scraping a page
    #[arg(long)]
    pub filter_links: bool,

    /// Keep leftover incomplete downloads in the output directory
    #[arg(long)]
    pub no_clean: bool,

    /// Skip checksum computation for finished files
    #[arg(long)]
    pub no_checksum: bool,

    /// Do not read or write the output directory manifest
    #[arg(long)]
    pub no_manifest: bool,

    /// Chrome or Chromium binary to launch (detected when omitted)
    #[arg(long, value_name = "PATH")]
    pub chrome: Option<PathBuf>,

    /// Write the effective settings to the settings file
    #[arg(long)]
    pub save_config: bool,

    /// Remove incomplete downloads from the output directory and exit
    #[arg(long)]
    pub clean_only: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Applies flag overrides on top of `config`.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(dir) = &self.output_dir {
            config.output_directory = Some(dir.clone());
        }
        if let Some(max_wait) = self.max_wait {
            config.max_wait_seconds = max_wait;
        }
        if let Some(refresh) = self.refresh_every {
            config.session_refresh_count = refresh;
        }
        if let Some(delay) = self.delay {
            config.inter_download_delay_seconds = delay;
        }
        if let Some(path) = &self.chrome {
            config.chrome_executable = Some(path.clone());
        }
        if self.headed {
            config.headless = false;
        }
        if self.show_images {
            config.block_images = false;
        }
        if self.filter_links {
            config.filter_links = true;
        }
        if self.no_clean {
            config.clean_incomplete = false;
        }
        if self.no_checksum {
            config.verify_checksum = false;
        }
        if self.no_manifest {
            config.write_manifest = false;
        }
    }
}
