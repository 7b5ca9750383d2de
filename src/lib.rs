//! Pagegrab Core Library
//!
//! Drives a real browser through a list of links, starts each download the
//! way a user would, and decides from the output directory alone when each
//! file is finished and which file belongs to which link.
//!
//! # Architecture
//!
//! - [`automation`] - browser capability trait, Chrome adapter, click strategies
//! - [`link`] - link parsing, normalization and extraction from pages
//! - [`session`] - browser session lifecycle with refresh and retry
//! - [`download`] - completion detection, duplicate resolution, verification, orchestration
//! - [`stats`] - run outcomes and aggregate counters
//! - [`manifest`] - per-directory record of finished downloads
//! - [`config`] - run settings and the JSON settings file

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod automation;
pub mod config;
pub mod download;
pub mod link;
pub mod manifest;
pub mod session;
pub mod stats;

// Re-export commonly used types
pub use automation::{Automation, AutomationError, BrowserOptions, ChromeFactory, SessionFactory};
pub use config::{Config, ConfigError};
pub use download::{Orchestrator, RunError, TaskError, TaskState};
pub use link::{Link, LinkError, parse_url_list};
pub use stats::{StatsSnapshot, TaskOutcome};
