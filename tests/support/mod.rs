//! Shared test support for orchestrator integration tests.

pub mod fake_browser;
