//! CI-failure triage engine for a Buildkite-hosted test pipeline.
//!
//! Two pipelines share a log parser and fingerprint normalizer:
//!
//! - a single-build scan (`scanner`) that collects jobs and logs, extracts
//!   failures, classifies and deduplicates them, and composes a
//!   [`models::ScanResult`];
//! - a test-history timeline (`history`) that walks the N most recent
//!   builds of a branch for one test id and statistically assesses the
//!   resulting pass/fail sequence (`assessor`).
//!
//! `dispatcher` exposes both as a small set of named operations a thin CLI
//! or tool-serving frontend can invoke directly.

pub mod assessor;
pub mod budget;
pub mod buildkite;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod failure_key;
pub mod fingerprint;
pub mod github_search;
pub mod history;
pub mod log_parser;
pub mod models;
pub mod owners;
pub mod render;
pub mod scanner;

pub use error::CiWatchError;
