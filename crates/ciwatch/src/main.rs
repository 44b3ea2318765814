//! CLI entry point for the CI-failure triage engine.
//!
//! Thin dispatcher: parses a subcommand per Tool Dispatcher operation,
//! builds the Buildkite/GitHub collaborators from the environment, and
//! prints the operation's result as JSON (or a colored text rendering for
//! the two `render`-shaped outputs).

use anyhow::Result;
use ciwatch::buildkite::BuildkiteClient;
use ciwatch::config::{Config, DEFAULT_BRANCH, DEFAULT_REPO};
use ciwatch::dispatcher::{Dispatcher, DispatcherConfig, JobMatchStrategy, RenderFormat};
use ciwatch::github_search::GitHubSearchClient;
use ciwatch::models::DetailLevel;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ciwatch")]
#[command(about = "CI-failure triage engine for a Buildkite-hosted test pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format for machine-readable results.
    #[arg(long, default_value = "json", global = true)]
    format: OutputFormat,

    /// Enable verbose (debug-level) logging.
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Json,
    Text,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan the most recent nightly build on a branch.
    ScanLatestNightly {
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        search_github: bool,
        #[arg(long, default_value = "summary")]
        detail_level: DetailLevelArg,
        #[arg(long)]
        max_failures: Option<usize>,
    },
    /// Scan an explicit build (a bare build number or a Buildkite build URL).
    ScanBuild {
        build_id_or_url: String,
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long)]
        search_github: bool,
        #[arg(long, default_value = "summary")]
        detail_level: DetailLevelArg,
        #[arg(long)]
        max_failures: Option<usize>,
    },
    /// Reconstruct one test's pass/fail timeline across recent builds.
    TestHistory {
        nodeid: String,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long, default_value = "50")]
        lookback_builds: usize,
        #[arg(long)]
        job_filter: Option<String>,
        #[arg(long, default_value = "true")]
        include_logs: bool,
    },
    /// Look up a test's status in the pre-aggregated analytics suite.
    TestHistoryAnalytics {
        test_name_or_nodeid: String,
        #[arg(long, default_value = "ci-1")]
        suite_slug: String,
    },
    /// Extract test failures from one specific job's log.
    GetJobTestFailures {
        build_ref: String,
        job_name_or_id: String,
        #[arg(long)]
        pipeline: Option<String>,
        #[arg(long, default_value = "fuzzy")]
        match_strategy: JobMatchStrategyArg,
    },
    /// Resolve a batch of nodeids against the analytics suite in one call.
    GetTestAnalyticsBulk {
        nodeids: Vec<String>,
        #[arg(long, default_value = "ci-1")]
        suite_slug: String,
    },
    /// Render a previously captured `ScanResult` JSON file as text.
    Render {
        /// Path to a JSON file holding a `ScanResult` (as produced by
        /// `scan-build --detail-level full`).
        scan_result_path: PathBuf,
        #[arg(long, default_value = "daily_findings")]
        render_format: RenderFormatArg,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum RenderFormatArg {
    DailyFindings,
    Standup,
}

impl From<RenderFormatArg> for RenderFormat {
    fn from(v: RenderFormatArg) -> Self {
        match v {
            RenderFormatArg::DailyFindings => RenderFormat::DailyFindings,
            RenderFormatArg::Standup => RenderFormat::Standup,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum DetailLevelArg {
    Minimal,
    Summary,
    Full,
}

impl From<DetailLevelArg> for DetailLevel {
    fn from(v: DetailLevelArg) -> Self {
        match v {
            DetailLevelArg::Minimal => DetailLevel::Minimal,
            DetailLevelArg::Summary => DetailLevel::Summary,
            DetailLevelArg::Full => DetailLevel::Full,
        }
    }
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum JobMatchStrategyArg {
    Exact,
    Fuzzy,
    Id,
}

impl From<JobMatchStrategyArg> for JobMatchStrategy {
    fn from(v: JobMatchStrategyArg) -> Self {
        match v {
            JobMatchStrategyArg::Exact => JobMatchStrategy::Exact,
            JobMatchStrategyArg::Fuzzy => JobMatchStrategy::Fuzzy,
            JobMatchStrategyArg::Id => JobMatchStrategy::Id,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_error(format: OutputFormat, error: &str) {
    match format {
        OutputFormat::Json => {
            let _ = print_json(&serde_json::json!({ "error": error }));
        }
        OutputFormat::Text => println!("{} {}", "error:".red().bold(), error),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tracing_subscriber::fmt().with_env_filter("ciwatch=debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("ciwatch=info").init();
    }

    let config = Config::from_env()?;
    let buildkite = BuildkiteClient::new(&config.buildkite_token, &config.buildkite_org)?;
    let github = config
        .github_token
        .as_deref()
        .map(GitHubSearchClient::new)
        .transpose()?;
    let github_ref = github
        .as_ref()
        .map(|g| g as &dyn ciwatch::github_search::GitHubIssueSearch);
    let dispatcher = Dispatcher::new(&buildkite, github_ref);

    let repo_path: Option<PathBuf> = config.repo_path.as_ref().map(PathBuf::from);

    match cli.command {
        Commands::ScanLatestNightly {
            pipeline,
            branch,
            repo,
            search_github,
            detail_level,
            max_failures,
        } => {
            let pipeline = pipeline.unwrap_or_else(|| config.default_pipeline());
            let branch = branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            let repo = repo.unwrap_or_else(|| DEFAULT_REPO.to_string());
            let result = dispatcher
                .scan_latest_nightly(
                    &pipeline,
                    &branch,
                    DispatcherConfig {
                        repo,
                        repo_path,
                        search_github,
                    },
                    detail_level.into(),
                    max_failures,
                )
                .await;
            match result {
                Ok(projection) => print_json(&projection)?,
                Err(e) => print_error(cli.format, &e.error),
            }
        }
        Commands::ScanBuild {
            build_id_or_url,
            pipeline,
            repo,
            search_github,
            detail_level,
            max_failures,
        } => {
            let pipeline = pipeline.unwrap_or_else(|| config.default_pipeline());
            let repo = repo.unwrap_or_else(|| DEFAULT_REPO.to_string());
            let result = dispatcher
                .scan_build(
                    &build_id_or_url,
                    &pipeline,
                    DispatcherConfig {
                        repo,
                        repo_path,
                        search_github,
                    },
                    detail_level.into(),
                    max_failures,
                )
                .await;
            match result {
                Ok(projection) => print_json(&projection)?,
                Err(e) => print_error(cli.format, &e.error),
            }
        }
        Commands::TestHistory {
            nodeid,
            branch,
            pipeline,
            lookback_builds,
            job_filter,
            include_logs,
        } => {
            let pipeline = pipeline.unwrap_or_else(|| config.default_pipeline());
            let branch = branch.unwrap_or_else(|| DEFAULT_BRANCH.to_string());
            let result = dispatcher
                .test_history(&nodeid, &pipeline, &branch, lookback_builds, job_filter, include_logs)
                .await;
            match result {
                Ok(history) => print_json(&history)?,
                Err(e) => print_error(cli.format, &e.error),
            }
        }
        Commands::TestHistoryAnalytics {
            test_name_or_nodeid,
            suite_slug,
        } => {
            let result = dispatcher
                .test_history_analytics(&test_name_or_nodeid, &suite_slug)
                .await;
            match result {
                Ok(analytics) => print_json(&analytics)?,
                Err(e) => print_error(cli.format, &e.error),
            }
        }
        Commands::GetJobTestFailures {
            build_ref,
            job_name_or_id,
            pipeline,
            match_strategy,
        } => {
            let pipeline = pipeline.unwrap_or_else(|| config.default_pipeline());
            let result = dispatcher
                .get_job_test_failures(&build_ref, &job_name_or_id, &pipeline, match_strategy.into())
                .await;
            match result {
                Ok(failures) => print_json(&failures)?,
                Err(e) => print_error(cli.format, &e.error),
            }
        }
        Commands::GetTestAnalyticsBulk { nodeids, suite_slug } => {
            let result = dispatcher.get_test_analytics_bulk(&nodeids, &suite_slug).await;
            match result {
                Ok(bulk) => print_json(&bulk)?,
                Err(e) => print_error(cli.format, &e.error),
            }
        }
        Commands::Render {
            scan_result_path,
            render_format,
        } => {
            let contents = std::fs::read_to_string(&scan_result_path)?;
            let scan_result: ciwatch::models::ScanResult = serde_json::from_str(&contents)?;
            println!("{}", dispatcher.render(&scan_result, render_format.into()));
        }
    }

    Ok(())
}
