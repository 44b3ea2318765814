//! The Tool Dispatcher.
//!
//! A thin surface over the Scanner/HistoryEngine/Renderers: each operation
//! takes typed inputs and returns either a structured record or an
//! [`ErrorRecord`] — nothing here ever lets an error escape across the
//! boundary as a panic or an untyped `Result::Err` the caller can't render.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::budget::Budget;
use crate::buildkite::{AnalyticsTest, BuildkiteApi};
use crate::github_search::GitHubIssueSearch;
use crate::history::{HistoryEngine, HistoryEngineConfig};
use crate::log_parser;
use crate::models::{
    Assessment, DetailLevel, FailureClassification, ScanResult, TestFailure, Timeline,
};
use crate::render;
use crate::scanner::{Scanner, ScannerConfig};

/// Uniform failure shape for every dispatcher operation. `candidates` is
/// populated only by [`get_job_test_failures`]'s fuzzy/exact ambiguity
/// cases; every other operation leaves it empty.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<JobCandidate>,
}

impl ErrorRecord {
    fn message(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            candidates: Vec::new(),
        }
    }

    fn with_candidates(msg: impl Into<String>, candidates: Vec<JobCandidate>) -> Self {
        Self {
            error: msg.into(),
            candidates,
        }
    }
}

impl From<crate::error::CiWatchError> for ErrorRecord {
    fn from(e: crate::error::CiWatchError) -> Self {
        ErrorRecord::message(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JobCandidate {
    pub job_id: String,
    pub job_name: String,
}

/// `detail_level`-projected view of a [`ScanResult`], the shape every
/// `scan_*` operation returns.
#[derive(Debug, Clone, Serialize)]
pub struct ScanProjection {
    pub build_info: crate::models::BuildInfo,
    pub total_jobs: usize,
    pub failed_jobs: usize,
    pub failures: Vec<FailureClassification>,
    pub scan_timestamp: chrono::DateTime<chrono::Utc>,
    /// Rendered text views, attached only at `detail_level == full`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<RenderedViews>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenderedViews {
    pub daily_findings: String,
    pub standup_summary: String,
}

const DEFAULT_MAX_FAILURES: usize = 50;

/// Apply the detail-level projection in place, then cap the failure count
/// at `max_failures`.
fn project_detail(mut failures: Vec<FailureClassification>, level: DetailLevel, max_failures: usize) -> Vec<FailureClassification> {
    failures.truncate(max_failures);
    match level {
        DetailLevel::Minimal => {
            for f in &mut failures {
                f.failure.error_message = None;
                f.failure.stack_trace = None;
                f.failure.log_snippet = None;
                f.github_issue = None;
                f.reason.clear();
            }
        }
        DetailLevel::Summary => {
            for f in &mut failures {
                f.failure.stack_trace = None;
                if let Some(snippet) = &f.failure.log_snippet {
                    if snippet.chars().count() > 200 {
                        let truncated: String = snippet.chars().take(200).collect();
                        f.failure.log_snippet = Some(format!("{truncated}..."));
                    }
                }
            }
        }
        DetailLevel::Full => {}
    }
    failures
}

fn finish_scan(result: ScanResult, detail_level: DetailLevel, max_failures: usize) -> ScanProjection {
    let rendered = (detail_level == DetailLevel::Full).then(|| RenderedViews {
        daily_findings: render::render_daily_findings(&result),
        standup_summary: render::render_standup_summary(&result),
    });

    let failures = project_detail(result.failures, detail_level, max_failures);

    ScanProjection {
        build_info: result.build_info,
        total_jobs: result.total_jobs,
        failed_jobs: result.failed_jobs,
        failures,
        scan_timestamp: result.scan_timestamp,
        rendered,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TestHistoryResult {
    pub timeline: Timeline,
    pub assessment: Assessment,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TestHistoryAnalytics {
    pub test_id: String,
    pub test_name: String,
    pub is_flaky: bool,
    pub recently_failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalyticsMatch {
    pub nodeid: String,
    pub test: TestHistoryAnalytics,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkAnalyticsResult {
    pub results: Vec<AnalyticsMatch>,
    pub not_found: Vec<String>,
    pub multiple_matches: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMatchStrategy {
    Exact,
    Fuzzy,
    Id,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    DailyFindings,
    Standup,
}

/// Parse a nodeid / analytics test name into `(scope, name)` by splitting
/// on the first `::`, for the bulk-analytics matching rule.
fn parse_scope(identifier: &str) -> (Option<&str>, &str) {
    match identifier.split_once("::") {
        Some((scope, name)) => (Some(scope), name),
        None => (None, identifier),
    }
}

/// Strip pytest parametrization (`[...]`) from a test name, for
/// base-name comparison.
fn strip_params(name: &str) -> &str {
    name.split('[').next().unwrap_or(name)
}

fn analytics_matches(test: &AnalyticsTest, scope: Option<&str>, name: &str) -> bool {
    let scope_ok = match scope {
        Some(s) => test.scope.as_deref() == Some(s),
        None => true,
    };
    scope_ok && (test.name == name || strip_params(&test.name) == strip_params(name))
}

fn to_history_analytics(test: AnalyticsTest) -> TestHistoryAnalytics {
    TestHistoryAnalytics {
        test_id: test.id,
        test_name: test.name,
        is_flaky: test.is_flaky,
        recently_failed: test.recently_failed,
    }
}

/// Dispatcher config: what the `scan_*` operations need to construct a
/// [`Scanner`] per invocation.
pub struct DispatcherConfig {
    pub repo: String,
    pub repo_path: Option<PathBuf>,
    pub search_github: bool,
}

pub struct Dispatcher<'a> {
    api: &'a dyn BuildkiteApi,
    github: Option<&'a dyn GitHubIssueSearch>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(api: &'a dyn BuildkiteApi, github: Option<&'a dyn GitHubIssueSearch>) -> Self {
        Self { api, github }
    }

    fn scanner(&self, config: DispatcherConfig) -> Scanner<'a> {
        Scanner::new(
            self.api,
            self.github,
            ScannerConfig {
                repo: config.repo,
                repo_path: config.repo_path,
                search_github: config.search_github,
            },
        )
    }

    /// `scan_latest_nightly`: resolve the latest nightly build on `branch`
    /// and scan it.
    pub async fn scan_latest_nightly(
        &self,
        pipeline: &str,
        branch: &str,
        config: DispatcherConfig,
        detail_level: DetailLevel,
        max_failures: Option<usize>,
    ) -> Result<ScanProjection, ErrorRecord> {
        let scanner = self.scanner(config);
        let build = scanner.resolve_latest_nightly(pipeline, branch).await?;
        let result = scanner.scan_build(pipeline, &build.build_number).await?;
        Ok(finish_scan(
            result,
            detail_level,
            max_failures.unwrap_or(DEFAULT_MAX_FAILURES),
        ))
    }

    /// `scan_build`: scan an explicit build reference (a bare number or a
    /// Buildkite build URL).
    pub async fn scan_build(
        &self,
        build_id_or_url: &str,
        pipeline: &str,
        config: DispatcherConfig,
        detail_level: DetailLevel,
        max_failures: Option<usize>,
    ) -> Result<ScanProjection, ErrorRecord> {
        let build_number = crate::buildkite::parse_build_ref(build_id_or_url)
            .ok_or_else(|| ErrorRecord::message(format!("not a valid build reference: `{build_id_or_url}`")))?;
        let scanner = self.scanner(config);
        let result = scanner.scan_build(pipeline, &build_number).await?;
        Ok(finish_scan(
            result,
            detail_level,
            max_failures.unwrap_or(DEFAULT_MAX_FAILURES),
        ))
    }

    /// `test_history`: reconstruct one test id's outcome sequence across
    /// the N most recent builds of a branch and assess it.
    pub async fn test_history(
        &self,
        nodeid: &str,
        pipeline: &str,
        branch: &str,
        lookback_builds: usize,
        job_filter: Option<String>,
        include_logs: bool,
    ) -> Result<TestHistoryResult, ErrorRecord> {
        let budget = Budget::default();
        let engine = HistoryEngine::new(self.api, &budget);
        let mut timeline = engine
            .test_history(
                nodeid,
                pipeline,
                branch,
                HistoryEngineConfig {
                    lookback_builds,
                    job_filter,
                },
            )
            .await?;

        if !include_logs {
            for entry in &mut timeline {
                for job in &mut entry.jobs {
                    job.log_excerpt = None;
                }
            }
        }

        let assessment = crate::assessor::assess_test_history(&timeline);

        Ok(TestHistoryResult {
            timeline,
            assessment,
            warnings: budget.warnings(),
        })
    }

    /// `test_history_analytics`: look up one test in the pre-aggregated
    /// Buildkite analytics suite (flaky/recently-failed status), bypassing
    /// the log-mining pipeline entirely.
    pub async fn test_history_analytics(
        &self,
        test_name_or_nodeid: &str,
        suite_slug: &str,
    ) -> Result<TestHistoryAnalytics, ErrorRecord> {
        let (scope, name) = parse_scope(test_name_or_nodeid);
        let tests = self
            .api
            .list_analytics_tests(suite_slug, None, None, 200)
            .await?;

        tests
            .into_iter()
            .find(|t| analytics_matches(t, scope, name))
            .map(to_history_analytics)
            .ok_or_else(|| {
                ErrorRecord::message(format!(
                    "no analytics test matched `{test_name_or_nodeid}` in suite `{suite_slug}`"
                ))
            })
    }

    /// `get_job_test_failures`: extract test failures from one specific
    /// job's log, resolving the job by id/exact-name/fuzzy-name.
    pub async fn get_job_test_failures(
        &self,
        build_ref: &str,
        job_name_or_id: &str,
        pipeline: &str,
        match_strategy: JobMatchStrategy,
    ) -> Result<Vec<TestFailure>, ErrorRecord> {
        let build_number = crate::buildkite::parse_build_ref(build_ref)
            .ok_or_else(|| ErrorRecord::message(format!("not a valid build reference: `{build_ref}`")))?;

        let (_build_info, jobs) = self.api.get_build(pipeline, &build_number).await?;

        let job = match_job(&jobs, job_name_or_id, match_strategy)?;
        let log = self
            .api
            .get_job_log(pipeline, &build_number, &job.job_id)
            .await?;

        Ok(log_parser::extract_test_failures(&log, &job.job_name))
    }

    /// `get_test_analytics_bulk`: resolve a batch of nodeids against the
    /// analytics suite's test list in one fetch.
    pub async fn get_test_analytics_bulk(
        &self,
        nodeids: &[String],
        suite_slug: &str,
    ) -> Result<BulkAnalyticsResult, ErrorRecord> {
        let tests = self
            .api
            .list_analytics_tests(suite_slug, None, None, 500)
            .await?;

        let mut results = Vec::new();
        let mut not_found = Vec::new();
        let mut multiple_matches = Vec::new();

        for nodeid in nodeids {
            let (scope, name) = parse_scope(nodeid);
            let matches: Vec<&AnalyticsTest> = tests
                .iter()
                .filter(|t| analytics_matches(t, scope, name))
                .collect();

            match matches.len() {
                0 => not_found.push(nodeid.clone()),
                1 => results.push(AnalyticsMatch {
                    nodeid: nodeid.clone(),
                    test: to_history_analytics(matches[0].clone()),
                }),
                _ => multiple_matches.push(nodeid.clone()),
            }
        }

        let mut warnings = Vec::new();
        if !not_found.is_empty() {
            warnings.push(format!("{} nodeid(s) not found in analytics suite", not_found.len()));
        }
        if !multiple_matches.is_empty() {
            warnings.push(format!(
                "{} nodeid(s) matched more than one analytics test",
                multiple_matches.len()
            ));
        }

        Ok(BulkAnalyticsResult {
            results,
            not_found,
            multiple_matches,
            warnings,
        })
    }

    /// `render`: project a `ScanResult` into one of the two text views.
    /// Never fails — rendering is a pure function of already-validated data.
    pub fn render(&self, scan_result: &ScanResult, format: RenderFormat) -> String {
        match format {
            RenderFormat::DailyFindings => render::render_daily_findings(scan_result),
            RenderFormat::Standup => render::render_standup_summary(scan_result),
        }
    }
}

fn match_job<'a>(
    jobs: &'a [crate::models::JobInfo],
    job_name_or_id: &str,
    strategy: JobMatchStrategy,
) -> Result<&'a crate::models::JobInfo, ErrorRecord> {
    match strategy {
        JobMatchStrategy::Id => jobs
            .iter()
            .find(|j| j.job_id == job_name_or_id)
            .ok_or_else(|| ErrorRecord::message(format!("no job found with id `{job_name_or_id}`"))),

        JobMatchStrategy::Exact => {
            let matches: Vec<&crate::models::JobInfo> =
                jobs.iter().filter(|j| j.job_name == job_name_or_id).collect();
            match matches.len() {
                0 => Err(ErrorRecord::message(format!(
                    "no job found with name `{job_name_or_id}`"
                ))),
                1 => Ok(matches[0]),
                _ => Err(ErrorRecord::with_candidates(
                    format!("multiple jobs found with name `{job_name_or_id}`"),
                    matches
                        .iter()
                        .map(|j| JobCandidate {
                            job_id: j.job_id.clone(),
                            job_name: j.job_name.clone(),
                        })
                        .collect(),
                )),
            }
        }

        JobMatchStrategy::Fuzzy => {
            let needle = job_name_or_id.to_lowercase();
            let matches: Vec<&crate::models::JobInfo> = jobs
                .iter()
                .filter(|j| j.job_name.to_lowercase().contains(&needle))
                .collect();
            match matches.len() {
                0 => Err(ErrorRecord::with_candidates(
                    format!("no job matched `{job_name_or_id}`"),
                    jobs.iter()
                        .map(|j| JobCandidate {
                            job_id: String::new(),
                            job_name: j.job_name.clone(),
                        })
                        .collect(),
                )),
                1 => Ok(matches[0]),
                _ => Err(ErrorRecord::with_candidates(
                    format!("multiple jobs matched `{job_name_or_id}`"),
                    matches
                        .iter()
                        .map(|j| JobCandidate {
                            job_id: j.job_id.clone(),
                            job_name: j.job_name.clone(),
                        })
                        .collect(),
                )),
            }
        }
    }
}
