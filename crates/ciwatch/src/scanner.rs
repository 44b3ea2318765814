//! Drives a single build scan: enumerate jobs, fetch failed-job logs,
//! invoke the parser/classifier pipeline, dedup, compose a `ScanResult`.

use std::path::PathBuf;

use chrono::{Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};

use crate::buildkite::BuildkiteApi;
use crate::classifier::{self};
use crate::config::MAX_FAILED_JOBS_TO_PROCESS;
use crate::error::CiWatchError;
use crate::github_search::GitHubIssueSearch;
use crate::log_parser;
use crate::models::{BuildInfo, BuildState, FailureClassification, JobInfo, ScanResult};
use crate::owners;

const LOG_FETCH_FAN_OUT: usize = 6;
const NIGHTLY_WINDOW_DAYS: i64 = 2;

pub struct ScannerConfig {
    pub repo: String,
    pub repo_path: Option<PathBuf>,
    pub search_github: bool,
}

pub struct Scanner<'a> {
    api: &'a dyn BuildkiteApi,
    github: Option<&'a dyn GitHubIssueSearch>,
    config: ScannerConfig,
}

fn is_analyzable(state: BuildState) -> bool {
    matches!(
        state,
        BuildState::Passed | BuildState::Failed | BuildState::Failing | BuildState::Canceled
    )
}

impl<'a> Scanner<'a> {
    pub fn new(
        api: &'a dyn BuildkiteApi,
        github: Option<&'a dyn GitHubIssueSearch>,
        config: ScannerConfig,
    ) -> Self {
        Self { api, github, config }
    }

    /// Resolve "the latest nightly build": builds on the branch within a
    /// rolling 2-day window, preferring `source == schedule`; relax to any
    /// source if none match; finally fall back to the most recent build in
    /// an analyzable state.
    pub async fn resolve_latest_nightly(
        &self,
        pipeline: &str,
        branch: &str,
    ) -> Result<BuildInfo, CiWatchError> {
        let created_from = Utc::now() - ChronoDuration::days(NIGHTLY_WINDOW_DAYS);
        let builds = self
            .api
            .list_builds(pipeline, branch, 50, Some(created_from))
            .await?;

        if let Some(build) = builds
            .iter()
            .find(|b| b.source == "schedule" && is_analyzable(b.state))
        {
            return Ok(build.clone());
        }

        if let Some(build) = builds.iter().find(|b| is_analyzable(b.state)) {
            return Ok(build.clone());
        }

        let all_builds = self.api.list_builds(pipeline, branch, 50, None).await?;
        all_builds
            .into_iter()
            .find(|b| is_analyzable(b.state))
            .ok_or_else(|| CiWatchError::Configuration("no analyzable build found".to_string()))
    }

    pub async fn scan_build(
        &self,
        pipeline: &str,
        build_number: &str,
    ) -> Result<ScanResult, CiWatchError> {
        let (build_info, jobs) = self.api.get_build(pipeline, build_number).await?;
        self.scan_jobs(build_info, jobs).await
    }

    async fn scan_jobs(
        &self,
        build_info: BuildInfo,
        jobs: Vec<JobInfo>,
    ) -> Result<ScanResult, CiWatchError> {
        let total_jobs = jobs.len();
        let failed_jobs: Vec<&JobInfo> = jobs.iter().filter(|j| !j.passed()).collect();
        let failed_count = failed_jobs.len();

        let capped: Vec<&JobInfo> = failed_jobs
            .into_iter()
            .take(MAX_FAILED_JOBS_TO_PROCESS)
            .collect();

        let pipeline = build_info.pipeline.clone();
        let build_number = build_info.build_number.clone();

        // Fetch logs with bounded fan-out; `buffered` preserves input order
        // so dedup below is deterministic regardless of which fetch lands
        // first on the wire.
        let per_job_failures: Vec<Vec<FailureClassification>> = stream::iter(capped)
            .map(|job| {
                let pipeline = pipeline.clone();
                let build_number = build_number.clone();
                async move {
                    let log = match self.api.get_job_log(&pipeline, &build_number, &job.job_id).await {
                        Ok(log) => log,
                        Err(e) => {
                            tracing::warn!(job = %job.job_name, error = %e, "skipping job: log fetch failed");
                            return Vec::new();
                        }
                    };

                    let failures = log_parser::extract_test_failures(&log, &job.job_name);
                    let mut classified = Vec::with_capacity(failures.len());
                    for failure in failures {
                        let rel_path = failure.test_name.split("::").next().unwrap_or("").to_string();
                        let mut c = classifier::classify_failure(
                            failure,
                            &self.config.repo,
                            self.config.search_github,
                            self.github,
                            job.soft_failed,
                        )
                        .await;

                        if let Some(repo_path) = &self.config.repo_path {
                            let (owner, confidence) = owners::resolve_owner(repo_path, &rel_path);
                            c.owner = owner;
                            c.owner_confidence = Some(confidence);
                        }

                        classified.push(c);
                    }
                    classified
                }
            })
            .buffered(LOG_FETCH_FAN_OUT)
            .collect()
            .await;

        let mut seen = std::collections::HashSet::new();
        let mut failures = Vec::new();
        for job_failures in per_job_failures {
            for c in job_failures {
                if seen.insert(c.failure_key.clone()) {
                    failures.push(c);
                }
            }
        }

        Ok(ScanResult {
            build_info,
            total_jobs,
            failed_jobs: failed_count,
            failures,
            scan_timestamp: Utc::now(),
        })
    }
}
