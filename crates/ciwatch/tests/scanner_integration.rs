//! Integration tests exercising the Scanner end to end: a hand-written fake
//! Buildkite API, real log parsing/classification/dedup, down to a
//! `ScanResult`. (A `MockBuildkiteApi` exists too, but it's generated behind
//! `#[cfg(test)]` for the crate's own unit tests and isn't visible to an
//! external `tests/` binary, so integration tests use a small fake instead.)

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use ciwatch::buildkite::{AnalyticsTest, AnalyticsTestRun, BuildkiteApi};
use ciwatch::error::CiWatchError;
use ciwatch::models::{BuildInfo, BuildState, FailureCategory, JobInfo};
use ciwatch::scanner::{Scanner, ScannerConfig};

struct FakeBuildkite {
    jobs: Vec<JobInfo>,
    logs: HashMap<String, String>,
}

fn build_info(number: &str) -> BuildInfo {
    BuildInfo {
        build_number: number.to_string(),
        build_url: format!("https://buildkite.com/vllm/ci/builds/{number}"),
        pipeline: "vllm/ci".to_string(),
        branch: "main".to_string(),
        commit: "deadbeefcafe".to_string(),
        state: BuildState::Failed,
        created_at: Utc::now(),
        finished_at: None,
        source: "schedule".to_string(),
        message: "nightly".to_string(),
    }
}

fn job(id: &str, name: &str, state: &str, soft_failed: bool) -> JobInfo {
    JobInfo {
        job_id: id.to_string(),
        job_name: name.to_string(),
        state: state.to_string(),
        exit_status: if state == "passed" { Some(0) } else { Some(1) },
        soft_failed,
        build_number: "99".to_string(),
    }
}

#[async_trait]
impl BuildkiteApi for FakeBuildkite {
    async fn list_builds(
        &self,
        _pipeline: &str,
        _branch: &str,
        _limit: usize,
        _created_from: Option<chrono::DateTime<Utc>>,
    ) -> Result<Vec<BuildInfo>, CiWatchError> {
        Ok(vec![build_info("99")])
    }

    async fn get_build(&self, _pipeline: &str, number: &str) -> Result<(BuildInfo, Vec<JobInfo>), CiWatchError> {
        Ok((build_info(number), self.jobs.clone()))
    }

    async fn get_job_log(&self, _pipeline: &str, _number: &str, job_id: &str) -> Result<String, CiWatchError> {
        Ok(self.logs.get(job_id).cloned().unwrap_or_default())
    }

    async fn list_analytics_tests(
        &self,
        _suite: &str,
        _order: Option<&str>,
        _state: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<AnalyticsTest>, CiWatchError> {
        Ok(vec![])
    }

    async fn get_analytics_test(&self, _suite: &str, _test_id: &str) -> Result<AnalyticsTest, CiWatchError> {
        Err(CiWatchError::Configuration("not implemented in fake".to_string()))
    }

    async fn get_analytics_test_runs(
        &self,
        _suite: &str,
        _test_id: &str,
    ) -> Result<Vec<AnalyticsTestRun>, CiWatchError> {
        Ok(vec![])
    }
}

#[tokio::test]
async fn scan_build_classifies_and_dedups_across_jobs() {
    let api = FakeBuildkite {
        jobs: vec![
            job("1", "unit-tests", "failed", false),
            job("2", "gpu-tests", "failed", false),
            job("3", "lint", "passed", false),
            job("4", "flaky-suite", "failed", true),
        ],
        logs: HashMap::from([
            (
                "1".to_string(),
                "FAILED tests/a.py::test_x - AssertionError: expected 1 got 2".to_string(),
            ),
            (
                "2".to_string(),
                "FAILED tests/a.py::test_x - AssertionError: expected 1 got 2".to_string(),
            ),
            (
                "4".to_string(),
                "FAILED tests/b.py::test_flaky_thing - intermittent failure observed".to_string(),
            ),
        ]),
    };

    let scanner = Scanner::new(
        &api,
        None,
        ScannerConfig {
            repo: "vllm-project/vllm".to_string(),
            repo_path: None,
            search_github: false,
        },
    );

    let result = scanner.scan_build("vllm/ci", "99").await.unwrap();

    assert_eq!(result.total_jobs, 4);
    assert_eq!(result.failed_jobs, 3);
    // job 1 and job 2 report the same nodeid but from different job names,
    // so the per-(job,test,error) failure_key keeps both distinct; only
    // retries of the same nodeid within one job's own log get deduped.
    assert_eq!(result.failures.len(), 2);

    let flaky = result
        .failures
        .iter()
        .find(|f| f.failure.job_name == "flaky-suite")
        .unwrap();
    assert_eq!(flaky.category, FailureCategory::FlakySuspected);
    assert!(flaky.soft_failed);
}

#[tokio::test]
async fn scan_build_job_level_fallback_when_no_pytest_markers() {
    let api = FakeBuildkite {
        jobs: vec![job("1", "docker-build", "failed", false)],
        logs: HashMap::from([(
            "1".to_string(),
            "error: failed to build image\nexit status 1".to_string(),
        )]),
    };

    let scanner = Scanner::new(
        &api,
        None,
        ScannerConfig {
            repo: "vllm-project/vllm".to_string(),
            repo_path: None,
            search_github: false,
        },
    );

    let result = scanner.scan_build("vllm/ci", "99").await.unwrap();
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].failure.test_name, "docker-build");
}
