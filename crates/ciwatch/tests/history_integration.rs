//! Integration tests exercising the HistoryEngine + Assessor pipeline end to
//! end against a hand-written fake Buildkite API (see `scanner_integration.rs`
//! for why this isn't `MockBuildkiteApi`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use ciwatch::budget::Budget;
use ciwatch::buildkite::{AnalyticsTest, AnalyticsTestRun, BuildkiteApi};
use ciwatch::error::CiWatchError;
use ciwatch::history::{HistoryEngine, HistoryEngineConfig};
use ciwatch::models::{BuildInfo, BuildState, JobInfo, TestStatus, TimelineClassification};

struct FakeBuildkite {
    builds: Vec<BuildInfo>,
    jobs_by_build: HashMap<String, Vec<JobInfo>>,
    logs: HashMap<(String, String), String>,
}

fn build(number: &str, created_at: chrono::DateTime<Utc>) -> BuildInfo {
    BuildInfo {
        build_number: number.to_string(),
        build_url: format!("https://buildkite.com/vllm/ci/builds/{number}"),
        pipeline: "vllm/ci".to_string(),
        branch: "main".to_string(),
        commit: format!("sha-{number}"),
        state: BuildState::Failed,
        created_at,
        finished_at: None,
        source: "schedule".to_string(),
        message: String::new(),
    }
}

fn job(id: &str, name: &str, state: &str) -> JobInfo {
    JobInfo {
        job_id: id.to_string(),
        job_name: name.to_string(),
        state: state.to_string(),
        exit_status: None,
        soft_failed: false,
        build_number: String::new(),
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
        Ok(self.builds.clone())
    }

    async fn get_build(&self, _pipeline: &str, number: &str) -> Result<(BuildInfo, Vec<JobInfo>), CiWatchError> {
        let b = self.builds.iter().find(|b| b.build_number == number).unwrap().clone();
        let jobs = self.jobs_by_build.get(number).cloned().unwrap_or_default();
        Ok((b, jobs))
    }

    async fn get_job_log(&self, _pipeline: &str, number: &str, job_id: &str) -> Result<String, CiWatchError> {
        Ok(self
            .logs
            .get(&(number.to_string(), job_id.to_string()))
            .cloned()
            .unwrap_or_default())
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
async fn regression_timeline_is_assessed_as_regression() {
    let now = Utc::now();
    let builds: Vec<BuildInfo> = (1..=5)
        .map(|n| build(&n.to_string(), now - Duration::hours(5 - n)))
        .collect();

    let mut jobs_by_build = HashMap::new();
    let mut logs = HashMap::new();
    for n in 1..=5 {
        let key = n.to_string();
        jobs_by_build.insert(key.clone(), vec![job("j1", "unit-tests", "failed")]);
        let log = if n <= 2 {
            "PASSED tests/a.py::test_regressed".to_string()
        } else {
            "FAILED tests/a.py::test_regressed - AssertionError: now broken".to_string()
        };
        logs.insert((key, "j1".to_string()), log);
    }

    let api = FakeBuildkite {
        builds,
        jobs_by_build,
        logs,
    };

    let budget = Budget::default();
    let engine = HistoryEngine::new(&api, &budget);
    let timeline = engine
        .test_history(
            "tests/a.py::test_regressed",
            "vllm/ci",
            "main",
            HistoryEngineConfig {
                lookback_builds: 50,
                job_filter: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(timeline.len(), 5);
    for window in timeline.windows(2) {
        assert!(window[0].created_at <= window[1].created_at);
    }

    let assessment = ciwatch::assessor::assess_test_history(&timeline);
    assert_eq!(assessment.classification, TimelineClassification::Regression);
    assert_eq!(assessment.transition_build.as_deref(), Some("3"));
}

#[tokio::test]
async fn job_filter_narrows_which_jobs_are_searched() {
    let now = Utc::now();
    let builds = vec![build("1", now)];
    let jobs_by_build = HashMap::from([(
        "1".to_string(),
        vec![
            job("1", "gpu-tests", "failed"),
            job("2", "cpu-tests", "failed"),
        ],
    )]);
    let logs = HashMap::from([
        (
            ("1".to_string(), "1".to_string()),
            "FAILED tests/a.py::test_x - AssertionError: boom".to_string(),
        ),
        (("1".to_string(), "2".to_string()), "PASSED tests/a.py::test_x".to_string()),
    ]);

    let api = FakeBuildkite {
        builds,
        jobs_by_build,
        logs,
    };

    let budget = Budget::default();
    let engine = HistoryEngine::new(&api, &budget);
    let timeline = engine
        .test_history(
            "tests/a.py::test_x",
            "vllm/ci",
            "main",
            HistoryEngineConfig {
                lookback_builds: 50,
                job_filter: Some("cpu".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].test_status, TestStatus::Pass);
    assert_eq!(timeline[0].jobs.len(), 1);
    assert_eq!(timeline[0].jobs[0].job_name, "cpu-tests");
}
