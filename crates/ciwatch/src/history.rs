//! For one test id over N builds, a prioritized per-build job walk
//! under a shared `Budget`, reconstructing an ordered `Timeline`.

use crate::budget::Budget;
use crate::buildkite::BuildkiteApi;
use crate::fingerprint;
use crate::log_parser;
use crate::models::{JobInfo, JobOutcome, Timeline, TimelineEntry, TestStatus};

pub struct HistoryEngineConfig {
    pub lookback_builds: usize,
    pub job_filter: Option<String>,
}

pub struct HistoryEngine<'a> {
    api: &'a dyn BuildkiteApi,
    budget: &'a Budget,
}

impl<'a> HistoryEngine<'a> {
    pub fn new(api: &'a dyn BuildkiteApi, budget: &'a Budget) -> Self {
        Self { api, budget }
    }

    pub async fn test_history(
        &self,
        nodeid: &str,
        pipeline: &str,
        branch: &str,
        config: HistoryEngineConfig,
    ) -> Result<Timeline, crate::error::CiWatchError> {
        let mut builds = self
            .api
            .list_builds(pipeline, branch, config.lookback_builds, None)
            .await?;
        builds.sort_by_key(|b| b.created_at);

        let mut timeline = Timeline::new();

        for build in builds {
            if self.budget.is_exhausted() {
                break;
            }

            let (_build_info, jobs) = match self.api.get_build(pipeline, &build.build_number).await {
                Ok(v) => v,
                Err(_) => continue,
            };

            let jobs: Vec<JobInfo> = match &config.job_filter {
                Some(filter) => jobs
                    .into_iter()
                    .filter(|j| j.job_name.to_lowercase().contains(&filter.to_lowercase()))
                    .collect(),
                None => jobs,
            };

            let (mut failed, mut passed): (Vec<JobInfo>, Vec<JobInfo>) =
                jobs.into_iter().partition(|j| !j.passed());

            failed.truncate(self.budget.max_jobs_per_build);
            let remaining_slots = self.budget.max_jobs_per_build.saturating_sub(failed.len());
            passed.truncate(remaining_slots);

            let mut found_any = false;
            let mut entry_status = TestStatus::Unknown;
            let mut job_outcomes = Vec::new();

            // Failed jobs carry the overwhelming majority of the probability
            // mass for finding the failure, so search them first.
            for job in &failed {
                if !self.budget.can_fetch_log(None) {
                    break;
                }
                if let Some(outcome) = self.search_job(pipeline, &build.build_number, job, nodeid).await {
                    found_any = true;
                    entry_status = entry_status.combine(outcome.status);
                    job_outcomes.push(outcome);
                }
            }

            if !found_any {
                for job in &passed {
                    if !self.budget.can_fetch_log(None) {
                        break;
                    }
                    if let Some(outcome) = self.search_job(pipeline, &build.build_number, job, nodeid).await {
                        found_any = true;
                        entry_status = entry_status.combine(outcome.status);
                        job_outcomes.push(outcome);
                    }
                }
            }

            timeline.push(TimelineEntry {
                build_number: build.build_number.clone(),
                build_url: build.build_url.clone(),
                created_at: build.created_at,
                commit_sha: build.commit.clone(),
                test_found: found_any,
                test_status: entry_status,
                jobs: job_outcomes,
            });
        }

        Ok(timeline)
    }

    async fn search_job(
        &self,
        pipeline: &str,
        build_number: &str,
        job: &JobInfo,
        nodeid: &str,
    ) -> Option<JobOutcome> {
        let log = self.api.get_job_log(pipeline, build_number, &job.job_id).await.ok()?;
        self.budget.record_log_fetch(log.len() as u64);

        let outcome = log_parser::find_outcome_for(&log, nodeid);
        if !outcome.found {
            return None;
        }

        let status = match outcome.status {
            Some(crate::log_parser::NodeStatus::Passed) => TestStatus::Pass,
            Some(_) => TestStatus::Fail,
            None => TestStatus::Unknown,
        };

        let (fingerprint_raw, fingerprint_normalized) = if status == TestStatus::Fail {
            let raw = fingerprint::extract_fingerprint(&log, nodeid);
            let normalized = raw.clone();
            if raw.is_some() {
                (raw, normalized)
            } else if let Some(msg) = &outcome.error_message {
                let normalized = fingerprint::normalize_failure_fingerprint(msg);
                (Some(msg.clone()), Some(normalized))
            } else {
                (None, None)
            }
        } else {
            (None, None)
        };

        Some(JobOutcome {
            job_name: job.job_name.clone(),
            job_url: String::new(),
            status,
            fingerprint_raw,
            fingerprint_normalized,
            log_excerpt: outcome.log_excerpt,
            error_message: outcome.error_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildkite::MockBuildkiteApi;
    use crate::models::{BuildInfo, BuildState};
    use chrono::{Duration, Utc};

    fn build(number: &str, created_at: chrono::DateTime<Utc>) -> BuildInfo {
        BuildInfo {
            build_number: number.to_string(),
            build_url: String::new(),
            pipeline: "vllm/ci".to_string(),
            branch: "main".to_string(),
            commit: "sha".to_string(),
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

    #[tokio::test]
    async fn timeline_ordered_ascending_by_created_at() {
        let now = Utc::now();
        let mut api = MockBuildkiteApi::new();
        api.expect_list_builds().returning(move |_, _, _, _| {
            Ok(vec![
                build("2", now),
                build("1", now - Duration::hours(1)),
            ])
        });
        api.expect_get_build()
            .returning(|_, number| Ok((build(number, Utc::now()), vec![])));

        let budget = Budget::default();
        let engine = HistoryEngine::new(&api, &budget);
        let timeline = engine
            .test_history(
                "tests/a.py::b",
                "vllm/ci",
                "main",
                HistoryEngineConfig {
                    lookback_builds: 50,
                    job_filter: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(timeline.len(), 2);
        assert!(timeline[0].created_at <= timeline[1].created_at);
    }

    #[tokio::test]
    async fn failed_jobs_searched_before_passed() {
        let mut api = MockBuildkiteApi::new();
        api.expect_list_builds()
            .returning(|_, _, _, _| Ok(vec![build("1", Utc::now())]));
        api.expect_get_build().returning(|_, _| {
            Ok((
                build("1", Utc::now()),
                vec![job("1", "job-fail", "failed"), job("2", "job-pass", "passed")],
            ))
        });
        api.expect_get_job_log().returning(|_, _, job_id| {
            if job_id == "1" {
                Ok("FAILED tests/a.py::b - AssertionError: boom".to_string())
            } else {
                Ok("PASSED tests/a.py::b".to_string())
            }
        });

        let budget = Budget::default();
        let engine = HistoryEngine::new(&api, &budget);
        let timeline = engine
            .test_history(
                "tests/a.py::b",
                "vllm/ci",
                "main",
                HistoryEngineConfig {
                    lookback_builds: 50,
                    job_filter: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(timeline[0].test_status, TestStatus::Fail);
        assert_eq!(timeline[0].jobs.len(), 1);
        assert_eq!(timeline[0].jobs[0].job_name, "job-fail");
    }
}
