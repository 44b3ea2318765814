//! External interface: the Buildkite REST API (builds, jobs, logs,
//! analytics). An interface returning structured records; this module
//! provides both the trait abstraction (for testability) and the real
//! `reqwest`-backed client, following the pattern `integrations::
//! github_client::GitHubClient` establishes elsewhere in this workspace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use crate::config::{BK_BUILD_TIMEOUT, BK_JOB_TIMEOUT, BK_LOG_TIMEOUT};
use crate::error::CiWatchError;
use crate::models::{BuildInfo, BuildState, JobInfo};

/// A row from the Buildkite Test Analytics suite (flaky/recently-failed
/// aggregate list).
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsTest {
    pub id: String,
    pub name: String,
    pub scope: Option<String>,
    pub is_flaky: bool,
    pub recently_failed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsTestRun {
    pub run_id: String,
    pub result: String,
    pub created_at: DateTime<Utc>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BuildkiteApi: Send + Sync {
    async fn list_builds(
        &self,
        pipeline: &str,
        branch: &str,
        limit: usize,
        created_from: Option<DateTime<Utc>>,
    ) -> Result<Vec<BuildInfo>, CiWatchError>;

    /// Returns the build plus its embedded job list.
    async fn get_build(
        &self,
        pipeline: &str,
        number: &str,
    ) -> Result<(BuildInfo, Vec<JobInfo>), CiWatchError>;

    async fn get_job_log(
        &self,
        pipeline: &str,
        number: &str,
        job_id: &str,
    ) -> Result<String, CiWatchError>;

    async fn list_analytics_tests(
        &self,
        suite: &str,
        order: Option<&str>,
        state: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalyticsTest>, CiWatchError>;

    async fn get_analytics_test(
        &self,
        suite: &str,
        test_id: &str,
    ) -> Result<AnalyticsTest, CiWatchError>;

    async fn get_analytics_test_runs(
        &self,
        suite: &str,
        test_id: &str,
    ) -> Result<Vec<AnalyticsTestRun>, CiWatchError>;
}

pub struct BuildkiteClient {
    client: reqwest::Client,
    base_url: String,
    analytics_base_url: String,
    org_slug: String,
}

impl BuildkiteClient {
    pub fn new(token: &str, org_slug: &str) -> Result<Self, CiWatchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("ciwatch"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| CiWatchError::Configuration(format!("invalid Buildkite token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        // Client-level default is a safety net; every request below overrides it
        // with the operation-specific timeout from `config`.
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(BK_LOG_TIMEOUT)
            .build()
            .map_err(|e| CiWatchError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: "https://api.buildkite.com/v2".to_string(),
            analytics_base_url: "https://api.buildkite.com/v2/analytics".to_string(),
            org_slug: org_slug.to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn with_base_urls(token: &str, base_url: String, analytics_base_url: String) -> Self {
        let mut c = Self::new(token, "vllm").unwrap();
        c.base_url = base_url;
        c.analytics_base_url = analytics_base_url;
        c
    }
}

#[derive(Debug, Deserialize)]
struct RawPipeline {
    slug: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawJob {
    id: String,
    #[serde(alias = "label")]
    name: Option<String>,
    state: String,
    exit_status: Option<i64>,
    #[serde(default)]
    soft_failed: bool,
}

#[derive(Debug, Deserialize)]
struct RawBuild {
    #[serde(alias = "id")]
    number: serde_json::Value,
    #[serde(alias = "url")]
    web_url: String,
    #[serde(default)]
    pipeline: Option<RawPipeline>,
    branch: String,
    commit: String,
    state: String,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    source: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    jobs: Vec<RawJob>,
}

fn parse_state(s: &str) -> BuildState {
    match s {
        "passed" => BuildState::Passed,
        "failed" => BuildState::Failed,
        "failing" => BuildState::Failing,
        "canceled" | "canceling" => BuildState::Canceled,
        "running" => BuildState::Running,
        "scheduled" => BuildState::Scheduled,
        _ => BuildState::Unknown,
    }
}

fn parse_build(raw: RawBuild, pipeline_slug: &str) -> (BuildInfo, Vec<JobInfo>) {
    let number = match &raw.number {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    };
    let pipeline = raw
        .pipeline
        .and_then(|p| p.slug)
        .unwrap_or_else(|| pipeline_slug.to_string());

    let jobs = raw
        .jobs
        .into_iter()
        .map(|j| JobInfo {
            job_id: j.id,
            job_name: j.name.unwrap_or_default(),
            state: j.state,
            exit_status: j.exit_status,
            soft_failed: j.soft_failed,
            build_number: number.clone(),
        })
        .collect();

    let build = BuildInfo {
        build_number: number,
        build_url: raw.web_url,
        pipeline,
        branch: raw.branch,
        commit: raw.commit,
        state: parse_state(&raw.state),
        created_at: raw.created_at,
        finished_at: raw.finished_at,
        source: raw.source,
        message: raw.message,
    };

    (build, jobs)
}

fn split_pipeline(pipeline: &str) -> (&str, &str) {
    pipeline.split_once('/').unwrap_or(("", pipeline))
}

#[async_trait]
impl BuildkiteApi for BuildkiteClient {
    async fn list_builds(
        &self,
        pipeline: &str,
        branch: &str,
        limit: usize,
        created_from: Option<DateTime<Utc>>,
    ) -> Result<Vec<BuildInfo>, CiWatchError> {
        let (org, slug) = split_pipeline(pipeline);
        let url = format!("{}/organizations/{org}/pipelines/{slug}/builds", self.base_url);

        let mut query = vec![
            ("branch".to_string(), branch.to_string()),
            ("per_page".to_string(), limit.to_string()),
        ];
        if let Some(from) = created_from {
            query.push(("created_from".to_string(), from.to_rfc3339()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .timeout(BK_BUILD_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("list_builds", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status("list_builds", response.status().as_u16()));
        }

        let raw_builds: Vec<RawBuild> = response
            .json()
            .await
            .map_err(|e| CiWatchError::transport("list_builds (decode)", e))?;

        Ok(raw_builds
            .into_iter()
            .map(|b| parse_build(b, slug).0)
            .collect())
    }

    async fn get_build(
        &self,
        pipeline: &str,
        number: &str,
    ) -> Result<(BuildInfo, Vec<JobInfo>), CiWatchError> {
        let (org, slug) = split_pipeline(pipeline);
        let url = format!(
            "{}/organizations/{org}/pipelines/{slug}/builds/{number}",
            self.base_url
        );

        let response = self
            .client
            .get(&url)
            .timeout(BK_BUILD_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("get_build", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status("get_build", response.status().as_u16()));
        }

        let raw: RawBuild = response
            .json()
            .await
            .map_err(|e| CiWatchError::transport("get_build (decode)", e))?;

        Ok(parse_build(raw, slug))
    }

    async fn get_job_log(
        &self,
        pipeline: &str,
        number: &str,
        job_id: &str,
    ) -> Result<String, CiWatchError> {
        let (org, slug) = split_pipeline(pipeline);
        let url = format!(
            "{}/organizations/{org}/pipelines/{slug}/builds/{number}/jobs/{job_id}/log",
            self.base_url
        );

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "text/plain")
            .timeout(BK_LOG_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("get_job_log", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status("get_job_log", response.status().as_u16()));
        }

        response
            .text()
            .await
            .map_err(|e| CiWatchError::transport("get_job_log (decode)", e))
    }

    async fn list_analytics_tests(
        &self,
        suite: &str,
        order: Option<&str>,
        state: Option<&str>,
        limit: usize,
    ) -> Result<Vec<AnalyticsTest>, CiWatchError> {
        let url = format!(
            "{}/organizations/{}/suites/{suite}/tests",
            self.analytics_base_url, self.org_slug
        );
        let mut query = vec![("per_page".to_string(), limit.to_string())];
        if let Some(order) = order {
            query.push(("order".to_string(), order.to_string()));
        }
        if let Some(state) = state {
            query.push(("state".to_string(), state.to_string()));
        }

        let response = self
            .client
            .get(&url)
            .query(&query)
            .timeout(BK_JOB_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("list_analytics_tests", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status(
                "list_analytics_tests",
                response.status().as_u16(),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| CiWatchError::transport("list_analytics_tests (decode)", e))
    }

    async fn get_analytics_test(
        &self,
        suite: &str,
        test_id: &str,
    ) -> Result<AnalyticsTest, CiWatchError> {
        let url = format!(
            "{}/organizations/{}/suites/{suite}/tests/{test_id}",
            self.analytics_base_url, self.org_slug
        );
        let response = self
            .client
            .get(&url)
            .timeout(BK_JOB_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("get_analytics_test", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status(
                "get_analytics_test",
                response.status().as_u16(),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| CiWatchError::transport("get_analytics_test (decode)", e))
    }

    async fn get_analytics_test_runs(
        &self,
        suite: &str,
        test_id: &str,
    ) -> Result<Vec<AnalyticsTestRun>, CiWatchError> {
        let url = format!(
            "{}/organizations/{}/suites/{suite}/tests/{test_id}/runs",
            self.analytics_base_url, self.org_slug
        );
        let response = self
            .client
            .get(&url)
            .timeout(BK_JOB_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("get_analytics_test_runs", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status(
                "get_analytics_test_runs",
                response.status().as_u16(),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| CiWatchError::transport("get_analytics_test_runs (decode)", e))
    }
}

/// Parse a build reference that is either a bare build number or a
/// Buildkite build URL (`.../builds/<number>`).
pub fn parse_build_ref(build_ref: &str) -> Option<String> {
    if let Some(idx) = build_ref.rfind("/builds/") {
        let tail = &build_ref[idx + "/builds/".len()..];
        let number: String = tail.chars().take_while(|c| c.is_ascii_digit()).collect();
        if number.is_empty() {
            None
        } else {
            Some(number)
        }
    } else if build_ref.chars().all(|c| c.is_ascii_digit()) && !build_ref.is_empty() {
        Some(build_ref.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_build_number() {
        assert_eq!(parse_build_ref("12345"), Some("12345".to_string()));
    }

    #[test]
    fn parses_build_url() {
        assert_eq!(
            parse_build_ref("https://buildkite.com/vllm/ci/builds/12345"),
            Some("12345".to_string())
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_build_ref("not-a-build"), None);
    }

    #[tokio::test]
    async fn list_builds_against_mock_server() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(
                "/organizations/vllm/pipelines/ci/builds",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "number": 42,
                    "web_url": "https://buildkite.com/vllm/ci/builds/42",
                    "pipeline": {"slug": "ci"},
                    "branch": "main",
                    "commit": "abc123",
                    "state": "failed",
                    "created_at": "2024-01-22T10:30:45Z",
                    "finished_at": "2024-01-22T11:00:00Z",
                    "source": "schedule",
                    "message": "nightly",
                    "jobs": []
                }
            ])))
            .mount(&server)
            .await;

        let client = BuildkiteClient::with_base_urls(
            "token",
            server.uri(),
            format!("{}/analytics", server.uri()),
        );

        let builds = client
            .list_builds("vllm/ci", "main", 10, None)
            .await
            .unwrap();
        assert_eq!(builds.len(), 1);
        assert_eq!(builds[0].build_number, "42");
        assert_eq!(builds[0].state, BuildState::Failed);
    }

    #[tokio::test]
    async fn list_analytics_tests_includes_organization_path_segment() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(
                "/analytics/organizations/vllm/suites/ci-1/tests",
            ))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = BuildkiteClient::with_base_urls(
            "token",
            server.uri(),
            format!("{}/analytics", server.uri()),
        );

        let tests = client
            .list_analytics_tests("ci-1", None, None, 10)
            .await
            .unwrap();
        assert!(tests.is_empty());
    }
}
