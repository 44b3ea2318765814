//! Runtime configuration: environment variables, timeouts, and limits.

use std::time::Duration;

use crate::error::CiWatchError;

pub const DEFAULT_PIPELINE: &str = "vllm/ci";
pub const DEFAULT_REPO: &str = "vllm-project/vllm";
pub const DEFAULT_BRANCH: &str = "main";

pub const BK_BUILD_TIMEOUT: Duration = Duration::from_secs(30);
pub const BK_JOB_TIMEOUT: Duration = Duration::from_secs(30);
pub const BK_LOG_TIMEOUT: Duration = Duration::from_secs(60);
pub const GH_ISSUE_TIMEOUT: Duration = Duration::from_secs(30);
pub const GIT_BLAME_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_LOG_SNIPPET_LENGTH: usize = 500;
pub const MAX_STACK_TRACE_LENGTH: usize = 1000;
pub const MAX_ERROR_MESSAGE_LENGTH: usize = 200;
pub const MAX_FAILED_JOBS_TO_PROCESS: usize = 10;

/// Top-level runtime configuration, assembled from the environment once at
/// startup. Missing credentials are a `Configuration` error surfaced
/// immediately at construction, not deferred to first use.
#[derive(Debug, Clone)]
pub struct Config {
    pub buildkite_token: String,
    pub buildkite_org: String,
    /// Working-tree path used for ownership inference; `None` disables the
    /// `OwnerResolver` entirely.
    pub repo_path: Option<String>,
    /// GitHub token for issue search; `None` disables KNOWN_TRACKED lookup.
    pub github_token: Option<String>,
}

impl Config {
    /// Build configuration from the process environment.
    ///
    /// Accepts either `BUILDKITE_TOKEN` or `BUILDKITE_API_TOKEN`, and either
    /// `GH_TOKEN` or `GITHUB_TOKEN`, matching the "two alternate names are
    /// acceptable" rule for credentials.
    pub fn from_env() -> Result<Self, CiWatchError> {
        let buildkite_token = std::env::var("BUILDKITE_TOKEN")
            .or_else(|_| std::env::var("BUILDKITE_API_TOKEN"))
            .map_err(|_| {
                CiWatchError::Configuration(
                    "missing BUILDKITE_TOKEN (or BUILDKITE_API_TOKEN) in environment".to_string(),
                )
            })?;

        let buildkite_org = std::env::var("BUILDKITE_ORG").unwrap_or_else(|_| "vllm".to_string());

        let repo_path = std::env::var("CIWATCH_REPO_PATH").ok();

        let github_token = std::env::var("GH_TOKEN")
            .or_else(|_| std::env::var("GITHUB_TOKEN"))
            .ok();

        Ok(Self {
            buildkite_token,
            buildkite_org,
            repo_path,
            github_token,
        })
    }

    pub fn default_pipeline(&self) -> String {
        format!("{}/ci", self.buildkite_org)
    }
}
