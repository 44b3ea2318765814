//! External interface: the GitHub issue-search collaborator.
//!
//! A narrow interface: repo + query + limit in, a list of candidate
//! issues out. Failures are a distinct, swallowable error type — the
//! classifier treats any `Err` from this trait as "skip step 1".

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use serde::Deserialize;

use crate::config::GH_ISSUE_TIMEOUT;
use crate::error::CiWatchError;

#[derive(Debug, Clone, Deserialize)]
pub struct IssueLabel {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    pub url: String,
    pub state: String,
    pub labels: Vec<IssueLabel>,
}

#[async_trait]
pub trait GitHubIssueSearch: Send + Sync {
    async fn search_issues(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Issue>, CiWatchError>;
}

/// Real collaborator: GitHub's REST Search Issues API.
pub struct GitHubSearchClient {
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    number: u64,
    title: String,
    html_url: String,
    state: String,
    labels: Vec<IssueLabel>,
}

impl GitHubSearchClient {
    pub fn new(token: &str) -> Result<Self, CiWatchError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("ciwatch"));
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| CiWatchError::Configuration(format!("invalid GitHub token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(GH_ISSUE_TIMEOUT)
            .build()
            .map_err(|e| CiWatchError::Configuration(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl GitHubIssueSearch for GitHubSearchClient {
    async fn search_issues(
        &self,
        repo: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<Issue>, CiWatchError> {
        let full_query = format!("repo:{repo} {query}");
        let response = self
            .client
            .get("https://api.github.com/search/issues")
            .query(&[("q", full_query.as_str()), ("per_page", &limit.to_string())])
            .timeout(GH_ISSUE_TIMEOUT)
            .send()
            .await
            .map_err(|e| CiWatchError::transport("github issue search", e))?;

        if !response.status().is_success() {
            return Err(CiWatchError::http_status(
                "github issue search",
                response.status().as_u16(),
            ));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| CiWatchError::transport("github issue search (decode)", e))?;

        Ok(body
            .items
            .into_iter()
            .take(limit)
            .map(|item| Issue {
                number: item.number,
                title: item.title,
                url: item.html_url,
                state: item.state,
                labels: item.labels,
            })
            .collect())
    }
}
