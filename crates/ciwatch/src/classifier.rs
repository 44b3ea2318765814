//! Ordered, short-circuit classification of a `TestFailure`.

use std::sync::LazyLock;

use regex::Regex;

use crate::failure_key::failure_key;
use crate::github_search::{GitHubIssueSearch, Issue};
use crate::models::{FailureCategory, FailureClassification, TestFailure};

pub const MIN_MATCH_CONFIDENCE: f64 = 0.6;
pub const EXACT_MATCH_CONFIDENCE: f64 = 0.9;
pub const FUZZY_MATCH_CONFIDENCE: f64 = 0.7;
pub const WEAK_MATCH_CONFIDENCE: f64 = 0.5;
pub const INFRA_CONFIDENCE: f64 = 0.7;
pub const FLAKY_CONFIDENCE: f64 = 0.6;
pub const NEW_REGRESSION_CONFIDENCE: f64 = 0.5;
pub const NEEDS_HUMAN_TRIAGE_CONFIDENCE: f64 = 0.3;

static INFRA_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)timeout|timed out",
        r"(?i)connection refused|network error",
        r"(?i)no space left on device|disk full",
        r"(?i)out of memory|OOM|CUDA out of memory",
        r"(?i)killed by signal|SIGKILL",
        r"(?i)cannot allocate memory",
        r"(?i)failed to download|download error",
        r"(?i)agent lost|lost connection to agent",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static FLAKY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i)flaky", r"(?i)intermittent", r"(?i)passed on retry"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

fn haystack(failure: &TestFailure) -> String {
    format!(
        "{} {} {}",
        failure.error_message.as_deref().unwrap_or(""),
        failure.stack_trace.as_deref().unwrap_or(""),
        failure.log_snippet.as_deref().unwrap_or(""),
    )
}

/// Validate and score one candidate issue against a failure. `None` means
/// reject outright (not labeled `ci-failure`).
fn score_candidate(issue: &Issue, test_name: &str, job_name: &str) -> Option<f64> {
    if !issue.labels.iter().any(|l| l.name == "ci-failure") {
        return None;
    }

    let title_lower = issue.title.to_lowercase();
    let test_lower = test_name.to_lowercase();

    let exact = title_lower.contains(&test_lower)
        || test_name
            .split("::")
            .any(|seg| seg.len() > 3 && title_lower.contains(&seg.to_lowercase()));

    if exact {
        return Some(EXACT_MATCH_CONFIDENCE);
    }

    if title_lower.contains(&job_name.to_lowercase()) {
        return Some(FUZZY_MATCH_CONFIDENCE);
    }

    Some(WEAK_MATCH_CONFIDENCE)
}

async fn known_tracked(
    failure: &TestFailure,
    repo: &str,
    searcher: &dyn GitHubIssueSearch,
) -> Option<(Issue, f64)> {
    let query_a = format!(
        "\"{}\" label:ci-failure is:issue is:open",
        failure.test_name
    );
    if let Ok(candidates) = searcher.search_issues(repo, &query_a, 3).await {
        for issue in &candidates {
            if let Some(conf) = score_candidate(issue, &failure.test_name, &failure.job_name) {
                if conf >= MIN_MATCH_CONFIDENCE {
                    return Some((issue.clone(), conf));
                }
            }
        }
    }

    let query_b = format!(
        "{} label:ci-failure is:issue is:open",
        failure.test_name
    );
    if let Ok(candidates) = searcher.search_issues(repo, &query_b, 5).await {
        let best = candidates
            .iter()
            .filter_map(|issue| {
                score_candidate(issue, &failure.test_name, &failure.job_name)
                    .filter(|c| *c >= MIN_MATCH_CONFIDENCE)
                    .map(|c| (issue.clone(), c))
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        if best.is_some() {
            return best;
        }
    }

    None
}

/// Classify a single failure. `searcher` is `None` when KNOWN_TRACKED
/// lookup is disabled (no GitHub token configured) or skipped via flag;
/// search errors degrade silently to step 2.
pub async fn classify_failure(
    failure: TestFailure,
    repo: &str,
    search_github: bool,
    searcher: Option<&dyn GitHubIssueSearch>,
    soft_failed: bool,
) -> FailureClassification {
    let key = failure_key(
        &failure.job_name,
        &failure.test_name,
        failure.error_message.as_deref(),
    );

    if search_github {
        if let Some(searcher) = searcher {
            if let Some((issue, confidence)) = known_tracked(&failure, repo, searcher).await {
                return FailureClassification {
                    failure_key: key,
                    failure,
                    category: FailureCategory::KnownTracked,
                    github_issue: Some(issue.url),
                    confidence,
                    reason: format!("matches tracked issue #{}", issue.number),
                    owner: None,
                    owner_confidence: None,
                    soft_failed,
                };
            }
        }
    }

    let hay = haystack(&failure);

    if let Some(re) = INFRA_PATTERNS.iter().find(|re| re.is_match(&hay)) {
        return FailureClassification {
            failure_key: key,
            failure,
            category: FailureCategory::InfraSuspected,
            github_issue: None,
            confidence: INFRA_CONFIDENCE,
            reason: format!("matched infra pattern `{}`", re.as_str()),
            owner: None,
            owner_confidence: None,
            soft_failed,
        };
    }

    let hay_with_name = format!("{hay} {}", failure.test_name);
    if let Some(re) = FLAKY_PATTERNS.iter().find(|re| re.is_match(&hay_with_name)) {
        return FailureClassification {
            failure_key: key,
            failure,
            category: FailureCategory::FlakySuspected,
            github_issue: None,
            confidence: FLAKY_CONFIDENCE,
            reason: format!("matched flaky pattern `{}`", re.as_str()),
            owner: None,
            owner_confidence: None,
            soft_failed,
        };
    }

    if failure.error_message.as_deref().is_some_and(|m| !m.is_empty()) {
        return FailureClassification {
            failure_key: key,
            failure,
            category: FailureCategory::NewRegression,
            github_issue: None,
            confidence: NEW_REGRESSION_CONFIDENCE,
            reason: "new failure with no known classification".to_string(),
            owner: None,
            owner_confidence: None,
            soft_failed,
        };
    }

    FailureClassification {
        failure_key: key,
        failure,
        category: FailureCategory::NeedsHumanTriage,
        github_issue: None,
        confidence: NEEDS_HUMAN_TRIAGE_CONFIDENCE,
        reason: "no error message available for automatic classification".to_string(),
        owner: None,
        owner_confidence: None,
        soft_failed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(test_name: &str, job_name: &str, error_message: &str) -> TestFailure {
        TestFailure {
            test_name: test_name.to_string(),
            job_name: job_name.to_string(),
            error_message: Some(error_message.to_string()),
            stack_trace: None,
            log_snippet: None,
        }
    }

    #[tokio::test]
    async fn infra_wins_over_default() {
        let f = failure("t.py::m", "J", "Connection timed out after 30s");
        let c = classify_failure(f, "o/r", false, None, false).await;
        assert_eq!(c.category, FailureCategory::InfraSuspected);
        assert_eq!(c.confidence, INFRA_CONFIDENCE);
        assert!(c.reason.contains("timeout"));
    }

    #[tokio::test]
    async fn flaky_wins_on_name() {
        let f = failure("t.py::test_flaky_behavior", "J", "AssertionError: random");
        let c = classify_failure(f, "o/r", false, None, false).await;
        assert_eq!(c.category, FailureCategory::FlakySuspected);
        assert_eq!(c.confidence, FLAKY_CONFIDENCE);
    }

    #[tokio::test]
    async fn new_regression_when_error_present() {
        let f = failure("t.py::m", "J", "AssertionError: oops");
        let c = classify_failure(f, "o/r", false, None, false).await;
        assert_eq!(c.category, FailureCategory::NewRegression);
    }

    #[tokio::test]
    async fn needs_human_triage_without_error_message() {
        let f = TestFailure {
            test_name: "t.py::m".to_string(),
            job_name: "J".to_string(),
            error_message: None,
            stack_trace: None,
            log_snippet: None,
        };
        let c = classify_failure(f, "o/r", false, None, false).await;
        assert_eq!(c.category, FailureCategory::NeedsHumanTriage);
    }
}
