//! Renders a `ScanResult` into the two text views the dispatcher
//! exposes, and a `Timeline` into a narrative summary.

use std::fmt::Write as _;

use chrono::Utc;

use crate::models::{Assessment, FailureCategory, ScanResult, Timeline, TimelineClassification};

fn truncated_commit(commit: &str) -> &str {
    &commit[..commit.len().min(8)]
}

/// Detailed "daily findings" report: header, summary block, hard failures
/// grouped by category in fixed order, then soft failures in compact form.
pub fn render_daily_findings(result: &ScanResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# CI Daily Findings — {}", Utc::now().format("%Y-%m-%d"));
    out.push('\n');

    let (hard, soft): (Vec<_>, Vec<_>) = result.failures.iter().partition(|f| !f.soft_failed);

    let _ = writeln!(
        out,
        "Build [{}]({}) on `{}` @ `{}`",
        result.build_info.build_number,
        result.build_info.build_url,
        result.build_info.branch,
        truncated_commit(&result.build_info.commit),
    );
    let _ = writeln!(
        out,
        "Jobs: {} total, {} failed. Unique failures: {} hard / {} soft.",
        result.total_jobs,
        result.failed_jobs,
        hard.len(),
        soft.len(),
    );
    if hard.is_empty() && !soft.is_empty() {
        out.push_str("PASSED (all failures are optional)\n");
    }
    out.push('\n');

    out.push_str("## Hard Failures\n\n");
    for category in FailureCategory::RENDER_ORDER {
        let in_category: Vec<_> = hard.iter().filter(|f| f.category == category).collect();
        if in_category.is_empty() {
            continue;
        }
        let _ = writeln!(out, "### {}\n", category.label());
        for f in in_category {
            let error = f
                .failure
                .error_message
                .as_deref()
                .unwrap_or("(no error message)");
            let _ = writeln!(
                out,
                "- **{}** (job `{}`): {}\n  reason: {} (confidence {:.0}%){}{}",
                f.failure.test_name,
                f.failure.job_name,
                error,
                f.reason,
                f.confidence * 100.0,
                f.github_issue
                    .as_ref()
                    .map(|url| format!("\n  issue: {url}"))
                    .unwrap_or_default(),
                f.owner
                    .as_ref()
                    .map(|owner| format!(
                        "\n  owner: {owner} (confidence {:.0}%)",
                        f.owner_confidence.unwrap_or(0.0) * 100.0
                    ))
                    .unwrap_or_default(),
            );
        }
        out.push('\n');
    }

    if !soft.is_empty() {
        out.push_str("## Soft Failures\n\n");
        for f in &soft {
            let _ = writeln!(
                out,
                "- job `{}`{}",
                f.failure.job_name,
                f.github_issue
                    .as_ref()
                    .map(|url| format!(" — {url}"))
                    .unwrap_or_default(),
            );
        }
    }

    out
}

/// Single-line standup summary of a `ScanResult`.
pub fn render_standup_summary(result: &ScanResult) -> String {
    let (hard, soft): (Vec<_>, Vec<_>) = result.failures.iter().partition(|f| !f.soft_failed);

    let category_counts = |failures: &[&crate::models::FailureClassification]| {
        FailureCategory::RENDER_ORDER
            .iter()
            .filter_map(|cat| {
                let count = failures.iter().filter(|f| f.category == *cat).count();
                if count > 0 {
                    Some(format!("{} {}", count, cat.label()))
                } else {
                    None
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let build_link = format!(
        "[{}]({})",
        result.build_info.build_number, result.build_info.build_url
    );

    let mut line = if hard.is_empty() && !soft.is_empty() {
        format!(
            "Nightly build {build_link} PASSED with {} soft-failed (optional) tests: {}",
            soft.len(),
            category_counts(&hard),
        )
    } else {
        format!(
            "Nightly build {build_link} {:?} with {} unique failures ({} hard / {} soft): {}.",
            result.build_info.state,
            result.failures.len(),
            hard.len(),
            soft.len(),
            category_counts(&hard),
        )
    };

    let regression_tests: Vec<&str> = hard
        .iter()
        .filter(|f| f.category == FailureCategory::NewRegression)
        .map(|f| {
            f.failure
                .test_name
                .rsplit("::")
                .next()
                .unwrap_or(&f.failure.test_name)
        })
        .take(3)
        .collect();

    if !regression_tests.is_empty() {
        line.push_str(&format!(
            "\nKey NEW_REGRESSION tests: {}",
            regression_tests.join(", ")
        ));
    }

    line
}

/// Narrative rendering of a test-history `Timeline` + `Assessment`.
pub fn render_timeline_narrative(timeline: &Timeline, assessment: &Assessment) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:?} ({:?} confidence) across {} builds",
        assessment.classification,
        assessment.confidence,
        timeline.len()
    );
    for note in &assessment.notes {
        let _ = writeln!(out, "- {note}");
    }
    if assessment.classification == TimelineClassification::Regression {
        if let Some(build) = &assessment.transition_build {
            let _ = writeln!(out, "Regression onset at build {build}");
        }
    }

    out.push_str("\nRecent builds:\n");
    for entry in timeline.iter().rev().take(5) {
        let emoji = match entry.test_status {
            crate::models::TestStatus::Pass => "✅",
            crate::models::TestStatus::Fail => "❌",
            crate::models::TestStatus::Unknown => "❔",
        };
        let _ = writeln!(
            out,
            "{emoji} [{}]({}) — {:?}",
            entry.build_number, entry.build_url, entry.test_status
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BuildInfo, BuildState, FailureClassification, TestFailure};
    use chrono::Utc;

    fn scan_result(failures: Vec<FailureClassification>) -> ScanResult {
        ScanResult {
            build_info: BuildInfo {
                build_number: "42".to_string(),
                build_url: "https://buildkite.com/vllm/ci/builds/42".to_string(),
                pipeline: "vllm/ci".to_string(),
                branch: "main".to_string(),
                commit: "abcdef1234567890".to_string(),
                state: BuildState::Failed,
                created_at: Utc::now(),
                finished_at: None,
                source: "schedule".to_string(),
                message: String::new(),
            },
            total_jobs: 5,
            failed_jobs: 2,
            failures,
            scan_timestamp: Utc::now(),
        }
    }

    fn failure(category: FailureCategory, soft_failed: bool) -> FailureClassification {
        FailureClassification {
            failure_key: "abc123".to_string(),
            failure: TestFailure {
                test_name: "tests/a.py::test_x".to_string(),
                job_name: "job".to_string(),
                error_message: Some("boom".to_string()),
                stack_trace: None,
                log_snippet: None,
            },
            category,
            github_issue: None,
            confidence: 0.5,
            reason: "reason".to_string(),
            owner: None,
            owner_confidence: None,
            soft_failed,
        }
    }

    #[test]
    fn detailed_report_lists_all_failures() {
        let result = scan_result(vec![
            failure(FailureCategory::NewRegression, false),
            failure(FailureCategory::FlakySuspected, true),
        ]);
        let rendered = render_daily_findings(&result);
        assert!(rendered.contains("NEW_REGRESSION"));
        assert!(rendered.contains("Soft Failures"));
    }

    #[test]
    fn standup_mentions_regression_tests() {
        let result = scan_result(vec![failure(FailureCategory::NewRegression, false)]);
        let summary = render_standup_summary(&result);
        assert!(summary.contains("Key NEW_REGRESSION tests: test_x"));
    }
}
