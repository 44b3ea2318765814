//! Data model shared across the scan and history-timeline pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// State of a Buildkite build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildState {
    Passed,
    Failed,
    Failing,
    Canceled,
    Running,
    Scheduled,
    #[serde(other)]
    Unknown,
}

/// Immutable snapshot of one Buildkite build, parsed from a single API record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildInfo {
    pub build_number: String,
    pub build_url: String,
    pub pipeline: String,
    pub branch: String,
    pub commit: String,
    pub state: BuildState,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub source: String,
    pub message: String,
}

/// A single job within a build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub job_name: String,
    pub state: String,
    pub exit_status: Option<i64>,
    pub soft_failed: bool,
    pub build_number: String,
}

impl JobInfo {
    /// Derived: a job "passed" iff its Buildkite state is `passed`.
    pub fn passed(&self) -> bool {
        self.state == "passed"
    }
}

/// A single extracted test failure, produced by the log parser.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFailure {
    pub test_name: String,
    pub job_name: String,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub log_snippet: Option<String>,
}

/// Category a failure is bucketed into by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    KnownTracked,
    InfraSuspected,
    FlakySuspected,
    NewRegression,
    NeedsHumanTriage,
}

impl FailureCategory {
    /// Fixed render order used by the detailed report.
    pub const RENDER_ORDER: [FailureCategory; 5] = [
        FailureCategory::NewRegression,
        FailureCategory::FlakySuspected,
        FailureCategory::InfraSuspected,
        FailureCategory::KnownTracked,
        FailureCategory::NeedsHumanTriage,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            FailureCategory::KnownTracked => "KNOWN_TRACKED",
            FailureCategory::InfraSuspected => "INFRA_SUSPECTED",
            FailureCategory::FlakySuspected => "FLAKY_SUSPECTED",
            FailureCategory::NewRegression => "NEW_REGRESSION",
            FailureCategory::NeedsHumanTriage => "NEEDS_HUMAN_TRIAGE",
        }
    }
}

/// A `TestFailure` enriched with classification, dedup key, and ownership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureClassification {
    pub failure_key: String,
    #[serde(flatten)]
    pub failure: TestFailure,
    pub category: FailureCategory,
    pub github_issue: Option<String>,
    pub confidence: f64,
    pub reason: String,
    pub owner: Option<String>,
    pub owner_confidence: Option<f64>,
    /// True when the job this failure came from is allowed to fail.
    pub soft_failed: bool,
}

/// Result of scanning one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub build_info: BuildInfo,
    pub total_jobs: usize,
    pub failed_jobs: usize,
    pub failures: Vec<FailureClassification>,
    pub scan_timestamp: DateTime<Utc>,
}

/// Status of one test id within one build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Unknown,
}

impl TestStatus {
    /// `fail` dominates `pass` dominates `unknown`.
    pub fn combine(self, other: TestStatus) -> TestStatus {
        use TestStatus::{Fail, Pass, Unknown};
        match (self, other) {
            (Fail, _) | (_, Fail) => Fail,
            (Pass, _) | (_, Pass) => Pass,
            (Unknown, Unknown) => Unknown,
        }
    }
}

/// Outcome of one job within one timeline entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job_name: String,
    pub job_url: String,
    pub status: TestStatus,
    pub fingerprint_raw: Option<String>,
    pub fingerprint_normalized: Option<String>,
    pub log_excerpt: Option<String>,
    pub error_message: Option<String>,
}

/// One build's worth of history for a single test id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub build_number: String,
    pub build_url: String,
    pub created_at: DateTime<Utc>,
    pub commit_sha: String,
    pub test_found: bool,
    pub test_status: TestStatus,
    pub jobs: Vec<JobOutcome>,
}

/// Statistical classification of a test's history timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineClassification {
    Regression,
    FlakeOnset,
    PersistentFail,
    Sporadic,
    InsufficientData,
}

/// Confidence tier attached to an `Assessment`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    High,
    Med,
    Low,
}

/// The assessor's verdict on a `Timeline`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub classification: TimelineClassification,
    pub confidence: Confidence,
    pub notes: Vec<String>,
    pub transition_build: Option<String>,
}

pub type Timeline = Vec<TimelineEntry>;

/// `detail_level` knob consumed by the Tool Dispatcher's scan projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetailLevel {
    Minimal,
    Summary,
    Full,
}
