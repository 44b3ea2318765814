//! Turns a raw Buildkite job log into a list of [`TestFailure`]s.
//!
//! Buildkite logs interleave ANSI color codes (`ESC[...m`) and inline
//! timestamp markers (`_bk;t=<millis><BEL>`) with the tokens we care about.
//! Patterns below admit that noise between tokens rather than pre-stripping
//! the whole log, because pre-stripping would shift the byte offsets used
//! for section extraction.

use std::sync::LazyLock;

use regex::Regex;

use crate::config::{MAX_ERROR_MESSAGE_LENGTH, MAX_LOG_SNIPPET_LENGTH, MAX_STACK_TRACE_LENGTH};
use crate::models::TestFailure;

/// ANSI SGR escape sequence.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());

/// Buildkite's inline timestamp marker.
static BK_TIMESTAMP_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_bk;t=\d+\x07?").unwrap());

/// One "noise token" that may appear between a status word and a nodeid.
const NOISE: &str = r"(?:\x1b\[[0-9;]*m|_bk;t=\d+\x07?|\s)";

/// `FAILED <nodeid>` / `ERROR <nodeid>` / `PASSED <nodeid>` (legacy layout).
static LEGACY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"(FAILED|ERROR|PASSED){noise}*((?:[^\s\x1b]|\x1b\[[0-9;]*m)+)",
        noise = NOISE
    ))
    .unwrap()
});

/// `<nodeid> FAILED|ERROR|PASSED` (modern layout).
static MODERN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!(
        r"((?:[^\s\x1b]|\x1b\[[0-9;]*m)+){noise}*(FAILED|ERROR|PASSED)\b",
        noise = NOISE
    ))
    .unwrap()
});

static SHORT_SUMMARY_HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"={3,}\s*short test summary info\s*={3,}").unwrap());

static SECTION_BREAK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"={3,}").unwrap());

static SUMMARY_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^(FAILED|ERROR)\s+([^\s\x1b]+)").unwrap());

/// Error-signature patterns tried in order against a per-test failure
/// section; first hit wins.
static ERROR_SIGNATURE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?m)^\w*Error: .+$").unwrap(),
        Regex::new(r"(?m)^AssertionError: .+$").unwrap(),
        Regex::new(r"(?m)^RuntimeError: .+$").unwrap(),
        Regex::new(r"(?m)^TimeoutError: .+$").unwrap(),
    ]
});

/// Status a single status-token match resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Failed,
    Error,
    Passed,
}

impl NodeStatus {
    fn from_token(token: &str) -> Self {
        match token {
            "FAILED" => NodeStatus::Failed,
            "ERROR" => NodeStatus::Error,
            _ => NodeStatus::Passed,
        }
    }

    fn is_failure(self) -> bool {
        matches!(self, NodeStatus::Failed | NodeStatus::Error)
    }
}

/// Outcome of searching a full log for one specific nodeid.
#[derive(Debug, Clone, Default)]
pub struct NodeOutcome {
    pub found: bool,
    pub status: Option<NodeStatus>,
    pub error_message: Option<String>,
    pub log_excerpt: Option<String>,
}

fn strip_noise(s: &str) -> String {
    let s = ANSI_RE.replace_all(s, "");
    BK_TIMESTAMP_RE.replace_all(&s, "").into_owned()
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

/// Scan `text` for every legacy- or modern-form status/nodeid pair, in the
/// order they appear.
fn scan_status_tokens(text: &str) -> Vec<(usize, NodeStatus, String)> {
    let mut hits = Vec::new();

    for caps in LEGACY_RE.captures_iter(text) {
        let m = caps.get(0).unwrap();
        let status = NodeStatus::from_token(&caps[1]);
        let nodeid = strip_noise(&caps[2]);
        if nodeid.contains("::") {
            hits.push((m.start(), status, nodeid));
        }
    }
    for caps in MODERN_RE.captures_iter(text) {
        let m = caps.get(0).unwrap();
        let status = NodeStatus::from_token(&caps[2]);
        let nodeid = strip_noise(&caps[1]);
        if nodeid.contains("::") {
            hits.push((m.start(), status, nodeid));
        }
    }

    hits.sort_by_key(|(pos, _, _)| *pos);
    hits
}

/// Locate the `_{10,}\s*<nodeid>\s*_{10,}` delimited section for `nodeid`,
/// pytest's per-test failure block convention. Returns the section body.
fn find_underscore_section<'a>(text: &'a str, nodeid: &str) -> Option<&'a str> {
    let escaped = regex::escape(nodeid);
    let pattern = format!(r"(?s)_{{10,}}\s*{escaped}\s*_{{10,}}(.*?)(?:_{{10,}}|\z)");
    let re = Regex::new(&pattern).ok()?;
    let caps = re.captures(text)?;
    caps.get(1).map(|m| m.as_str())
}

/// Grab the nodeid followed by up to 10 newlines of bounded context, used
/// when no underscore-delimited section exists.
fn bounded_context<'a>(text: &'a str, nodeid: &str) -> Option<&'a str> {
    let idx = text.find(nodeid)?;
    let rest = &text[idx..];
    let mut newline_count = 0;
    let mut end = rest.len();
    for (i, c) in rest.char_indices() {
        if c == '\n' {
            newline_count += 1;
            if newline_count >= 10 {
                end = i;
                break;
            }
        }
    }
    Some(&rest[..end])
}

/// Extract `(error_message, stack_trace, log_snippet)` for a failure section.
fn extract_detail(section: &str) -> (Option<String>, Option<String>, Option<String>) {
    let error_message = ERROR_SIGNATURE_PATTERNS.iter().find_map(|re| {
        re.find(section)
            .map(|m| truncate(m.as_str().trim(), MAX_ERROR_MESSAGE_LENGTH))
    });
    let stack_trace = Some(truncate(section.trim(), MAX_STACK_TRACE_LENGTH));
    let log_snippet = Some(truncate(section.trim(), MAX_LOG_SNIPPET_LENGTH));
    (error_message, stack_trace, log_snippet)
}

/// Build the `TestFailure` detail fields for one failing nodeid.
fn detail_for_nodeid(log: &str, nodeid: &str) -> (Option<String>, Option<String>, Option<String>) {
    if let Some(section) = find_underscore_section(log, nodeid) {
        extract_detail(section)
    } else if let Some(context) = bounded_context(log, nodeid) {
        (None, None, Some(truncate(context.trim(), MAX_LOG_SNIPPET_LENGTH)))
    } else {
        (None, None, None)
    }
}

/// C1 entry point: extract all test failures from one job's raw log text.
///
/// Never fails: on empty input, or input with no recognizable pytest
/// markers, returns a single synthetic job-level failure.
pub fn extract_test_failures(log: &str, job_name: &str) -> Vec<TestFailure> {
    let hits = scan_status_tokens(log);

    let mut seen = std::collections::HashSet::new();
    let mut failures = Vec::new();
    for (_, status, nodeid) in &hits {
        if !status.is_failure() {
            continue;
        }
        if !seen.insert(nodeid.clone()) {
            continue;
        }
        let (error_message, stack_trace, log_snippet) = detail_for_nodeid(log, nodeid);
        failures.push(TestFailure {
            test_name: nodeid.clone(),
            job_name: job_name.to_string(),
            error_message,
            stack_trace,
            log_snippet,
        });
    }

    if !failures.is_empty() {
        return failures;
    }

    if let Some(header) = SHORT_SUMMARY_HEADER_RE.find(log) {
        let after = &log[header.end()..];
        let section_end = SECTION_BREAK_RE.find(after).map_or(after.len(), |m| m.start());
        let section = &after[..section_end];
        let mut seen = std::collections::HashSet::new();
        for caps in SUMMARY_LINE_RE.captures_iter(section) {
            let nodeid = strip_noise(&caps[2]);
            if !nodeid.contains("::") || !seen.insert(nodeid.clone()) {
                continue;
            }
            let (error_message, stack_trace, log_snippet) = detail_for_nodeid(log, &nodeid);
            failures.push(TestFailure {
                test_name: nodeid,
                job_name: job_name.to_string(),
                error_message,
                stack_trace,
                log_snippet,
            });
        }
        if !failures.is_empty() {
            return failures;
        }
    }

    let tail_start = log.len().saturating_sub(MAX_LOG_SNIPPET_LENGTH);
    vec![TestFailure {
        test_name: job_name.to_string(),
        job_name: job_name.to_string(),
        error_message: Some("Job failed without pytest test names".to_string()),
        stack_trace: None,
        log_snippet: Some(log[tail_start..].to_string()),
    }]
}

/// Search the full log for a specific nodeid across all three status forms.
pub fn find_outcome_for(log: &str, nodeid: &str) -> NodeOutcome {
    let hits = scan_status_tokens(log);
    let Some((_, status, _)) = hits.iter().find(|(_, _, n)| n == nodeid) else {
        return NodeOutcome::default();
    };

    if status.is_failure() {
        let (error_message, _stack_trace, log_excerpt) = detail_for_nodeid(log, nodeid);
        NodeOutcome {
            found: true,
            status: Some(*status),
            error_message,
            log_excerpt,
        }
    } else {
        NodeOutcome {
            found: true,
            status: Some(*status),
            error_message: None,
            log_excerpt: None,
        }
    }
}
