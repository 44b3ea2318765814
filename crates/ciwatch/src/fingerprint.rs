//! Normalizes a free-form error message into a stable signature.

use std::sync::LazyLock;

use regex::Regex;

use crate::log_parser;

/// Substitution order matters: specific before general.
static NORMALIZATION_PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
                .unwrap(),
            "<UUID>",
        ),
        (
            Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").unwrap(),
            "<TIMESTAMP>",
        ),
        (Regex::new(r"0x[0-9a-fA-F]+").unwrap(), "<ADDR>"),
        (Regex::new(r"\d+\.\d+").unwrap(), "<NUM>"),
        (Regex::new(r"\b\d+\b").unwrap(), "<NUM>"),
    ]
});

/// Apply the ordered substitution table to `message`.
///
/// Idempotent: running the rules again on the output leaves it unchanged,
/// since every substitution's output (`<UUID>`, `<NUM>`, ...) contains no
/// characters any rule can match.
pub fn normalize_failure_fingerprint(message: &str) -> String {
    let mut out = message.to_string();
    for (pattern, replacement) in NORMALIZATION_PATTERNS.iter() {
        out = pattern.replace_all(&out, *replacement).into_owned();
    }
    out
}

/// Locate `nodeid`'s failure region in `log` (same logic as the log
/// parser), apply the error-signature patterns, then normalize. Falls back
/// to the 500 bytes following the `FAILED` line if no delimited section is
/// found.
pub fn extract_fingerprint(log: &str, nodeid: &str) -> Option<String> {
    let outcome = log_parser::find_outcome_for(log, nodeid);
    if let Some(msg) = outcome.error_message {
        return Some(normalize_failure_fingerprint(&msg));
    }

    let idx = log.find("FAILED")?;
    let rest = &log[idx..];
    let window_end = rest.len().min(500);
    let window = &rest[..window_end];
    let first_line = window.lines().next()?;
    if first_line.trim().is_empty() {
        None
    } else {
        Some(normalize_failure_fingerprint(first_line.trim()))
    }
}
