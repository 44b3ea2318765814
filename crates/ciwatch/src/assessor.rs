//! Statistical classification of a test's pass/fail timeline.

use std::collections::HashMap;

use crate::models::{Assessment, Confidence, Timeline, TimelineClassification, TestStatus};

const MIN_FOUND_ENTRIES: usize = 3;
const REGRESSION_BEFORE_THRESHOLD: f64 = 0.2;
const REGRESSION_AFTER_THRESHOLD: f64 = 0.8;
const CONSISTENT_FINGERPRINT_THRESHOLD: f64 = 0.8;
const BAND_LOW: f64 = 0.2;
const BAND_HIGH: f64 = 0.8;

fn fail_rate(entries: &[&crate::models::TimelineEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    let failed = entries
        .iter()
        .filter(|e| e.test_status == TestStatus::Fail)
        .count();
    failed as f64 / entries.len() as f64
}

/// Smallest `i` such that the fail rate over `found[0..i)` is below 0.2 and
/// over `found[i..)` is above 0.8.
fn find_transition_point(found: &[&crate::models::TimelineEntry]) -> Option<usize> {
    for i in 1..found.len() {
        let before = fail_rate(&found[..i]);
        let after = fail_rate(&found[i..]);
        if before < REGRESSION_BEFORE_THRESHOLD && after > REGRESSION_AFTER_THRESHOLD {
            return Some(i);
        }
    }
    None
}

/// Does the modal `fingerprint_normalized` among the failing entries of
/// `slice` occur in more than 80% of them? Returns the modal value too.
fn consistent_fingerprint_after(slice: &[&crate::models::TimelineEntry]) -> Option<(String, f64)> {
    let fingerprints: Vec<String> = slice
        .iter()
        .filter(|e| e.test_status == TestStatus::Fail)
        .flat_map(|e| {
            e.jobs
                .iter()
                .filter_map(|j| j.fingerprint_normalized.clone())
        })
        .collect();

    if fingerprints.is_empty() {
        return None;
    }

    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();
    for fp in &fingerprints {
        if !counts.contains_key(fp) {
            order.push(fp.clone());
        }
        *counts.entry(fp.clone()).or_insert(0) += 1;
    }

    // `most_common`-style tie-break: first candidate encountered wins ties.
    let (modal, count) = order
        .into_iter()
        .map(|fp| {
            let c = counts[&fp];
            (fp, c)
        })
        .max_by_key(|(_, c)| *c)?;

    let ratio = count as f64 / fingerprints.len() as f64;
    Some((modal, ratio))
}

fn distinct_fingerprint_count(slice: &[&crate::models::TimelineEntry]) -> usize {
    let mut set = std::collections::HashSet::new();
    for e in slice.iter().filter(|e| e.test_status == TestStatus::Fail) {
        for j in &e.jobs {
            if let Some(fp) = &j.fingerprint_normalized {
                set.insert(fp.clone());
            }
        }
    }
    set.len()
}

/// C8 entry point: assess a timeline's `found` subsequence
/// (`test_found == true` entries).
pub fn assess_test_history(timeline: &Timeline) -> Assessment {
    let found: Vec<&crate::models::TimelineEntry> =
        timeline.iter().filter(|e| e.test_found).collect();

    if found.len() < MIN_FOUND_ENTRIES {
        return Assessment {
            classification: TimelineClassification::InsufficientData,
            confidence: Confidence::Low,
            notes: vec![format!(
                "only {} of {} required test_found entries",
                found.len(),
                MIN_FOUND_ENTRIES
            )],
            transition_build: None,
        };
    }

    let overall_fail_rate = fail_rate(&found);

    if let Some(i) = find_transition_point(&found) {
        if let Some((modal_fp, ratio)) = consistent_fingerprint_after(&found[i..]) {
            if ratio > CONSISTENT_FINGERPRINT_THRESHOLD {
                let before_rate = fail_rate(&found[..i]);
                let after_rate = fail_rate(&found[i..]);
                return Assessment {
                    classification: TimelineClassification::Regression,
                    confidence: Confidence::High,
                    notes: vec![
                        format!("fail rate before transition: {before_rate:.2}"),
                        format!("fail rate after transition: {after_rate:.2}"),
                        format!("dominant fingerprint: {modal_fp}"),
                        format!("commit at transition: {}", found[i].commit_sha),
                    ],
                    transition_build: Some(found[i].build_number.clone()),
                };
            }
        }
        // Transition exists but post-transition fingerprints aren't
        // consistent enough: fall through to the fail-rate bands rather
        // than inventing a MED-confidence regression tier.
    }

    if (BAND_LOW..=BAND_HIGH).contains(&overall_fail_rate) {
        let distinct = distinct_fingerprint_count(&found);
        return if distinct > 1 {
            Assessment {
                classification: TimelineClassification::FlakeOnset,
                confidence: Confidence::Med,
                notes: vec![format!(
                    "fail rate {overall_fail_rate:.2} with {distinct} distinct fingerprints"
                )],
                transition_build: None,
            }
        } else {
            Assessment {
                classification: TimelineClassification::Sporadic,
                confidence: Confidence::Med,
                notes: vec![format!(
                    "fail rate {overall_fail_rate:.2} with a single or absent fingerprint"
                )],
                transition_build: None,
            }
        };
    }

    if overall_fail_rate > BAND_HIGH {
        return Assessment {
            classification: TimelineClassification::PersistentFail,
            confidence: Confidence::High,
            notes: vec![format!("fail rate {overall_fail_rate:.2}")],
            transition_build: None,
        };
    }

    Assessment {
        classification: TimelineClassification::Sporadic,
        confidence: Confidence::High,
        notes: vec![format!("fail rate {overall_fail_rate:.2}")],
        transition_build: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{JobOutcome, TimelineEntry};
    use chrono::Utc;

    fn entry(status: TestStatus, build_number: &str, fingerprint: Option<&str>) -> TimelineEntry {
        TimelineEntry {
            build_number: build_number.to_string(),
            build_url: String::new(),
            created_at: Utc::now(),
            commit_sha: "deadbeef".to_string(),
            test_found: true,
            test_status: status,
            jobs: if status == TestStatus::Fail {
                vec![JobOutcome {
                    job_name: "job".to_string(),
                    job_url: String::new(),
                    status,
                    fingerprint_raw: fingerprint.map(str::to_string),
                    fingerprint_normalized: fingerprint.map(str::to_string),
                    log_excerpt: None,
                    error_message: None,
                }]
            } else {
                vec![]
            },
        }
    }

    #[test]
    fn insufficient_data_below_three() {
        let timeline = vec![entry(TestStatus::Pass, "1", None)];
        let assessment = assess_test_history(&timeline);
        assert_eq!(
            assessment.classification,
            TimelineClassification::InsufficientData
        );
    }

    #[test]
    fn regression_on_clean_transition() {
        let timeline = vec![
            entry(TestStatus::Pass, "1", None),
            entry(TestStatus::Pass, "2", None),
            entry(TestStatus::Fail, "3", Some("Error A")),
            entry(TestStatus::Fail, "4", Some("Error A")),
            entry(TestStatus::Fail, "5", Some("Error A")),
        ];
        let assessment = assess_test_history(&timeline);
        assert_eq!(assessment.classification, TimelineClassification::Regression);
        assert_eq!(assessment.confidence, Confidence::High);
        assert_eq!(assessment.transition_build.as_deref(), Some("3"));
    }

    #[test]
    fn flake_onset_with_diverse_fingerprints() {
        let mut timeline = Vec::new();
        let fingerprints = ["Error A", "Error B", "Error C"];
        for i in 0..10 {
            let build_number = (i + 1).to_string();
            if i % 2 == 0 {
                timeline.push(entry(TestStatus::Fail, &build_number, Some(fingerprints[i % 3])));
            } else {
                timeline.push(entry(TestStatus::Pass, &build_number, None));
            }
        }
        let assessment = assess_test_history(&timeline);
        assert_eq!(assessment.classification, TimelineClassification::FlakeOnset);
        assert_eq!(assessment.confidence, Confidence::Med);
    }

    #[test]
    fn persistent_fail_above_band() {
        // Overall fail rate 5/6 > 0.8. A transition exists at i=1 (0% before,
        // 100% after), but the post-transition fingerprints are all
        // distinct, so this falls through to the fail-rate bands rather
        // than reporting REGRESSION.
        let timeline = vec![
            entry(TestStatus::Pass, "1", None),
            entry(TestStatus::Fail, "2", Some("Error A")),
            entry(TestStatus::Fail, "3", Some("Error B")),
            entry(TestStatus::Fail, "4", Some("Error C")),
            entry(TestStatus::Fail, "5", Some("Error D")),
            entry(TestStatus::Fail, "6", Some("Error E")),
        ];
        let assessment = assess_test_history(&timeline);
        assert_eq!(
            assessment.classification,
            TimelineClassification::PersistentFail
        );
        assert_eq!(assessment.confidence, Confidence::High);
    }
}
