//! Stable dedup key over (job, test, normalized error head).

use sha2::{Digest, Sha256};

const MAX_ERROR_HEAD_LEN: usize = 100;

/// First 16 hex chars of SHA-256 over
/// `<lowercased, space-to-underscore job_name>::<test_name>[::<error head>]`.
///
/// The error-message field is omitted entirely (not even an empty `::`)
/// when no error message is present.
pub fn failure_key(job_name: &str, test_name: &str, error_message: Option<&str>) -> String {
    let normalized_job = job_name.to_lowercase().replace(' ', "_");
    let mut input = format!("{normalized_job}::{test_name}");

    if let Some(msg) = error_message {
        let first_line = msg.lines().next().unwrap_or("");
        let head: String = first_line.chars().take(MAX_ERROR_HEAD_LEN).collect();
        input.push_str("::");
        input.push_str(&head);
    }

    let digest = Sha256::digest(input.as_bytes());
    hex::encode(digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_inputs_produce_identical_keys() {
        let a = failure_key("My Job", "t.py::test_a", Some("boom\nmore"));
        let b = failure_key("My Job", "t.py::test_a", Some("boom\nmore"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn missing_error_message_omits_third_field() {
        let with_empty = failure_key("job", "t.py::test_a", None);
        let with_msg = failure_key("job", "t.py::test_a", Some(""));
        // None omits the field entirely, Some("") still appends "::" + "".
        assert_ne!(with_empty, with_msg);
    }

    #[test]
    fn job_name_is_case_and_space_normalized() {
        let a = failure_key("My Job", "t.py::test_a", None);
        let b = failure_key("my_job", "t.py::test_a", None);
        assert_eq!(a, b);
    }
}
