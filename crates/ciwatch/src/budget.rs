//! The only shared mutable state within one invocation.
//!
//! A tiny struct with an integer counter, a boolean, and a list of at most
//! one warning message. Mutation is serialized with a mutex; no lock-free
//! tricks needed for this level of contention.

use std::sync::Mutex;

pub const DEFAULT_MAX_JOBS_PER_BUILD: usize = 20;
pub const DEFAULT_MAX_LOG_BYTES: u64 = 200_000;
pub const DEFAULT_ESTIMATED_LOG_SIZE_PER_JOB: u64 = 10_000;

#[derive(Debug, Default)]
struct BudgetState {
    total_log_bytes: u64,
    exhausted: bool,
    warnings: Vec<String>,
}

/// Per-invocation resource governor bounding cumulative log bytes fetched.
pub struct Budget {
    pub max_jobs_per_build: usize,
    pub max_log_bytes: u64,
    estimated_log_size_per_job: u64,
    state: Mutex<BudgetState>,
}

impl Budget {
    pub fn new(max_jobs_per_build: usize, max_log_bytes: u64, estimated_log_size_per_job: u64) -> Self {
        Self {
            max_jobs_per_build,
            max_log_bytes,
            estimated_log_size_per_job,
            state: Mutex::new(BudgetState::default()),
        }
    }

    /// Can we afford another log fetch of `estimate` bytes (defaulting to
    /// the configured per-job estimate)? Once exhausted, always `false` for
    /// the remaining lifetime of this `Budget`.
    pub fn can_fetch_log(&self, estimate: Option<u64>) -> bool {
        let estimate = estimate.unwrap_or(self.estimated_log_size_per_job);
        let mut state = self.state.lock().unwrap();
        if state.exhausted {
            return false;
        }
        if state.total_log_bytes + estimate > self.max_log_bytes {
            state.exhausted = true;
            state.warnings.push(format!(
                "Log budget exhausted: {}/{} bytes",
                state.total_log_bytes, self.max_log_bytes
            ));
            return false;
        }
        true
    }

    /// Record the actual size of a completed fetch.
    pub fn record_log_fetch(&self, actual_size: u64) {
        let mut state = self.state.lock().unwrap();
        state.total_log_bytes += actual_size;
    }

    pub fn is_exhausted(&self) -> bool {
        self.state.lock().unwrap().exhausted
    }

    pub fn warnings(&self) -> Vec<String> {
        self.state.lock().unwrap().warnings.clone()
    }

    pub fn total_log_bytes(&self) -> u64 {
        self.state.lock().unwrap().total_log_bytes
    }
}

impl Default for Budget {
    fn default() -> Self {
        Self::new(
            DEFAULT_MAX_JOBS_PER_BUILD,
            DEFAULT_MAX_LOG_BYTES,
            DEFAULT_ESTIMATED_LOG_SIZE_PER_JOB,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_warning_on_first_exhaustion() {
        let budget = Budget::new(20, 1000, 10_000);
        assert!(budget.can_fetch_log(Some(500)));
        budget.record_log_fetch(500);
        assert!(budget.can_fetch_log(Some(400)));
        budget.record_log_fetch(400);

        assert!(!budget.can_fetch_log(Some(200)));
        assert!(budget.is_exhausted());
        assert_eq!(budget.warnings().len(), 1);

        assert!(!budget.can_fetch_log(Some(200)));
        assert_eq!(budget.warnings().len(), 1);
    }
}
