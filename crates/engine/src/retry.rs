//! Retry policy

use crate::attempt::Attempt;

/// Decides whether a sealed attempt earns another try
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Upper bound on attempts per work item
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// `attempts_so_far` includes `attempt` itself
    pub fn should_retry(&self, attempt: &Attempt, attempts_so_far: &[Attempt]) -> bool {
        should_retry(attempt, attempts_so_far, self.max_retries)
    }
}

/// Retry iff the attempt failed or timed out on its own and the item still
/// has retries left. Passed and skipped attempts are final. An attempt cut
/// short by the run deadline is never retried.
pub fn should_retry(attempt: &Attempt, attempts_so_far: &[Attempt], max_retries: u32) -> bool {
    attempt.status.is_failure()
        && !attempt.hit_run_deadline()
        && attempts_so_far.len() <= max_retries as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attempt::{AttemptError, AttemptStatus, ErrorKind};
    use chrono::Utc;
    use std::time::Duration;

    fn attempt(number: u32, status: AttemptStatus) -> Attempt {
        let error = status
            .is_failure()
            .then(|| AttemptError::new(ErrorKind::Assertion, "boom"));
        Attempt::seal(number, status, Utc::now(), Duration::from_millis(5), error)
    }

    #[test]
    fn test_failures_retry_until_exhausted() {
        let policy = RetryPolicy::new(2);
        let mut history = vec![attempt(1, AttemptStatus::Failed)];
        assert!(policy.should_retry(&history[0], &history));

        history.push(attempt(2, AttemptStatus::TimedOut));
        assert!(policy.should_retry(&history[1], &history));

        history.push(attempt(3, AttemptStatus::Failed));
        assert!(!policy.should_retry(&history[2], &history));
        assert_eq!(history.len() as u32, policy.max_attempts());
    }

    #[test]
    fn test_no_retries_configured() {
        let history = vec![attempt(1, AttemptStatus::Failed)];
        assert!(!should_retry(&history[0], &history, 0));
    }

    #[test]
    fn test_success_and_skip_are_final() {
        let policy = RetryPolicy::new(3);
        let passed = vec![attempt(1, AttemptStatus::Passed)];
        assert!(!policy.should_retry(&passed[0], &passed));
        let skipped = vec![attempt(1, AttemptStatus::Skipped)];
        assert!(!policy.should_retry(&skipped[0], &skipped));
    }

    #[test]
    fn test_run_deadline_overrides_policy() {
        let policy = RetryPolicy::new(5);
        let mut a = attempt(1, AttemptStatus::TimedOut);
        a.error = Some(AttemptError::run_deadline());
        let history = vec![a.clone()];
        assert!(!policy.should_retry(&a, &history));

        a.error = Some(AttemptError::attempt_timeout(Duration::from_secs(30)));
        assert!(policy.should_retry(&a, &[a.clone()]));
    }
}
