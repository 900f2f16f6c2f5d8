//! Expectation engine: poll a condition until it holds or a timeout elapses
//!
//! Time is read from `tokio::time`, so tests can pause and advance the clock.

use regex::Regex;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::context::Observation;
use crate::error::{E2eError, E2eResult};

/// Result of one predicate evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    Satisfied,
    /// Not yet; carries the observed state for diagnostics
    Unsatisfied(String),
}

impl Check {
    pub fn from_bool(ok: bool, observed: impl fmt::Display) -> Self {
        if ok {
            Check::Satisfied
        } else {
            Check::Unsatisfied(observed.to_string())
        }
    }
}

/// Timeout and poll cadence for [`wait_for`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    timeout: Duration,
    poll_interval: Duration,
}

impl WaitOptions {
    /// A zero poll interval is rejected
    pub fn new(timeout: Duration, poll_interval: Duration) -> E2eResult<Self> {
        if poll_interval.is_zero() {
            return Err(E2eError::InvalidConfig(
                "poll interval must be greater than zero".into(),
            ));
        }
        Ok(Self {
            timeout,
            poll_interval,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// Evaluate `predicate` every `poll_interval` until it reports
/// [`Check::Satisfied`] or `timeout` elapses.
///
/// Returns as soon as the predicate is satisfied. On timeout, fails with
/// [`E2eError::ExpectationTimeout`] carrying the last unsatisfied observation.
/// Cancelling `cancel` interrupts the wait (including a predicate that is
/// suspended) with [`E2eError::Cancelled`]. Predicate errors are returned as-is.
pub async fn wait_for<F, Fut>(
    description: &str,
    mut predicate: F,
    options: WaitOptions,
    cancel: &CancellationToken,
) -> E2eResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = E2eResult<Check>>,
{
    if options.poll_interval.is_zero() {
        return Err(E2eError::InvalidConfig(
            "poll interval must be greater than zero".into(),
        ));
    }

    let deadline = Instant::now() + options.timeout;
    let mut last_observed = String::from("<not evaluated>");
    let timed_out = |last_observed: String| E2eError::ExpectationTimeout {
        description: description.to_string(),
        last_observed,
        timeout: options.timeout,
    };

    loop {
        let evaluation = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(E2eError::Cancelled(format!("{} interrupted", description)));
            }
            res = timeout_at(deadline, predicate()) => res,
        };

        match evaluation {
            Ok(Ok(Check::Satisfied)) => return Ok(()),
            Ok(Ok(Check::Unsatisfied(observed))) => {
                trace!("{}: not yet satisfied ({})", description, observed);
                last_observed = observed;
            }
            Ok(Err(e)) => return Err(e),
            // Predicate was still suspended at the deadline
            Err(_) => return Err(timed_out(last_observed)),
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out(last_observed));
        }

        let next = (now + options.poll_interval).min(deadline);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(E2eError::Cancelled(format!("{} interrupted", description)));
            }
            _ = sleep_until(next) => {}
        }
    }
}

// ============================================================================
// Matchers over observations
// ============================================================================

/// Condition on an [`Observation`]
#[derive(Debug, Clone)]
pub enum Matcher {
    Count(usize),
    Text(String),
    ContainsText(String),
    Matches(Regex),
    Visible(bool),
    Present,
    Absent,
}

impl Matcher {
    pub fn check(&self, observed: &Observation) -> Check {
        let ok = match (self, observed) {
            (Matcher::Count(n), Observation::Count(c)) => n == c,
            (Matcher::Text(t), Observation::Text(Some(s))) => normalize_ws(s) == normalize_ws(t),
            (Matcher::ContainsText(t), Observation::Text(Some(s))) => s.contains(t.as_str()),
            (Matcher::Matches(re), Observation::Text(Some(s))) => re.is_match(s),
            (Matcher::Visible(v), Observation::Flag(b)) => v == b,
            (Matcher::Present, Observation::Text(t)) => t.is_some(),
            (Matcher::Present, Observation::Count(c)) => *c > 0,
            (Matcher::Absent, Observation::Text(t)) => t.is_none(),
            (Matcher::Absent, Observation::Count(c)) => *c == 0,
            _ => false,
        };
        Check::from_bool(ok, observed)
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Count(n) => write!(f, "to have count {}", n),
            Matcher::Text(t) => write!(f, "to have text {:?}", t),
            Matcher::ContainsText(t) => write!(f, "to contain text {:?}", t),
            Matcher::Matches(re) => write!(f, "to match /{}/", re.as_str()),
            Matcher::Visible(true) => f.write_str("to be visible"),
            Matcher::Visible(false) => f.write_str("to be hidden"),
            Matcher::Present => f.write_str("to be present"),
            Matcher::Absent => f.write_str("to be absent"),
        }
    }
}

fn normalize_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
