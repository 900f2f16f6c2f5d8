//! Bounded worker pool that turns work items into sealed attempts
//!
//! Workers pull [`Pending`] attempts from one FIFO queue. Every first attempt
//! is enqueued up front in expansion order and retries go to the back, so a
//! retry never starts before an earlier item's first attempt was claimed.
//!
//! Each attempt gets a fresh execution context, runs its body on its own task
//! and is raced against the per-attempt timeout and the run token. The run
//! token fires on the run deadline or on an engine failure:
//!
//! * deadline: in-flight attempts seal `timedOut`, queued ones are sealed
//!   `timedOut` without running, nothing is retried
//! * engine failure: in-flight attempts are discarded and the report only
//!   covers items that already had a final outcome

use chrono::Utc;
use gauntlet_common::{ArtifactPolicy, RunConfig};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts;
use crate::attempt::{ArtifactRef, Attempt, AttemptError, AttemptStatus, ErrorKind};
use crate::context::{AttemptInfo, ContextProvider, SharedContext, TestContext, TestFailure};
use crate::error::{E2eError, E2eResult};
use crate::events::{EventSender, RunEvent};
use crate::expect::WaitOptions;
use crate::matrix::WorkItem;
use crate::report::{Report, ReportBuilder, ReportSettings};
use crate::retry::RetryPolicy;

/// Knobs the scheduler needs, resolved from [`RunConfig`]
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub parallelism: usize,
    pub max_retries: u32,
    pub per_attempt_timeout: Duration,
    pub run_deadline: Option<Duration>,
    pub expect: WaitOptions,
    pub base_url: Option<String>,
    pub output_dir: PathBuf,
    pub artifacts: ArtifactPolicy,
    /// Echoed into the report settings
    pub tag_expression: String,
}

impl SchedulerConfig {
    pub fn from_run_config(config: &RunConfig) -> E2eResult<Self> {
        Ok(Self {
            parallelism: config.parallelism,
            max_retries: config.max_retries,
            per_attempt_timeout: config.per_attempt_timeout(),
            run_deadline: config.run_deadline(),
            expect: WaitOptions::new(config.expect_timeout(), config.expect_poll_interval())?,
            base_url: config.base_url.clone(),
            output_dir: config.output_dir.clone(),
            artifacts: config.artifacts,
            tag_expression: config.tag_expression.clone().unwrap_or_default(),
        })
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            max_retries: 0,
            per_attempt_timeout: Duration::from_secs(30),
            run_deadline: None,
            expect: WaitOptions::default(),
            base_url: None,
            output_dir: PathBuf::from("test-results"),
            artifacts: ArtifactPolicy::default(),
            tag_expression: String::new(),
        }
    }
}

// ============================================================================
// Work queue
// ============================================================================

/// An attempt waiting for a worker
#[derive(Debug, Clone)]
struct Pending {
    item: WorkItem,
    number: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Pending>,
    in_flight: usize,
    closed: bool,
}

/// Shared pending-attempt queue. A claim moves one entry to in-flight under
/// the lock, so no two workers ever get the same attempt.
#[derive(Debug, Default)]
struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    fn new(items: &[WorkItem]) -> Self {
        let pending = items
            .iter()
            .cloned()
            .map(|item| Pending { item, number: 1 })
            .collect();
        Self {
            state: Mutex::new(QueueState {
                pending,
                ..QueueState::default()
            }),
            notify: Notify::new(),
        }
    }

    /// Next attempt to run. `None` once the queue is closed or drained with
    /// nothing in flight that could still produce a retry.
    async fn claim(&self) -> Option<Pending> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if state.closed {
                    return None;
                }
                if let Some(next) = state.pending.pop_front() {
                    state.in_flight += 1;
                    return Some(next);
                }
                if state.in_flight == 0 {
                    state.closed = true;
                    drop(state);
                    self.notify.notify_waiters();
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Release an in-flight slot, enqueueing `retry` if given. A retry is
    /// handed back when the queue has already been closed.
    fn complete(&self, retry: Option<Pending>) -> Option<Pending> {
        let rejected = {
            let mut state = self.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            match retry {
                Some(next) if state.closed => Some(next),
                Some(next) => {
                    state.pending.push_back(next);
                    None
                }
                None => None,
            }
        };
        self.notify.notify_waiters();
        rejected
    }

    /// Stop handing out work. Returns whatever was still queued.
    fn close(&self) -> Vec<Pending> {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain(..).collect()
        };
        self.notify.notify_waiters();
        drained
    }
}

// ============================================================================
// Scheduler
// ============================================================================

pub struct Scheduler {
    config: SchedulerConfig,
    provider: Arc<dyn ContextProvider>,
    events: Option<EventSender>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, provider: Arc<dyn ContextProvider>) -> Self {
        Self {
            config,
            provider,
            events: None,
        }
    }

    /// Stream [`RunEvent`]s to a live reporter
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run every work item to a final outcome and aggregate the report.
    ///
    /// Never fails: engine failures end up in [`Report::engine_error`].
    pub async fn run(&self, items: Vec<WorkItem>) -> Report {
        let started = Instant::now();
        let workers = self.config.parallelism.max(1).min(items.len().max(1));

        let mut projects: Vec<String> = Vec::new();
        for item in &items {
            if !projects.contains(&item.project.name) {
                projects.push(item.project.name.clone());
            }
        }
        let settings = ReportSettings {
            parallelism: workers,
            max_retries: self.config.max_retries,
            per_attempt_timeout_ms: self.config.per_attempt_timeout.as_millis() as u64,
            run_deadline_ms: self.config.run_deadline.map(|d| d.as_millis() as u64),
            tag_expression: self.config.tag_expression.clone(),
            projects,
        };

        info!(
            "Scheduling {} work items on {} workers (max retries: {})",
            items.len(),
            workers,
            self.config.max_retries
        );

        let shared = Arc::new(Shared::new(
            self.config.clone(),
            Arc::clone(&self.provider),
            self.events.clone(),
            &items,
            settings,
        ));

        shared.emit(RunEvent::RunStarted {
            work_items: items.len(),
            workers,
        });

        let deadline = self.config.run_deadline.map(|limit| {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                shared.expire(limit);
            })
        });

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            pool.spawn(Arc::clone(&shared).worker(worker_id));
        }

        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                // Already recorded by the worker before it returned
                Ok(Err(_)) => {}
                Err(e) => shared.fail(&E2eError::WorkerCrashed(join_error_message(e))),
            }
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        let engine_error = shared.engine_error.lock().take();
        let builder = std::mem::take(&mut *shared.records.lock());
        let report = builder.finish(started.elapsed(), engine_error);

        info!(
            "Run finished: {} passed, {} failed, {} flaky, {} skipped, {} timed out",
            report.summary.passed,
            report.summary.failed,
            report.summary.flaky,
            report.summary.skipped,
            report.summary.timed_out
        );
        shared.emit(RunEvent::RunFinished {
            summary: report.summary,
        });

        report
    }
}

/// State shared by all workers of one run
struct Shared {
    config: SchedulerConfig,
    provider: Arc<dyn ContextProvider>,
    policy: RetryPolicy,
    queue: WorkQueue,
    records: Mutex<ReportBuilder>,
    run_token: CancellationToken,
    deadline_hit: AtomicBool,
    engine_error: Mutex<Option<String>>,
    events: Option<EventSender>,
}

/// How the race around a running body ended
enum BodyEnd {
    Finished(Result<(Result<(), TestFailure>, Vec<ArtifactRef>), JoinError>),
    TimedOut,
    Interrupted,
}

impl Shared {
    fn new(
        config: SchedulerConfig,
        provider: Arc<dyn ContextProvider>,
        events: Option<EventSender>,
        items: &[WorkItem],
        settings: ReportSettings,
    ) -> Self {
        Self {
            policy: RetryPolicy::new(config.max_retries),
            config,
            provider,
            queue: WorkQueue::new(items),
            records: Mutex::new(ReportBuilder::new(items, settings)),
            run_token: CancellationToken::new(),
            deadline_hit: AtomicBool::new(false),
            engine_error: Mutex::new(None),
            events,
        }
    }

    fn emit(&self, event: RunEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn deadline_hit(&self) -> bool {
        self.deadline_hit.load(Ordering::SeqCst)
    }

    /// Run deadline elapsed
    fn expire(&self, limit: Duration) {
        if self.run_token.is_cancelled() {
            return;
        }
        warn!("Run deadline of {}ms exceeded, cancelling in-flight attempts", limit.as_millis());
        self.deadline_hit.store(true, Ordering::SeqCst);
        self.emit(RunEvent::DeadlineReached);
        self.run_token.cancel();

        for pending in self.queue.close() {
            self.seal_unstarted(pending);
        }
    }

    /// Engine failure: stop the run, keep only what is already final
    fn fail(&self, e: &E2eError) {
        error!("Engine failure: {}", e);
        self.engine_error.lock().get_or_insert_with(|| e.to_string());
        self.run_token.cancel();
        let dropped = self.queue.close();
        if !dropped.is_empty() {
            debug!("Discarding {} queued attempts", dropped.len());
        }
    }

    /// Final `timedOut` attempt for an item the deadline caught in the queue
    fn seal_unstarted(&self, pending: Pending) {
        let attempt = Attempt::interrupted_before_start(pending.number);
        {
            let mut records = self.records.lock();
            records.record(pending.item.index, attempt.clone());
            records.settle(pending.item.index);
        }
        self.emit(RunEvent::AttemptFinished {
            item: pending.item.id(),
            attempt,
            will_retry: false,
        });
    }

    async fn worker(self: Arc<Self>, worker_id: usize) -> E2eResult<()> {
        debug!("Worker {} started", worker_id);
        while let Some(pending) = self.queue.claim().await {
            match self.run_attempt(&pending).await {
                Ok(retry) => self.release(retry),
                Err(e) => {
                    self.fail(&e);
                    self.queue.complete(None);
                    return Err(e);
                }
            }
        }
        debug!("Worker {} finished", worker_id);
        Ok(())
    }

    /// Hand an in-flight slot back, enqueueing the retry if there is one.
    ///
    /// The queue may close between the retry decision and this call. After
    /// the deadline the retry is sealed `timedOut` without running; after an
    /// engine failure the item is left without a final outcome.
    fn release(&self, retry: Option<Pending>) {
        if let Some(rejected) = self.queue.complete(retry) {
            if self.deadline_hit() {
                self.seal_unstarted(rejected);
            } else {
                debug!("Dropping retry of {} after engine failure", rejected.item.id());
            }
        }
    }

    /// Execute one attempt. Returns the retry to enqueue, if any.
    async fn run_attempt(&self, pending: &Pending) -> E2eResult<Option<Pending>> {
        let item = &pending.item;
        let number = pending.number;
        let id = item.id();

        self.emit(RunEvent::AttemptStarted {
            item: id.clone(),
            number,
        });

        let started_at = Utc::now();
        let started = Instant::now();

        if let Some(reason) = item.test.skip_reason() {
            debug!("{} skipped: {}", id, reason);
            let attempt = Attempt::seal(
                number,
                AttemptStatus::Skipped,
                started_at,
                started.elapsed(),
                None,
            );
            return Ok(self.finish(pending, attempt));
        }

        let info = AttemptInfo {
            work_item: id.clone(),
            number,
            recordings: artifacts::recordings_for(&self.config.artifacts, number),
            output_dir: artifacts::attempt_dir(&self.config.output_dir, &id, number),
        };

        // Provisioning and the body share one per-attempt budget
        let timeout = item.project.timeout().unwrap_or(self.config.per_attempt_timeout);
        let attempt_deadline = started + timeout;

        let provisioned = tokio::select! {
            res = self.provider.provision(&item.project, &info) => res,
            _ = self.run_token.cancelled() => {
                if self.deadline_hit() {
                    self.seal_unstarted(pending.clone());
                }
                return Ok(None);
            }
            _ = tokio::time::sleep_until(attempt_deadline) => {
                return Err(E2eError::Provision {
                    project: item.project.name.clone(),
                    reason: format!(
                        "execution context not ready within {}ms",
                        timeout.as_millis()
                    ),
                });
            }
        };
        let page: SharedContext = match provisioned {
            Ok(page) => Arc::new(tokio::sync::Mutex::new(page)),
            Err(e @ E2eError::Provision { .. }) => return Err(e),
            Err(other) => {
                return Err(E2eError::Provision {
                    project: item.project.name.clone(),
                    reason: other.to_string(),
                })
            }
        };

        let expect = match item.project.expect_timeout() {
            Some(t) => self.config.expect.with_timeout(t),
            None => self.config.expect,
        };
        let base_url = item
            .project
            .base_url
            .clone()
            .or_else(|| self.config.base_url.clone());

        let attempt_token = self.run_token.child_token();
        let mut t = TestContext::new(
            Arc::clone(&item.project),
            info,
            Arc::clone(&page),
            attempt_token.clone(),
            expect,
            base_url,
        );
        let body = item.test.body();
        let mut handle = tokio::spawn(async move {
            let result = body.run(&mut t).await;
            (result, t.into_captures())
        });

        let end = tokio::select! {
            biased;
            joined = &mut handle => BodyEnd::Finished(joined),
            _ = self.run_token.cancelled() => BodyEnd::Interrupted,
            _ = tokio::time::sleep_until(attempt_deadline) => BodyEnd::TimedOut,
        };
        if !matches!(end, BodyEnd::Finished(_)) {
            attempt_token.cancel();
            handle.abort();
            let _ = handle.await;
        }

        let mut body_captures = Vec::new();
        let (status, error) = match end {
            BodyEnd::Finished(Ok((result, captures))) => {
                body_captures = captures;
                match result {
                    Ok(()) => (AttemptStatus::Passed, None),
                    Err(TestFailure::Skipped(reason)) => {
                        debug!("{} skipped at runtime: {}", id, reason);
                        (AttemptStatus::Skipped, None)
                    }
                    Err(TestFailure::Cancelled(_)) if self.run_token.is_cancelled() => {
                        self.interrupted()
                    }
                    Err(failure) => (AttemptStatus::Failed, failure.into_attempt_error()),
                }
            }
            BodyEnd::Finished(Err(e)) => (
                AttemptStatus::Failed,
                Some(AttemptError::new(ErrorKind::Panic, join_error_message(e))),
            ),
            BodyEnd::TimedOut => (
                AttemptStatus::TimedOut,
                Some(AttemptError::attempt_timeout(timeout)),
            ),
            BodyEnd::Interrupted => self.interrupted(),
        };

        // Engine failure: this attempt is abandoned, not sealed
        if self.run_token.is_cancelled() && !self.deadline_hit() {
            close_context(&page).await;
            return Ok(None);
        }

        let kinds = artifacts::kinds_to_capture(&self.config.artifacts, status, number);
        let dir = artifacts::attempt_dir(&self.config.output_dir, &id, number);
        body_captures.extend(artifacts::capture_all(&page, &kinds, &dir).await);
        close_context(&page).await;

        let mut attempt = Attempt::seal(number, status, started_at, started.elapsed(), error);
        attempt.artifacts = body_captures;
        Ok(self.finish(pending, attempt))
    }

    /// Status for an attempt the run token cut short
    fn interrupted(&self) -> (AttemptStatus, Option<AttemptError>) {
        if self.deadline_hit() {
            (AttemptStatus::TimedOut, Some(AttemptError::run_deadline()))
        } else {
            (
                AttemptStatus::Failed,
                Some(AttemptError::new(ErrorKind::Error, "run aborted")),
            )
        }
    }

    /// Record a sealed attempt and decide on a retry
    fn finish(&self, pending: &Pending, attempt: Attempt) -> Option<Pending> {
        let index = pending.item.index;
        let will_retry = {
            let mut records = self.records.lock();
            let history = records.record(index, attempt.clone());
            let retry = !self.run_token.is_cancelled() && self.policy.should_retry(&attempt, history);
            if !retry {
                records.settle(index);
            }
            retry
        };

        let id = pending.item.id();
        match attempt.status {
            AttemptStatus::Passed | AttemptStatus::Skipped => {
                debug!("{} attempt {}: {}", id, attempt.number, attempt.status)
            }
            _ => info!(
                "{} attempt {}: {} ({})",
                id,
                attempt.number,
                attempt.status,
                attempt.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")
            ),
        }
        self.emit(RunEvent::AttemptFinished {
            item: id,
            attempt,
            will_retry,
        });

        will_retry.then(|| Pending {
            item: pending.item.clone(),
            number: pending.number + 1,
        })
    }
}

async fn close_context(page: &SharedContext) {
    if let Err(e) = page.lock().await.close().await {
        warn!("Failed to close execution context: {}", e);
    }
}

fn join_error_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => {
            if let Some(s) = payload.downcast_ref::<&str>() {
                format!("panicked: {}", s)
            } else if let Some(s) = payload.downcast_ref::<String>() {
                format!("panicked: {}", s)
            } else {
                "panicked".to_string()
            }
        }
        Err(e) => e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use crate::matrix::ProjectMatrix;
    use crate::registry::{body_fn, TestCase, TestId};
    use crate::report::Outcome;
    use async_trait::async_trait;
    use gauntlet_common::{Browser, Project};

    struct NoProvider;

    #[async_trait]
    impl ContextProvider for NoProvider {
        async fn provision(
            &self,
            project: &Project,
            _attempt: &AttemptInfo,
        ) -> E2eResult<Box<dyn ExecutionContext>> {
            Err(E2eError::Provision {
                project: project.name.clone(),
                reason: "not used".into(),
            })
        }
    }

    /// One item, one retry allowed, its first attempt already failed with a
    /// retry decided but not yet enqueued
    async fn retry_pending() -> (Shared, Option<Pending>) {
        let items = items(1);
        let config = SchedulerConfig {
            max_retries: 1,
            ..SchedulerConfig::default()
        };
        let shared = Shared::new(
            config,
            Arc::new(NoProvider),
            None,
            &items,
            ReportSettings::default(),
        );
        let pending = shared.queue.claim().await.unwrap();
        let failed = Attempt::seal(
            1,
            AttemptStatus::Failed,
            Utc::now(),
            Duration::from_millis(5),
            Some(AttemptError::new(ErrorKind::Assertion, "expected 1 item")),
        );
        let retry = shared.finish(&pending, failed);
        assert_eq!(retry.as_ref().map(|r| r.number), Some(2));
        (shared, retry)
    }

    fn freeze(shared: &Shared) -> Report {
        std::mem::take(&mut *shared.records.lock()).finish(Duration::from_secs(1), None)
    }

    fn items(n: usize) -> Vec<WorkItem> {
        let tests: Vec<_> = (0..n)
            .map(|i| {
                Arc::new(TestCase::new(
                    TestId::new(["queue"], format!("t{}", i)),
                    body_fn(|_| Box::pin(async { Ok(()) })),
                ))
            })
            .collect();
        ProjectMatrix::new(vec![Project::new("chromium", Browser::Chromium)])
            .unwrap()
            .expand(&tests)
    }

    #[tokio::test]
    async fn test_queue_is_fifo_with_retries_at_back() {
        let queue = WorkQueue::new(&items(2));
        let first = queue.claim().await.unwrap();
        assert_eq!(first.item.index, 0);

        let retry = Pending {
            item: first.item.clone(),
            number: 2,
        };
        assert!(queue.complete(Some(retry)).is_none());

        let second = queue.claim().await.unwrap();
        assert_eq!((second.item.index, second.number), (1, 1));
        let third = queue.claim().await.unwrap();
        assert_eq!((third.item.index, third.number), (0, 2));
    }

    #[tokio::test]
    async fn test_queue_drains_when_nothing_in_flight() {
        let queue = WorkQueue::new(&items(1));
        let only = queue.claim().await.unwrap();
        queue.complete(None);
        assert!(queue.claim().await.is_none());

        let retry = Pending {
            item: only.item,
            number: 2,
        };
        assert!(queue.complete(Some(retry)).is_some());
    }

    #[tokio::test]
    async fn test_idle_worker_waits_for_retry() {
        let queue = Arc::new(WorkQueue::new(&items(1)));
        let first = queue.claim().await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.claim().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        queue.complete(Some(Pending {
            item: first.item,
            number: 2,
        }));
        let claimed = waiter.await.unwrap().unwrap();
        assert_eq!(claimed.number, 2);
    }

    #[tokio::test]
    async fn test_retry_rejected_after_deadline_seals_timed_out() {
        let (shared, retry) = retry_pending().await;
        shared.expire(Duration::from_secs(1));
        shared.release(retry);

        let report = freeze(&shared);
        let item = &report.items[0];
        assert_eq!(item.outcome, Outcome::TimedOut);
        assert_eq!(item.attempts.len(), 2);
        assert_eq!(item.attempts[1].status, AttemptStatus::TimedOut);
        assert!(item.attempts[1].hit_run_deadline());
        assert_eq!(item.attempts[1].duration_ms, 0);
    }

    #[tokio::test]
    async fn test_retry_rejected_after_engine_failure_is_not_run() {
        let (shared, retry) = retry_pending().await;
        shared.fail(&E2eError::WorkerCrashed("out of memory".into()));
        shared.release(retry);

        let report = freeze(&shared);
        assert!(report.items.is_empty());
        assert_eq!(report.summary.not_run, 1);
    }

    #[tokio::test]
    async fn test_close_drains_pending() {
        let queue = WorkQueue::new(&items(3));
        let _ = queue.claim().await;
        let drained = queue.close();
        assert_eq!(drained.len(), 2);
        assert!(queue.claim().await.is_none());
    }
}
