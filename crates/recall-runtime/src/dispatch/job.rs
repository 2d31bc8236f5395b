//! One rule's trip through the worker pool.
//!
//! Job lifecycle:
//!
//! ```text
//! Pending ──submit──▶ InFlight ──wait──▶ Done
//!    ▲                   │
//!    └──── resubmit ◀── TimedOut
//! ```
//!
//! A [`Job`] value is always in flight: it owns exactly one live handle.
//! [`Job::wait`] reports how the attempt ended; on a timeout the caller
//! turns the job back into a fresh attempt with [`Job::resubmit`], which
//! aborts the stale handle first. A job dropped while in flight (the run
//! stopped early or failed) aborts its handle, so no result from an
//! abandoned or superseded attempt is ever observed.

use recall_core::{Query, Rule};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;

use super::pool::{CallResult, WorkerPool};
use crate::providers::{CompletionResponse, ProviderError};

/// How an attempt ended.
#[derive(Debug)]
pub enum JobEvent {
    /// The model answered
    Completed(CompletionResponse),
    /// No answer within the deadline, or a transient provider error
    TimedOut,
    /// The provider failed in a way a retry will not fix
    Failed(ProviderError),
    /// The worker task panicked
    Panicked(JoinError),
}

/// Pause before retrying after a transient provider error.
///
/// The provider's `retry_after` hint when it is set and shorter than
/// `timeout`, otherwise the full `timeout`.
pub fn retry_delay(err: &ProviderError, timeout: Duration) -> Duration {
    match err.retry_after() {
        Some(hint) if !hint.is_zero() => hint.min(timeout),
        _ => timeout,
    }
}

/// Join handle that aborts its task when dropped.
#[derive(Debug)]
struct CallHandle(JoinHandle<CallResult>);

impl Drop for CallHandle {
    fn drop(&mut self) {
        // No-op on a finished task.
        self.0.abort();
    }
}

/// A rule with a live model call.
#[derive(Debug)]
pub struct Job {
    rule: Rule,
    attempt: u32,
    handle: CallHandle,
}

impl Job {
    /// Submit the first attempt for `rule`.
    pub fn submit(rule: Rule, query: Query, pool: &WorkerPool) -> Self {
        Self {
            rule,
            attempt: 1,
            handle: CallHandle(pool.submit(query)),
        }
    }

    /// The rule this job checks.
    pub fn rule(&self) -> &Rule {
        &self.rule
    }

    /// 1-based attempt number of the live call.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Wait up to `timeout` for the live call.
    ///
    /// On [`JobEvent::TimedOut`] the handle is left running; the caller must
    /// either [`resubmit`](Self::resubmit) or drop the job. A transient
    /// provider error is reported as a timeout once its [`retry_delay`] has
    /// passed, never later than the deadline.
    pub async fn wait(&mut self, timeout: Duration) -> JobEvent {
        let deadline = Instant::now() + timeout;
        match tokio::time::timeout_at(deadline, &mut self.handle.0).await {
            Err(_) => JobEvent::TimedOut,
            Ok(Ok(Ok(response))) => JobEvent::Completed(response),
            Ok(Ok(Err(err))) if err.is_transient() => {
                let resume = (Instant::now() + retry_delay(&err, timeout)).min(deadline);
                tracing::debug!(
                    rule = %self.rule,
                    error = %err,
                    pause = ?resume.saturating_duration_since(Instant::now()),
                    "Transient provider error"
                );
                tokio::time::sleep_until(resume).await;
                JobEvent::TimedOut
            }
            Ok(Ok(Err(err))) => JobEvent::Failed(err),
            Ok(Err(join_err)) => JobEvent::Panicked(join_err),
        }
    }

    /// Abort the stale call and start a new attempt for the same rule.
    pub fn resubmit(self, query: Query, pool: &WorkerPool) -> Self {
        let Job {
            rule,
            attempt,
            handle,
        } = self;
        drop(handle);

        Self {
            rule,
            attempt: attempt + 1,
            handle: CallHandle(pool.submit(query)),
        }
    }

    /// Give up on the job and hand back its rule.
    pub fn into_rule(self) -> Rule {
        self.rule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ScriptedModel, ScriptedStep};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_completed_within_deadline() {
        let model = Arc::new(ScriptedModel::new().respond("a", "1"));
        let pool = WorkerPool::new(model, 1);

        let mut job = Job::submit(Rule::new("a", "1"), Query::user("a"), &pool);
        match job.wait(Duration::from_secs(30)).await {
            JobEvent::Completed(response) => assert_eq!(response.content, "1"),
            other => panic!("Expected completion, got {:?}", other),
        }
        assert_eq!(job.attempt(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_resubmit() {
        let model = Arc::new(ScriptedModel::new().script(
            "a",
            vec![
                ScriptedStep::text("stale").after(Duration::from_secs(60)),
                ScriptedStep::text("1"),
            ],
        ));
        let pool = WorkerPool::new(model.clone(), 1);

        let mut job = Job::submit(Rule::new("a", "1"), Query::user("a"), &pool);
        assert!(matches!(job.wait(Duration::from_secs(30)).await, JobEvent::TimedOut));

        let mut job = job.resubmit(Query::user("a"), &pool);
        assert_eq!(job.attempt(), 2);
        assert_eq!(job.rule(), &Rule::new("a", "1"));

        match job.wait(Duration::from_secs(30)).await {
            JobEvent::Completed(response) => assert_eq!(response.content, "1"),
            other => panic!("Expected completion, got {:?}", other),
        }
        assert_eq!(model.calls("a"), 2);
        assert_eq!(model.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_error_reported_as_timeout() {
        let model = Arc::new(
            ScriptedModel::new().script("a", vec![ScriptedStep::rate_limited()]),
        );
        let pool = WorkerPool::new(model, 1);

        let start = Instant::now();
        let mut job = Job::submit(Rule::new("a", "1"), Query::user("a"), &pool);
        assert!(matches!(job.wait(Duration::from_secs(30)).await, JobEvent::TimedOut));
        // Same wall time as a missed deadline.
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_shortens_pause() {
        let model = Arc::new(ScriptedModel::new().script(
            "a",
            vec![ScriptedStep::rate_limited_for(Duration::from_secs(5))],
        ));
        let pool = WorkerPool::new(model, 1);

        let start = Instant::now();
        let mut job = Job::submit(Rule::new("a", "1"), Query::user("a"), &pool);
        assert!(matches!(job.wait(Duration::from_secs(30)).await, JobEvent::TimedOut));
        assert_eq!(start.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_delay_bounds() {
        let timeout = Duration::from_secs(30);
        let limited = |hint| ProviderError::RateLimited { retry_after: hint };

        assert_eq!(retry_delay(&limited(None), timeout), timeout);
        assert_eq!(retry_delay(&limited(Some(Duration::ZERO)), timeout), timeout);
        assert_eq!(
            retry_delay(&limited(Some(Duration::from_secs(2))), timeout),
            Duration::from_secs(2)
        );
        assert_eq!(retry_delay(&limited(Some(Duration::from_secs(90))), timeout), timeout);
        assert_eq!(
            retry_delay(&ProviderError::Timeout(Duration::from_secs(60)), timeout),
            timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_reported() {
        let model = Arc::new(ScriptedModel::new().script("a", vec![ScriptedStep::auth_error()]));
        let pool = WorkerPool::new(model, 1);

        let mut job = Job::submit(Rule::new("a", "1"), Query::user("a"), &pool);
        assert!(matches!(
            job.wait(Duration::from_secs(30)).await,
            JobEvent::Failed(ProviderError::AuthError)
        ));
        assert_eq!(job.into_rule(), Rule::new("a", "1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_aborts_call() {
        let model = Arc::new(ScriptedModel::new().script(
            "a",
            vec![ScriptedStep::text("1").after(Duration::from_secs(60))],
        ));
        let pool = WorkerPool::new(model.clone(), 1);

        let job = Job::submit(Rule::new("a", "1"), Query::user("a"), &pool);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(model.in_flight(), 1);

        drop(job);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(model.in_flight(), 0);
    }
}
