//! Bounded-parallelism dispatch of recall jobs.
//!
//! The [`Dispatcher`] submits one job per rule, validates every answer on a
//! single coordinating task and stops early once the failure budget is
//! spent. Two modes:
//!
//! - **Sequential** (`concurrency == 0`): rules run one after another with an
//!   optional pause between jobs and no deadline. A transient provider
//!   error is retried after [`retry_delay`].
//! - **Concurrent** (`concurrency > 0`): a FIFO window of at most
//!   `concurrency` in-flight jobs. The head is awaited with `job_timeout`; a
//!   job that misses it is aborted and resubmitted at the tail. Each
//!   completion admits the next unseen rule.

use chrono::{DateTime, Utc};
use recall_core::{Query, Rule, Validator};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinError;

pub mod job;
pub mod pool;

pub use job::{retry_delay, Job, JobEvent};
pub use pool::{CallResult, WorkerPool};

use crate::config::DEFAULT_JOB_TIMEOUT;
use crate::providers::{CompletionResponse, Model, ProviderError};
use crate::resilience::{FailureBudget, LlmUsage};

/// Errors that end a run before it finishes.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Model call for '{rule}' failed: {source}")]
    Model {
        rule: Rule,
        #[source]
        source: ProviderError,
    },

    #[error("Worker task failed: {0}")]
    Join(#[from] JoinError),

    #[error("Invalid dispatch configuration: {0}")]
    Config(String),
}

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Parallel model calls; 0 runs sequentially
    pub concurrency: usize,

    /// Deadline for the head job in concurrent mode
    pub job_timeout: Duration,

    /// Pause after each job in sequential mode
    pub inter_job_delay: Duration,

    /// The run stops once failures exceed this
    pub max_failures: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            inter_job_delay: Duration::ZERO,
            max_failures: 100_000,
        }
    }
}

impl DispatchConfig {
    /// Sequential settings with the given failure cap.
    pub fn sequential(max_failures: usize) -> Self {
        Self {
            concurrency: 0,
            max_failures,
            ..Default::default()
        }
    }

    /// Concurrent settings with `concurrency` workers.
    pub fn concurrent(concurrency: usize) -> Self {
        Self {
            concurrency,
            ..Default::default()
        }
    }
}

/// Outcome of one dispatcher run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Rules the model got wrong, in the order failures were observed
    pub failed_rules: Vec<Rule>,

    /// Rules handed to the run
    pub total: usize,

    /// Jobs that produced an answer
    pub completed: usize,

    /// Answers that failed validation
    pub failed: usize,

    /// Deadline misses and transient errors, each followed by a resubmit
    pub timeouts: usize,

    /// Whether the failure cap ended the run
    pub stopped_early: bool,

    /// Token usage of observed completions
    pub usage: LlmUsage,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    /// No rule failed.
    pub fn is_clean(&self) -> bool {
        self.failed_rules.is_empty()
    }

    /// Fraction of completed jobs that passed; 1.0 for an empty run.
    pub fn pass_rate(&self) -> f64 {
        if self.completed == 0 {
            return 1.0;
        }
        (self.completed - self.failed) as f64 / self.completed as f64
    }
}

/// Counters for one run, owned by the coordinating task.
struct RunState<'v> {
    validator: &'v Validator,
    budget: FailureBudget,
    failed_rules: Vec<Rule>,
    completed: usize,
    timeouts: usize,
    usage: LlmUsage,
}

impl<'v> RunState<'v> {
    fn new(validator: &'v Validator, max_failures: usize) -> Self {
        Self {
            validator,
            budget: FailureBudget::new(max_failures),
            failed_rules: Vec::new(),
            completed: 0,
            timeouts: 0,
            usage: LlmUsage::default(),
        }
    }

    /// Validate an answer. Returns true once the failure cap is exceeded.
    fn record(&mut self, rule: &Rule, response: &CompletionResponse) -> bool {
        self.usage.add(&response.usage, &response.model);

        let outcome = self.validator.validate(rule, &response.content);
        if outcome.passed {
            tracing::debug!(rule = %rule, "Rule passed");
            return false;
        }

        self.failed_rules.push(rule.clone());
        let exhausted = self.budget.record_failure();
        tracing::warn!(
            rule = %rule,
            output = %outcome.normalized,
            remaining = self.budget.remaining(),
            "Model answer does not match the true rule"
        );
        exhausted
    }

    fn into_report(self, total: usize, started_at: DateTime<Utc>) -> RunReport {
        RunReport {
            total,
            completed: self.completed,
            failed: self.budget.failures(),
            timeouts: self.timeouts,
            stopped_early: self.budget.is_exhausted(),
            failed_rules: self.failed_rules,
            usage: self.usage,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

/// Runs recall jobs against a [`Model`].
pub struct Dispatcher {
    model: Arc<dyn Model>,
    validator: Validator,
    config: DispatchConfig,
}

impl Dispatcher {
    /// Dispatcher over `model`.
    pub fn new(model: Arc<dyn Model>, validator: Validator, config: DispatchConfig) -> Self {
        Self {
            model,
            validator,
            config,
        }
    }

    /// Run one job per rule and report the rules the model got wrong.
    ///
    /// `prompt` builds the query for a rule; it is called again for every
    /// resubmission.
    pub async fn run<F>(&self, rules: &[Rule], prompt: F) -> Result<RunReport, DispatchError>
    where
        F: Fn(&Rule) -> Query,
    {
        if self.config.concurrency > 0 && self.config.job_timeout.is_zero() {
            return Err(DispatchError::Config(
                "job_timeout must be positive".to_string(),
            ));
        }

        let started_at = Utc::now();
        let mut state = RunState::new(&self.validator, self.config.max_failures);

        if self.config.concurrency == 0 {
            self.run_sequential(rules, &prompt, &mut state).await?;
        } else {
            self.run_concurrent(rules, &prompt, &mut state).await?;
        }

        let report = state.into_report(rules.len(), started_at);
        tracing::info!(
            total = report.completed,
            fail = report.failed,
            timeouts = report.timeouts,
            stopped_early = report.stopped_early,
            "Run finished"
        );
        Ok(report)
    }

    async fn run_sequential<F>(
        &self,
        rules: &[Rule],
        prompt: &F,
        state: &mut RunState<'_>,
    ) -> Result<(), DispatchError>
    where
        F: Fn(&Rule) -> Query,
    {
        for rule in rules {
            state.completed += 1;

            let response = loop {
                match self.model.generate(prompt(rule)).await {
                    Ok(response) => break response,
                    Err(err) if err.is_transient() => {
                        let pause = retry_delay(&err, self.config.job_timeout);
                        tracing::warn!(
                            rule = %rule,
                            error = %err,
                            pause = ?pause,
                            "Transient error, retrying"
                        );
                        state.timeouts += 1;
                        tokio::time::sleep(pause).await;
                    }
                    Err(source) => {
                        return Err(DispatchError::Model {
                            rule: rule.clone(),
                            source,
                        })
                    }
                }
            };

            if state.record(rule, &response) {
                tracing::warn!(
                    failed = state.budget.failures(),
                    max_failures = state.budget.max_failures(),
                    "Failure cap exceeded, stopping"
                );
                return Ok(());
            }

            if !self.config.inter_job_delay.is_zero() {
                tokio::time::sleep(self.config.inter_job_delay).await;
            }
        }
        Ok(())
    }

    async fn run_concurrent<F>(
        &self,
        rules: &[Rule],
        prompt: &F,
        state: &mut RunState<'_>,
    ) -> Result<(), DispatchError>
    where
        F: Fn(&Rule) -> Query,
    {
        let pool = WorkerPool::new(Arc::clone(&self.model), self.config.concurrency);
        let timeout = self.config.job_timeout;
        tracing::debug!(workers = pool.workers(), timeout = ?timeout, "Starting concurrent run");

        let mut pending = rules.iter();
        let mut window: VecDeque<Job> = pending
            .by_ref()
            .take(self.config.concurrency)
            .map(|rule| Job::submit(rule.clone(), prompt(rule), &pool))
            .collect();

        while let Some(mut job) = window.pop_front() {
            match job.wait(timeout).await {
                JobEvent::TimedOut => {
                    tracing::warn!(
                        rule = %job.rule(),
                        attempt = job.attempt(),
                        timeout = ?timeout,
                        "Job timed out, resubmitting"
                    );
                    state.timeouts += 1;
                    let query = prompt(job.rule());
                    window.push_back(job.resubmit(query, &pool));
                }
                JobEvent::Completed(response) => {
                    state.completed += 1;
                    if state.record(job.rule(), &response) {
                        tracing::warn!(
                            failed = state.budget.failures(),
                            max_failures = state.budget.max_failures(),
                            abandoned = window.len(),
                            "Failure cap exceeded, stopping"
                        );
                        // Dropping the window aborts every remaining call.
                        return Ok(());
                    }

                    if let Some(rule) = pending.next() {
                        window.push_back(Job::submit(rule.clone(), prompt(rule), &pool));
                    }
                }
                JobEvent::Failed(source) => {
                    return Err(DispatchError::Model {
                        rule: job.into_rule(),
                        source,
                    });
                }
                JobEvent::Panicked(err) => return Err(DispatchError::Join(err)),
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("validator", &self.validator)
            .field("config", &self.config)
            .finish()
    }
}
