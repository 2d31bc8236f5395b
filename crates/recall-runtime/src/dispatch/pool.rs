//! Fixed-size execution pool for model calls.

use recall_core::Query;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::providers::{CompletionResponse, Model, ProviderError};

/// Result of one model call.
pub type CallResult = Result<CompletionResponse, ProviderError>;

/// Runs model calls on tokio tasks, at most `workers` at a time.
///
/// Submission never blocks: a call that finds every permit taken waits on
/// its own task. Aborting a handle drops the call and releases its permit.
pub struct WorkerPool {
    model: Arc<dyn Model>,
    permits: Arc<Semaphore>,
    workers: usize,
}

impl WorkerPool {
    /// Pool of `workers` slots over `model`.
    pub fn new(model: Arc<dyn Model>, workers: usize) -> Self {
        Self {
            model,
            permits: Arc::new(Semaphore::new(workers.max(1))),
            workers: workers.max(1),
        }
    }

    /// Number of calls that may run at once.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start a call for `query`.
    pub fn submit(&self, query: Query) -> JoinHandle<CallResult> {
        let model = Arc::clone(&self.model);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let _permit = permits
                .acquire_owned()
                .await
                .map_err(|_| ProviderError::NotConfigured("worker pool closed".to_string()))?;
            model.generate(query).await
        })
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("available", &self.permits.available_permits())
            .finish()
    }
}
