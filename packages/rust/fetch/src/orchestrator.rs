//! Bounded-concurrency execution of one unit's class jobs.

use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{info, instrument, warn};

use lectern_shared::{ClassOutcome, FailureRecord};

use crate::job::{ClassFetchJob, ClassTarget};

/// Observer for class completions. Called from the collector, one call per
/// class, in completion order.
pub trait FetchProgress: Send + Sync {
    fn class_finished(&self, outcome: &ClassOutcome, finished: usize, total: usize);
}

/// Discards progress.
pub struct NoProgress;

impl FetchProgress for NoProgress {
    fn class_finished(&self, _outcome: &ClassOutcome, _finished: usize, _total: usize) {}
}

/// Runs every class of a unit under a fixed worker limit and joins on all of them.
#[derive(Debug, Clone)]
pub struct FetchOrchestrator {
    job: Arc<ClassFetchJob>,
    concurrency: usize,
}

impl FetchOrchestrator {
    pub fn new(job: ClassFetchJob, concurrency: usize) -> Self {
        Self {
            job: Arc::new(job),
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Fetch all `targets` and return one outcome per target, ordered by
    /// class ordinal. A failed or aborted job never cancels its siblings.
    #[instrument(skip_all, fields(classes = targets.len(), concurrency = self.concurrency))]
    pub async fn run_unit(
        &self,
        targets: Vec<ClassTarget>,
        progress: &dyn FetchProgress,
    ) -> Vec<ClassOutcome> {
        let total = targets.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel::<ClassOutcome>();
        let mut tasks = JoinSet::new();

        for target in targets.iter().cloned() {
            let job = Arc::clone(&self.job);
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                let outcome = job.run(&target).await;
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        // Single collector: the channel closes once every task has finished.
        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            progress.class_finished(&outcome, outcomes.len() + 1, total);
            outcomes.push(outcome);
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "class task aborted");
            }
        }

        // A task that panicked never reported; account for it as a failure.
        for target in &targets {
            if !outcomes.iter().any(|o| o.ordinal == target.ordinal) {
                let failure = FailureRecord {
                    scope: target.scope(),
                    class_id: Some(target.class.id.clone()),
                    url: None,
                    reason: "class task did not complete".into(),
                };
                let outcome = ClassOutcome::new(target.ordinal, &target.class, Vec::new(), vec![failure]);
                progress.class_finished(&outcome, outcomes.len() + 1, total);
                outcomes.push(outcome);
            }
        }

        outcomes.sort_by_key(|o| o.ordinal);

        let succeeded = outcomes.iter().filter(|o| o.is_success()).count();
        info!(succeeded, failed = total - succeeded, "unit fetch complete");
        outcomes
    }
}
