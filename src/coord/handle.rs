//! Submission side of a coordinator

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::coord::types::{Job, JobEvent, JobId, JobKey, Submission};
use crate::core::config::OverflowPolicy;
use crate::core::errors::SubmitError;

/// Cloneable handle for submitting jobs to a running (or not yet running)
/// coordinator. Safe to use from any number of tasks.
pub struct JobMapHandle<K: JobKey> {
    intake_tx: mpsc::Sender<Submission<K>>,
    events_rx: async_broadcast::InactiveReceiver<JobEvent<K>>,
    next_job_id: Arc<AtomicU64>,
    capacity: usize,
    overflow_policy: OverflowPolicy,
}

impl<K: JobKey> Clone for JobMapHandle<K> {
    fn clone(&self) -> Self {
        Self {
            intake_tx: self.intake_tx.clone(),
            events_rx: self.events_rx.clone(),
            next_job_id: self.next_job_id.clone(),
            capacity: self.capacity,
            overflow_policy: self.overflow_policy,
        }
    }
}

impl<K: JobKey> JobMapHandle<K> {
    pub(crate) fn new(
        intake_tx: mpsc::Sender<Submission<K>>,
        events_rx: async_broadcast::InactiveReceiver<JobEvent<K>>,
        next_job_id: Arc<AtomicU64>,
        capacity: usize,
        overflow_policy: OverflowPolicy,
    ) -> Self {
        Self {
            intake_tx,
            events_rx,
            next_job_id,
            capacity,
            overflow_policy,
        }
    }

    fn prepare<F, Fut>(&self, key: K, job: F) -> Submission<K>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = JobId(self.next_job_id.fetch_add(1, Ordering::Relaxed));
        Submission {
            key,
            job: Job::new(id, job),
        }
    }

    /// Queue `job` to run under `key`
    ///
    /// Fire and forget. Returns the id given to the job, or `None` when the
    /// submission was discarded: the coordinator has shut down, or the queue
    /// was full under `OverflowPolicy::Drop`. With `OverflowPolicy::Block`
    /// a full queue makes this wait for room.
    pub async fn submit<F, Fut>(&self, key: K, job: F) -> Option<JobId>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let submission = self.prepare(key, job);
        let job_id = submission.job.id();

        match self.overflow_policy {
            OverflowPolicy::Block => match self.intake_tx.send(submission).await {
                Ok(()) => Some(job_id),
                Err(mpsc::error::SendError(rejected)) => {
                    debug!(key = ?rejected.key, job_id = %job_id, "Coordinator shut down; submission dropped");
                    None
                }
            },
            OverflowPolicy::Drop => match self.intake_tx.try_send(submission) {
                Ok(()) => Some(job_id),
                Err(TrySendError::Full(rejected)) => {
                    warn!(
                        key = ?rejected.key,
                        job_id = %job_id,
                        capacity = self.capacity,
                        "Intake queue full; submission dropped"
                    );
                    None
                }
                Err(TrySendError::Closed(rejected)) => {
                    debug!(key = ?rejected.key, job_id = %job_id, "Coordinator shut down; submission dropped");
                    None
                }
            },
        }
    }

    /// Queue `job` without waiting, reporting why it was refused
    pub fn try_submit<F, Fut>(&self, key: K, job: F) -> Result<JobId, SubmitError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let submission = self.prepare(key, job);
        let job_id = submission.job.id();

        self.intake_tx.try_send(submission).map_err(|e| match e {
            TrySendError::Full(_) => SubmitError::Full {
                capacity: self.capacity,
            },
            TrySendError::Closed(_) => SubmitError::Closed,
        })?;
        Ok(job_id)
    }

    /// Whether the coordinator has stopped accepting submissions
    pub fn is_closed(&self) -> bool {
        self.intake_tx.is_closed()
    }

    /// Receive lifecycle events from now on. The stream ends when the
    /// coordinator finishes; a slow receiver loses the oldest events.
    pub fn subscribe(&self) -> async_broadcast::Receiver<JobEvent<K>> {
        self.events_rx.activate_cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::coordinator::Coordinator;
    use crate::core::config::CoordinatorConfig;
    use pretty_assertions::assert_eq;

    fn small(policy: OverflowPolicy) -> Coordinator<&'static str> {
        let config = CoordinatorConfig::builder()
            .intake_capacity(2)
            .overflow_policy(policy)
            .build()
            .unwrap();
        Coordinator::with_config(config).unwrap()
    }

    #[tokio::test]
    async fn test_ids_are_unique_across_clones() {
        let coordinator = Coordinator::<&'static str>::new();
        let a = coordinator.handle();
        let b = a.clone();

        let first = a.submit("berry", |_| async {}).await.unwrap();
        let second = b.submit("berry", |_| async {}).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_try_submit_reports_full() {
        let coordinator = small(OverflowPolicy::Block);
        let jobs = coordinator.handle();

        assert!(jobs.try_submit("a", |_| async {}).is_ok());
        assert!(jobs.try_submit("b", |_| async {}).is_ok());
        assert_eq!(
            jobs.try_submit("c", |_| async {}),
            Err(SubmitError::Full { capacity: 2 })
        );
    }

    #[tokio::test]
    async fn test_drop_policy_discards_on_full() {
        let coordinator = small(OverflowPolicy::Drop);
        let jobs = coordinator.handle();

        assert!(jobs.submit("a", |_| async {}).await.is_some());
        assert!(jobs.submit("b", |_| async {}).await.is_some());
        assert_eq!(jobs.submit("c", |_| async {}).await, None);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_silent() {
        let coordinator = Coordinator::<&'static str>::new();
        let jobs = coordinator.handle();
        assert!(!jobs.is_closed());

        let cancel = CancellationToken::new();
        cancel.cancel();
        coordinator.run(cancel).await;

        assert!(jobs.is_closed());
        assert_eq!(jobs.submit("late", |_| async {}).await, None);
        assert_eq!(jobs.try_submit("late", |_| async {}), Err(SubmitError::Closed));
    }
}
