//! Coordinator - the control loop behind a job map
//!
//! The Coordinator owns the running/pending table and is the only place it
//! is mutated. Handles send submissions in, spawned jobs send completions
//! back, and every state transition happens inside `run`.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, Instrument};

use crate::coord::handle::JobMapHandle;
use crate::coord::inflight::InFlight;
use crate::coord::table::{Admission, JobTable};
use crate::coord::types::{
    Completion, Job, JobEvent, JobKey, JobOutcome, RunSummary, Submission,
};
use crate::core::config::CoordinatorConfig;
use crate::core::errors::Result;

/// Key-scoped job coalescing scheduler
///
/// For every key at most one job runs and at most one waits. A submission for
/// a key whose job is already waiting replaces that job.
///
/// ```rust,no_run
/// use jobmap::Coordinator;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn demo() {
/// let coordinator = Coordinator::<&'static str>::new();
/// let jobs = coordinator.handle();
/// let cancel = CancellationToken::new();
///
/// jobs.submit("thumbnail", |_cancel| async { /* render */ }).await;
/// cancel.cancel();
/// let summary = coordinator.run(cancel).await;
/// assert!(summary.is_balanced());
/// # }
/// ```
pub struct Coordinator<K: JobKey> {
    config: CoordinatorConfig,
    runtime: Option<Handle>,
    // Channels for submissions and completions
    intake_tx: mpsc::Sender<Submission<K>>,
    intake_rx: mpsc::Receiver<Submission<K>>,
    completion_tx: mpsc::Sender<Completion<K>>,
    completion_rx: mpsc::Receiver<Completion<K>>,
    // Lifecycle events; overflow drops the oldest so the loop never waits
    events_tx: async_broadcast::Sender<JobEvent<K>>,
    events_rx: async_broadcast::InactiveReceiver<JobEvent<K>>,
    next_job_id: Arc<AtomicU64>,
}

impl<K: JobKey> Coordinator<K> {
    /// Create an idle coordinator with the default configuration
    pub fn new() -> Self {
        Self::build(CoordinatorConfig::default())
    }

    /// Create an idle coordinator from a validated configuration
    pub fn with_config(config: CoordinatorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: CoordinatorConfig) -> Self {
        let (intake_tx, intake_rx) = mpsc::channel(config.intake_capacity);
        let (completion_tx, completion_rx) = mpsc::channel(config.completion_capacity);

        let (mut events_tx, events_rx) = async_broadcast::broadcast(config.event_capacity);
        events_tx.set_overflow(true);
        events_tx.set_await_active(false);

        Self {
            config,
            runtime: None,
            intake_tx,
            intake_rx,
            completion_tx,
            completion_rx,
            events_tx,
            events_rx: events_rx.deactivate(),
            next_job_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Spawn jobs on `runtime` instead of the runtime `run` is polled on
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Get a cloneable submission handle
    pub fn handle(&self) -> JobMapHandle<K> {
        JobMapHandle::new(
            self.intake_tx.clone(),
            self.events_rx.clone(),
            self.next_job_id.clone(),
            self.config.intake_capacity,
            self.config.overflow_policy,
        )
    }

    /// Run the control loop until `cancel` fires
    ///
    /// Once cancelled, intake is closed, jobs still waiting in a pending slot
    /// or in the intake queue are dropped without running, and the call
    /// returns after every dispatched job has finished. Dispatched jobs are
    /// never aborted; they receive `cancel` and may choose to stop early.
    pub async fn run(self, cancel: CancellationToken) -> RunSummary {
        let span = tracing::info_span!("coordinator", name = %self.config.name);
        self.run_loop(cancel).instrument(span).await
    }

    async fn run_loop(self, cancel: CancellationToken) -> RunSummary {
        let Coordinator {
            config,
            runtime,
            intake_tx,
            mut intake_rx,
            completion_tx,
            mut completion_rx,
            events_tx,
            events_rx: _,
            next_job_id: _,
        } = self;

        // Intake closes by itself once every handle is gone.
        drop(intake_tx);

        let mut state = LoopState {
            table: JobTable::new(),
            in_flight: InFlight::new(),
            runtime: runtime.unwrap_or_else(Handle::current),
            completion_tx,
            events_tx,
            cancel: cancel.clone(),
            summary: RunSummary::start(config.name.clone()),
        };

        info!(
            intake_capacity = config.intake_capacity,
            overflow_policy = ?config.overflow_policy,
            "Coordinator started"
        );

        let mut intake_open = true;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(
                        running = state.table.running_len(),
                        pending = state.table.pending_len(),
                        "Coordinator received cancel signal"
                    );
                    break;
                }

                Some(completion) = completion_rx.recv() => {
                    state.on_completion(completion);
                }

                maybe = intake_rx.recv(), if intake_open => match maybe {
                    Some(submission) => state.on_submission(submission),
                    None => {
                        debug!("All handles dropped; intake closed");
                        intake_open = false;
                    }
                },
            }
        }

        // Stop accepting work. Anything already queued is never started.
        intake_rx.close();
        while let Ok(Submission { key, job }) = intake_rx.try_recv() {
            state.summary.accepted += 1;
            state.emit(JobEvent::Accepted { key: key.clone(), job_id: job.id() });
            state.drop_at_shutdown(key, job);
        }
        for (key, job) in state.table.take_pending() {
            state.drop_at_shutdown(key, job);
        }

        // Wait for dispatched jobs, still recording their completions so the
        // summary and the event stream stay complete.
        let in_flight = state.in_flight.clone();
        if in_flight.len() > 0 {
            info!(in_flight = in_flight.len(), "Waiting for running jobs to finish");
        }
        {
            let idle = in_flight.wait_idle();
            tokio::pin!(idle);
            loop {
                tokio::select! {
                    biased;

                    Some(completion) = completion_rx.recv() => {
                        state.on_completion(completion);
                    }
                    _ = &mut idle => break,
                }
            }
        }
        // Jobs release their slot only after reporting, so stragglers sit
        // in the buffer.
        completion_rx.close();
        while let Ok(completion) = completion_rx.try_recv() {
            state.on_completion(completion);
        }

        let summary = state.summary.finish();
        info!(
            accepted = summary.accepted,
            dispatched = summary.dispatched,
            superseded = summary.superseded,
            completed = summary.completed,
            panicked = summary.panicked,
            dropped_at_shutdown = summary.dropped_at_shutdown,
            "Coordinator stopped"
        );
        summary
    }
}

impl<K: JobKey> Default for Coordinator<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything the control loop mutates while running
struct LoopState<K: JobKey> {
    table: JobTable<K>,
    in_flight: Arc<InFlight>,
    runtime: Handle,
    completion_tx: mpsc::Sender<Completion<K>>,
    events_tx: async_broadcast::Sender<JobEvent<K>>,
    cancel: CancellationToken,
    summary: RunSummary,
}

impl<K: JobKey> LoopState<K> {
    fn emit(&self, event: JobEvent<K>) {
        // No subscribers, or a full buffer that overwrote its oldest entry.
        let _ = self.events_tx.try_broadcast(event);
    }

    fn on_submission(&mut self, Submission { key, job }: Submission<K>) {
        let job_id = job.id();
        self.summary.accepted += 1;
        self.emit(JobEvent::Accepted { key: key.clone(), job_id });

        match self.table.admit(&key, job) {
            Admission::Dispatch(job) => self.dispatch(key, job),
            Admission::Queued { superseded } => {
                debug!(key = ?key, job_id = %job_id, "Key busy; job pending");
                if let Some(old) = superseded {
                    debug!(key = ?key, job_id = %old.id(), by = %job_id, "Pending job superseded");
                    self.summary.superseded += 1;
                    self.emit(JobEvent::Superseded { key: key.clone(), job_id: old.id(), by: job_id });
                }
                self.emit(JobEvent::Queued { key, job_id });
            }
        }
    }

    fn on_completion(&mut self, Completion { key, job_id, outcome }: Completion<K>) {
        debug!(key = ?key, job_id = %job_id, outcome = ?outcome, "Job completed");
        self.summary.completed += 1;
        if matches!(outcome, JobOutcome::Panicked { .. }) {
            self.summary.panicked += 1;
        }
        self.emit(JobEvent::Completed { key: key.clone(), job_id, outcome });

        if let Some(next) = self.table.complete(&key) {
            self.dispatch(key, next);
        }
    }

    fn drop_at_shutdown(&mut self, key: K, job: Job) {
        debug!(key = ?key, job_id = %job.id(), "Dropping job that never started");
        self.summary.dropped_at_shutdown += 1;
        self.emit(JobEvent::DroppedAtShutdown { key, job_id: job.id() });
    }

    /// Spawn `job` and record it as running for `key`
    fn dispatch(&mut self, key: K, job: Job) {
        if self.cancel.is_cancelled() {
            self.drop_at_shutdown(key, job);
            return;
        }

        let job_id = job.id();
        self.table.mark_running(key.clone(), job_id);
        self.summary.dispatched += 1;
        self.emit(JobEvent::Dispatched { key: key.clone(), job_id });
        debug!(key = ?key, job_id = %job_id, running = self.table.running_len(), "Dispatching job");

        let slot = self.in_flight.acquire();
        let completion_tx = self.completion_tx.clone();
        let span = tracing::debug_span!("job", key = ?key, job_id = %job_id);
        let cancel = self.cancel.clone();

        self.runtime.spawn(
            async move {
                // The closure itself is called in here, so a panic or
                // blocking work before its first await stays off the loop.
                let body = async move { job.into_future(cancel).await };
                let outcome = match AssertUnwindSafe(body).catch_unwind().await {
                    Ok(()) => JobOutcome::Finished,
                    Err(payload) => {
                        let message = panic_message(payload.as_ref());
                        error!(panic = %message, "Job panicked");
                        JobOutcome::Panicked { message }
                    }
                };

                // Fails only after the coordinator stopped listening, which
                // it does once the barrier is idle.
                if completion_tx
                    .send(Completion { key, job_id, outcome })
                    .await
                    .is_err()
                {
                    debug!("Completion reported after coordinator shutdown");
                }
                drop(slot);
            }
            .instrument(span),
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
