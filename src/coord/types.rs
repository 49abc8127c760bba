//! Core types shared by the coordinator, its handle and spawned jobs

use std::fmt;
use std::future::Future;
use std::hash::Hash;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

/// Anything usable as a job key
///
/// Keys are compared by equality and hashed, never ordered. `Debug` is only
/// used for log fields and events.
pub trait JobKey: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

impl<T> JobKey for T where T: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static {}

/// Identifier handed out for every submission a handle builds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

type JobBody = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// A submitted unit of work, run at most once
pub struct Job {
    id: JobId,
    body: JobBody,
}

impl Job {
    pub(crate) fn new<F, Fut>(id: JobId, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            id,
            body: Box::new(move |cancel| Box::pin(f(cancel))),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Consume the job, producing the future that executes it
    pub(crate) fn into_future(self, cancel: CancellationToken) -> BoxFuture<'static, ()> {
        (self.body)(cancel)
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A (key, job) pair travelling from a handle to the control loop
#[derive(Debug)]
pub(crate) struct Submission<K> {
    pub key: K,
    pub job: Job,
}

/// How a dispatched job ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobOutcome {
    Finished,
    Panicked { message: String },
}

/// Report sent by a job's wrapper task once its body has returned
#[derive(Debug)]
pub(crate) struct Completion<K> {
    pub key: K,
    pub job_id: JobId,
    pub outcome: JobOutcome,
}

/// Lifecycle events broadcast to subscribers
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobEvent<K> {
    /// The control loop received the submission
    Accepted { key: K, job_id: JobId },
    /// The job was spawned
    Dispatched { key: K, job_id: JobId },
    /// The job sits in the pending slot behind the running job
    Queued { key: K, job_id: JobId },
    /// A pending job was replaced by a newer submission and will never run
    Superseded { key: K, job_id: JobId, by: JobId },
    /// The job's completion was observed by the control loop
    Completed { key: K, job_id: JobId, outcome: JobOutcome },
    /// The job was still waiting when the coordinator shut down
    DroppedAtShutdown { key: K, job_id: JobId },
}

impl<K> JobEvent<K> {
    pub fn key(&self) -> &K {
        match self {
            Self::Accepted { key, .. }
            | Self::Dispatched { key, .. }
            | Self::Queued { key, .. }
            | Self::Superseded { key, .. }
            | Self::Completed { key, .. }
            | Self::DroppedAtShutdown { key, .. } => key,
        }
    }

    pub fn job_id(&self) -> JobId {
        match self {
            Self::Accepted { job_id, .. }
            | Self::Dispatched { job_id, .. }
            | Self::Queued { job_id, .. }
            | Self::Superseded { job_id, .. }
            | Self::Completed { job_id, .. }
            | Self::DroppedAtShutdown { job_id, .. } => *job_id,
        }
    }
}

/// Counters collected by one `Coordinator::run`
#[derive(Clone, Debug, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub accepted: u64,
    pub dispatched: u64,
    pub superseded: u64,
    pub completed: u64,
    /// Completed jobs whose body panicked; included in `completed`
    pub panicked: u64,
    pub dropped_at_shutdown: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    pub(crate) fn start(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            accepted: 0,
            dispatched: 0,
            superseded: 0,
            completed: 0,
            panicked: 0,
            dropped_at_shutdown: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub(crate) fn finish(mut self) -> Self {
        self.finished_at = Some(Utc::now());
        self
    }

    /// Every accepted job either ran, was superseded, or was dropped
    pub fn is_balanced(&self) -> bool {
        self.accepted == self.dispatched + self.superseded + self.dropped_at_shutdown
            && self.dispatched == self.completed
    }
}
