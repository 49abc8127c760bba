//! Running and pending bookkeeping owned by the control loop

use std::collections::HashMap;

use tracing::warn;

use crate::coord::types::{Job, JobId, JobKey};

/// What the control loop should do with a freshly received job
#[derive(Debug)]
pub(crate) enum Admission {
    /// The key is idle; spawn the job now
    Dispatch(Job),
    /// The key is busy; the job now waits in the pending slot, replacing
    /// whatever was there
    Queued { superseded: Option<Job> },
}

/// A key appears in `pending` only while it also appears in `running`.
#[derive(Debug)]
pub(crate) struct JobTable<K> {
    running: HashMap<K, JobId>,
    pending: HashMap<K, Job>,
}

impl<K: JobKey> JobTable<K> {
    pub fn new() -> Self {
        Self {
            running: HashMap::new(),
            pending: HashMap::new(),
        }
    }

    pub fn admit(&mut self, key: &K, job: Job) -> Admission {
        if self.running.contains_key(key) {
            let superseded = self.pending.insert(key.clone(), job);
            Admission::Queued { superseded }
        } else {
            Admission::Dispatch(job)
        }
    }

    pub fn mark_running(&mut self, key: K, job_id: JobId) {
        let previous = self.running.insert(key, job_id);
        debug_assert!(previous.is_none(), "two jobs running for one key");
    }

    /// Record that the running job for `key` finished, handing back its
    /// pending successor if one is waiting.
    pub fn complete(&mut self, key: &K) -> Option<Job> {
        if self.running.remove(key).is_none() {
            warn!(key = ?key, "completion for a key that is not running");
            return None;
        }
        self.pending.remove(key)
    }

    /// Remove every pending job; used at shutdown
    pub fn take_pending(&mut self) -> Vec<(K, Job)> {
        self.pending.drain().collect()
    }

    #[cfg(test)]
    pub fn running_job(&self, key: &K) -> Option<JobId> {
        self.running.get(key).copied()
    }

    #[cfg(test)]
    pub fn pending_job(&self, key: &K) -> Option<JobId> {
        self.pending.get(key).map(Job::id)
    }

    pub fn running_len(&self) -> usize {
        self.running.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    #[cfg(test)]
    pub fn is_idle(&self, key: &K) -> bool {
        !self.running.contains_key(key) && !self.pending.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job(id: u64) -> Job {
        Job::new(JobId(id), |_cancel| async {})
    }

    fn dispatch(table: &mut JobTable<&'static str>, key: &'static str, id: u64) {
        match table.admit(&key, job(id)) {
            Admission::Dispatch(job) => table.mark_running(key, job.id()),
            other => panic!("expected dispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_idle_key_dispatches() {
        let mut table = JobTable::new();
        dispatch(&mut table, "berry", 1);
        assert_eq!(table.running_job(&"berry"), Some(JobId(1)));
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_busy_key_keeps_only_latest() {
        let mut table = JobTable::new();
        dispatch(&mut table, "berry", 1);

        let mut superseded = Vec::new();
        for id in 2..=5 {
            match table.admit(&"berry", job(id)) {
                Admission::Queued { superseded: old } => superseded.extend(old.map(|j| j.id())),
                other => panic!("expected queued, got {:?}", other),
            }
        }

        assert_eq!(superseded, vec![JobId(2), JobId(3), JobId(4)]);
        assert_eq!(table.pending_job(&"berry"), Some(JobId(5)));
        assert_eq!(table.pending_len(), 1);
    }

    #[test]
    fn test_completion_hands_over_successor() {
        let mut table = JobTable::new();
        dispatch(&mut table, "berry", 1);
        let _ = table.admit(&"berry", job(2));

        let next = table.complete(&"berry").expect("pending successor");
        assert_eq!(next.id(), JobId(2));
        assert_eq!(table.running_len(), 0);
        assert_eq!(table.pending_len(), 0);
    }

    #[test]
    fn test_completed_key_is_idle_again() {
        let mut table = JobTable::new();
        dispatch(&mut table, "cheese", 1);
        assert!(!table.is_idle(&"cheese"));

        assert!(table.complete(&"cheese").is_none());
        assert!(table.is_idle(&"cheese"));

        // Behaves exactly like a key never seen before
        dispatch(&mut table, "cheese", 2);
        assert_eq!(table.running_job(&"cheese"), Some(JobId(2)));
    }

    #[test]
    fn test_keys_are_independent() {
        let mut table = JobTable::new();
        dispatch(&mut table, "berry", 1);
        dispatch(&mut table, "cheese", 2);
        let _ = table.admit(&"berry", job(3));

        assert!(table.complete(&"cheese").is_none());
        assert_eq!(table.pending_job(&"berry"), Some(JobId(3)));
        assert_eq!(table.running_len(), 1);
    }

    #[test]
    fn test_take_pending_empties_slots() {
        let mut table = JobTable::new();
        dispatch(&mut table, "berry", 1);
        dispatch(&mut table, "cheese", 2);
        let _ = table.admit(&"berry", job(3));
        let _ = table.admit(&"cheese", job(4));

        let mut dropped: Vec<_> = table
            .take_pending()
            .into_iter()
            .map(|(key, job)| (key, job.id()))
            .collect();
        dropped.sort();

        assert_eq!(dropped, vec![("berry", JobId(3)), ("cheese", JobId(4))]);
        assert_eq!(table.pending_len(), 0);
        assert_eq!(table.running_len(), 2);
    }

    #[test]
    fn test_stray_completion_is_ignored() {
        let mut table: JobTable<&'static str> = JobTable::new();
        assert!(table.complete(&"ghost").is_none());
        assert!(table.is_idle(&"ghost"));
    }
}
