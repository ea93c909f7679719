//! In-memory job store with per-job progress subscriptions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;

use super::job::PublishJob;
use crate::error::{Result, SyncError};
use crate::listeners::{deliver, ListenerId};

const BROADCAST_CAPACITY: usize = 100;

pub type ProgressCallback = Arc<dyn Fn(&PublishJob) + Send + Sync>;

struct Subscriber {
    id: ListenerId,
    callback: ProgressCallback,
    /// One past the highest revision delivered so far.
    next_revision: AtomicU64,
}

impl Subscriber {
    fn notify(&self, job: &PublishJob) {
        let next = job.revision + 1;
        if self.next_revision.fetch_max(next, Ordering::AcqRel) >= next {
            return;
        }
        if !deliver(self.callback.as_ref(), job) {
            log::error!(
                "Progress subscriber {} panicked while handling job {}",
                self.id,
                job.id
            );
        }
    }
}

struct JobEntry {
    job: PublishJob,
    subscribers: Vec<Arc<Subscriber>>,
}

/// Holds every job of the process lifetime until it is evicted.
///
/// A job is evicted once it is terminal, has no subscribers and finished more
/// than the retention period ago. Eviction runs on every insert and on [`sweep`](Self::sweep).
pub struct JobStore {
    jobs: RwLock<HashMap<String, JobEntry>>,
    retention: Duration,
    next_subscriber: AtomicU64,
    sender: broadcast::Sender<PublishJob>,
}

impl JobStore {
    pub fn new(retention: Duration) -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
            next_subscriber: AtomicU64::new(1),
            sender,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, JobEntry>> {
        match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, JobEntry>> {
        match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn insert(&self, job: PublishJob) -> PublishJob {
        self.sweep();
        let snapshot = job.clone();
        self.write().insert(
            job.id.clone(),
            JobEntry {
                job,
                subscribers: Vec::new(),
            },
        );
        let _ = self.sender.send(snapshot.clone());
        snapshot
    }

    /// Applies `change` to a job and notifies its subscribers.
    ///
    /// `change` returns whether it modified the job; unchanged jobs are not re-sent.
    /// Callbacks run after the store lock is released.
    pub fn update<F>(&self, job_id: &str, change: F) -> Result<PublishJob>
    where
        F: FnOnce(&mut PublishJob) -> bool,
    {
        let (snapshot, subscribers) = {
            let mut jobs = self.write();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| SyncError::JobNotFound(job_id.to_string()))?;

            if !change(&mut entry.job) {
                return Ok(entry.job.clone());
            }
            entry.job.revision += 1;
            entry.job.updated_at = Utc::now();
            (entry.job.clone(), entry.subscribers.clone())
        };

        for subscriber in &subscribers {
            subscriber.notify(&snapshot);
        }
        let _ = self.sender.send(snapshot.clone());
        Ok(snapshot)
    }

    pub fn get(&self, job_id: &str) -> Option<PublishJob> {
        self.read().get(job_id).map(|e| e.job.clone())
    }

    /// All jobs, oldest first.
    pub fn jobs(&self) -> Vec<PublishJob> {
        let mut jobs: Vec<PublishJob> = self.read().values().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Subscribes to a job's snapshots.
    ///
    /// The current snapshot is delivered before this returns.
    pub fn subscribe<F>(&self, job_id: &str, callback: F) -> Result<ListenerId>
    where
        F: Fn(&PublishJob) + Send + Sync + 'static,
    {
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber {
            id,
            callback: Arc::new(callback),
            next_revision: AtomicU64::new(0),
        });

        let current = {
            let mut jobs = self.write();
            let entry = jobs
                .get_mut(job_id)
                .ok_or_else(|| SyncError::JobNotFound(job_id.to_string()))?;
            entry.subscribers.push(Arc::clone(&subscriber));
            entry.job.clone()
        };

        subscriber.notify(&current);
        Ok(id)
    }

    /// Removes every subscriber of a job. Returns how many were removed.
    pub fn unsubscribe(&self, job_id: &str) -> usize {
        let mut jobs = self.write();
        match jobs.get_mut(job_id) {
            Some(entry) => {
                let count = entry.subscribers.len();
                entry.subscribers.clear();
                count
            }
            None => 0,
        }
    }

    /// Removes a single subscriber, leaving the job's other subscribers in place.
    pub fn unsubscribe_one(&self, job_id: &str, subscriber_id: ListenerId) -> bool {
        let mut jobs = self.write();
        let Some(entry) = jobs.get_mut(job_id) else {
            return false;
        };
        let before = entry.subscribers.len();
        entry.subscribers.retain(|s| s.id != subscriber_id);
        entry.subscribers.len() != before
    }

    /// Channel receiving every snapshot of every job.
    pub fn subscribe_all(&self) -> broadcast::Receiver<PublishJob> {
        self.sender.subscribe()
    }

    /// Evicts finished jobs without subscribers older than the retention period.
    pub fn sweep(&self) -> usize {
        let now = Utc::now();
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100));

        let mut jobs = self.write();
        let before = jobs.len();
        jobs.retain(|_, entry| {
            let expired = entry
                .job
                .completed_at
                .is_some_and(|done| now.signed_duration_since(done) >= retention);
            !(entry.job.is_terminal() && entry.subscribers.is_empty() && expired)
        });
        let evicted = before - jobs.len();
        if evicted > 0 {
            log::debug!("Evicted {} finished jobs", evicted);
        }
        evicted
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}
