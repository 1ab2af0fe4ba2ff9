use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::models::{Job, NewJob};

/// Registry of forecast jobs.
///
/// Every mutation goes through [`JobStore::lock`], which hands out an
/// exclusive guard for one job id. Two callers stepping the same job are
/// serialized; jobs with different ids never contend.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, new_job: NewJob) -> Job;

    async fn get(&self, id: &str) -> Option<Job>;

    /// Exclusive access to one job for mutate-with-lock
    async fn lock(&self, id: &str) -> Option<OwnedMutexGuard<Job>>;

    async fn remove(&self, id: &str) -> Option<Job>;

    /// Drop terminal jobs that finished before `cutoff`. Returns how many went.
    fn sweep(&self, cutoff: DateTime<Utc>) -> usize;

    fn len(&self) -> usize;
}

/// Process-local job registry backed by a concurrent map
#[derive(Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<DashMap<String, Arc<Mutex<Job>>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: &str) -> Option<Arc<Mutex<Job>>> {
        // Clone the Arc so the shard lock is released before awaiting the job lock
        self.jobs.get(id).map(|e| e.value().clone())
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, new_job: NewJob) -> Job {
        let id = Uuid::new_v4().simple().to_string();
        let job = Job::new(id.clone(), new_job);
        self.jobs.insert(id, Arc::new(Mutex::new(job.clone())));
        job
    }

    async fn get(&self, id: &str) -> Option<Job> {
        let entry = self.entry(id)?;
        let job = entry.lock().await;
        Some(job.clone())
    }

    async fn lock(&self, id: &str) -> Option<OwnedMutexGuard<Job>> {
        let entry = self.entry(id)?;
        Some(entry.lock_owned().await)
    }

    async fn remove(&self, id: &str) -> Option<Job> {
        let (_, entry) = self.jobs.remove(id)?;
        let job = entry.lock().await;
        Some(job.clone())
    }

    fn sweep(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| match entry.try_lock() {
            Ok(job) => match job.finished_at {
                Some(finished_at) if job.state.is_terminal() => finished_at >= cutoff,
                _ => true,
            },
            // Someone is mutating it right now, so it is not stale
            Err(_) => true,
        });
        before.saturating_sub(self.jobs.len())
    }

    fn len(&self) -> usize {
        self.jobs.len()
    }
}
