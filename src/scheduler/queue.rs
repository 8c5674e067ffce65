use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::scheduler::job::{JobRecord, JobStatus, JobType};
use crate::scheduler::registry::ConnectionId;

/// Completed jobs stay visible this long before eviction.
pub const DEFAULT_RETENTION_HOURS: i64 = 12;

/// In-memory store of every job the broker knows about, queue and exe alike.
///
/// Jobs are indexed by id and additionally kept in submission order, which
/// is what gives pulls their FIFO-within-host semantics.
#[derive(Debug, Default)]
pub struct QueueStore {
    jobs: HashMap<Uuid, JobRecord>,
    order: Vec<Uuid>,
}

impl QueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, job: JobRecord) {
        self.order.push(job.id);
        self.jobs.insert(job.id, job);
    }

    pub fn get_job(&self, id: &Uuid) -> Option<&JobRecord> {
        self.jobs.get(id)
    }

    pub fn get_job_mut(&mut self, id: &Uuid) -> Option<&mut JobRecord> {
        self.jobs.get_mut(id)
    }

    /// Claim the oldest pending queue job the caller may run.
    ///
    /// A job without a host constraint matches any caller; a constrained
    /// job only matches a caller reporting the same host. The match is
    /// moved to in-progress before returning, so callers holding the
    /// store's lock can never claim the same job twice.
    pub fn claim_pending(
        &mut self,
        host: Option<&str>,
        claimant: &ConnectionId,
        now: DateTime<Utc>,
    ) -> Option<&JobRecord> {
        let jobs = &self.jobs;
        let id = *self.order.iter().find(|id| {
            jobs.get(*id).is_some_and(|job| {
                job.job_type == JobType::Queue
                    && job.status == JobStatus::Pending
                    && job
                        .host
                        .as_deref()
                        .map_or(true, |wanted| Some(wanted) == host)
            })
        })?;

        let job = self.jobs.get_mut(&id)?;
        job.status = JobStatus::InProgress;
        job.started = Some(now);
        job.run_by_client = Some(claimant.clone());
        Some(job)
    }

    /// Jobs of one type, newest first.
    pub fn list_by_type(&self, job_type: JobType) -> Vec<&JobRecord> {
        let mut jobs: Vec<&JobRecord> = self
            .order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| job.job_type == job_type)
            .collect();
        jobs.sort_by(|a, b| b.created.cmp(&a.created));
        jobs
    }

    /// In-flight jobs last handed to `conn_id`.
    pub fn in_flight_for(&self, conn_id: &ConnectionId) -> Vec<Uuid> {
        self.order
            .iter()
            .filter_map(|id| self.jobs.get(id))
            .filter(|job| job.status.is_in_flight() && job.run_by_client.as_ref() == Some(conn_id))
            .map(|job| job.id)
            .collect()
    }

    /// Hand in-flight jobs of `from` over to `to` after a worker reconnects
    /// under a new connection id. Returns the number of jobs moved.
    pub fn reassign_in_flight(&mut self, from: &ConnectionId, to: &ConnectionId) -> usize {
        let mut moved = 0;
        for job in self.jobs.values_mut() {
            if job.status.is_in_flight() && job.run_by_client.as_ref() == Some(from) {
                job.run_by_client = Some(to.clone());
                if job.worker_id.as_ref() == Some(from) {
                    job.worker_id = Some(to.clone());
                }
                moved += 1;
            }
        }
        moved
    }

    /// Drop jobs that completed more than `retention` before `now`.
    /// Returns the number of jobs removed.
    pub fn evict_expired(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let cutoff = now - retention;
        let before = self.jobs.len();
        self.jobs.retain(|_, job| !job.completed_before(cutoff));
        let jobs = &self.jobs;
        self.order.retain(|id| jobs.contains_key(id));
        let removed = before - self.jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Evicted expired jobs");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
