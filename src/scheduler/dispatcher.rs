use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::BrokerConfig;
use crate::error::{BrokerError, Result};
use crate::scheduler::job::{Completion, JobRecord, JobSpec, JobStatus, JobSummary, JobType, WorkerReport};
use crate::scheduler::notifier::{CompletionNotifier, JobFailure, OutcomeReceiver};
use crate::scheduler::queue::QueueStore;
use crate::scheduler::registry::{ConnectionId, Registration, WorkerNode, WorkerRegistry, WorkerStatus};

/// Messages the broker pushes to workers without expecting an answer.
#[derive(Debug, Clone)]
pub enum WorkerPush {
    /// New queue work may be available; pull with `get`.
    Run,
    /// Execute this job now.
    Exe(Box<JobRecord>),
    /// Maintenance request forwarded from a submitter.
    Housekeeping(Value),
}

/// Outbound side of the worker channel.
#[async_trait]
pub trait WorkerOutbox: Send + Sync {
    /// Returns false when no live connection exists for `conn_id`.
    async fn send(&self, conn_id: &ConnectionId, push: WorkerPush) -> bool;

    async fn broadcast(&self, push: WorkerPush);
}

/// A job accepted for dispatch and the handle its submitter waits on.
#[derive(Debug)]
pub struct Submission {
    pub job_id: Uuid,
    pub outcome: OutcomeReceiver,
}

/// Assigns jobs to workers and applies worker reports to job state.
///
/// Lock order is always registry before queue; no path holds the queue
/// lock while acquiring the registry lock.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<WorkerRegistry>>,
    queue: Arc<RwLock<QueueStore>>,
    outbox: Arc<dyn WorkerOutbox>,
    reconnect_grace: std::time::Duration,
    retention: chrono::Duration,
}

impl Dispatcher {
    pub fn new(outbox: Arc<dyn WorkerOutbox>, config: &BrokerConfig) -> Self {
        Self {
            registry: Arc::new(RwLock::new(WorkerRegistry::new())),
            queue: Arc::new(RwLock::new(QueueStore::new())),
            outbox,
            reconnect_grace: config.reconnect_grace,
            retention: config.queue_retention,
        }
    }

    // ---------------------------------------------------------------------
    // Worker lifecycle
    // ---------------------------------------------------------------------

    pub async fn register_worker(&self, registration: Registration) -> WorkerNode {
        let (worker, taken_over) = {
            let mut registry = self.registry.write().await;
            let taken_over = registration
                .old_conn_id
                .clone()
                .filter(|old| *old != registration.conn_id && registry.get(old).is_some());
            (registry.register(registration), taken_over)
        };

        // jobs follow the worker to its new connection id
        if let Some(old_id) = taken_over {
            let moved = self
                .queue
                .write()
                .await
                .reassign_in_flight(&old_id, &worker.id);
            if moved > 0 {
                tracing::info!(conn_id = %worker.id, old_conn_id = %old_id, moved, "In-flight jobs moved to reconnected worker");
            }
        }

        // make sure the worker pulls whatever is already queued
        self.outbox.send(&worker.id, WorkerPush::Run).await;
        worker
    }

    pub async fn set_worker_status(
        &self,
        conn_id: &ConnectionId,
        status: WorkerStatus,
        statistics: Option<Value>,
    ) {
        let mut registry = self.registry.write().await;
        registry.set_status(conn_id, status);
        if let Some(statistics) = statistics {
            registry.set_statistics(conn_id, statistics);
        }
    }

    pub async fn set_worker_statistics(&self, conn_id: &ConnectionId, statistics: Value) {
        self.registry
            .write()
            .await
            .set_statistics(conn_id, statistics);
    }

    /// Handle a dropped worker connection. The worker is kept for the
    /// reconnect grace period; returns the eviction timer if the
    /// connection belonged to a registered worker.
    pub async fn worker_disconnected(&self, conn_id: &ConnectionId) -> Option<JoinHandle<()>> {
        let known = self.registry.write().await.record_disconnect(conn_id);
        if !known {
            tracing::info!(conn_id = %conn_id, "Disconnected connection was not a registered worker");
            return None;
        }

        let in_flight = self.queue.read().await.in_flight_for(conn_id).len();
        tracing::info!(
            conn_id = %conn_id,
            in_flight,
            grace_secs = self.reconnect_grace.as_secs(),
            "Worker disconnected, waiting for it to reconnect"
        );

        Some(self.schedule_grace_period_eviction(conn_id.clone(), self.reconnect_grace))
    }

    /// Arm a timer that evicts the worker still registered under `conn_id`
    /// once `grace` elapses. A worker that re-registers in the meantime has
    /// a new id, so the timer finds nothing and does nothing.
    pub fn schedule_grace_period_eviction(
        &self,
        conn_id: ConnectionId,
        grace: std::time::Duration,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            dispatcher.evict_if_not_reconnected(&conn_id).await;
        })
    }

    /// Remove the worker under `conn_id` and fail its in-flight jobs.
    /// Returns the number of jobs failed.
    pub async fn evict_if_not_reconnected(&self, conn_id: &ConnectionId) -> usize {
        let evicted = {
            let mut registry = self.registry.write().await;
            let evicted = registry.evict(conn_id);
            if evicted.is_some() {
                tracing::warn!(conn_id = %conn_id, remaining = registry.len(), "Worker did not reconnect in time, removed");
            }
            evicted
        };

        if evicted.is_none() {
            tracing::info!(conn_id = %conn_id, "Disconnected worker reconnected successfully");
            return 0;
        }

        let mut queue = self.queue.write().await;
        let now = Utc::now();
        let failed = queue.in_flight_for(conn_id);
        for id in &failed {
            if let Some(job) = queue.get_job_mut(id) {
                tracing::error!(job_id = %job.id, name = %job.name, conn_id = %conn_id, "Job failed due to worker disconnect");
                job.status = JobStatus::Failed;
                job.error = Some(BrokerError::WorkerDisconnected.to_payload());
                job.completed = Some(now);
                if !job.background {
                    job.notifier
                        .resolve_failure(BrokerError::WorkerDisconnected.into());
                }
            }
        }
        failed.len()
    }

    // ---------------------------------------------------------------------
    // Submission
    // ---------------------------------------------------------------------

    /// Push a job straight to the least loaded eligible worker.
    pub async fn dispatch_immediate(&self, spec: JobSpec) -> Result<Submission> {
        let worker = {
            let mut registry = self.registry.write().await;
            registry.assign_execution(spec.host.as_deref())
        };

        let Some(worker) = worker else {
            let err = BrokerError::NoWorkersAvailable {
                name: spec.name.clone(),
                host: spec.host.clone(),
                background: spec.background,
            };
            tracing::warn!(name = %spec.name, host = ?spec.host, error = %err, "Immediate dispatch rejected");
            return Err(err);
        };

        let (notifier, outcome) = CompletionNotifier::new();
        let job = JobRecord::execution(spec, worker.id.clone(), worker.host.clone(), notifier);
        let job_id = job.id;
        let push = WorkerPush::Exe(Box::new(job.clone()));

        self.queue.write().await.insert(job);
        tracing::info!(job_id = %job_id, conn_id = %worker.id, host = %worker.host, "Exe job assigned");

        if !self.outbox.send(&worker.id, push).await {
            tracing::warn!(job_id = %job_id, conn_id = %worker.id, "Assigned worker has no live connection");
        }

        Ok(Submission { job_id, outcome })
    }

    /// Queue a job for any eligible worker to pull.
    pub async fn dispatch_queued(&self, spec: JobSpec) -> Result<Submission> {
        if spec.name.is_empty() {
            tracing::warn!("Rejected queue job without a name");
            return Err(BrokerError::JobNotDefined);
        }

        let (notifier, outcome) = CompletionNotifier::new();
        let job = JobRecord::queued(spec, notifier);
        let job_id = job.id;
        tracing::info!(job_id = %job_id, name = %job.name, host = ?job.host, "Queue job added");

        self.queue.write().await.insert(job);
        self.outbox.broadcast(WorkerPush::Run).await;

        Ok(Submission { job_id, outcome })
    }

    /// Forward a housekeeping request to the first worker on `host`.
    pub async fn housekeeping(&self, host: &str, options: Value) -> Result<WorkerNode> {
        let worker = self.registry.read().await.find_by_host(host).cloned();
        match worker {
            Some(worker) => {
                self.outbox
                    .send(&worker.id, WorkerPush::Housekeeping(options))
                    .await;
                Ok(worker)
            }
            None => {
                let err = BrokerError::NoWorkerForHost(host.to_string());
                tracing::warn!(host, error = %err, "Housekeeping rejected");
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Worker reports
    // ---------------------------------------------------------------------

    /// Claim the next pending queue job for a pulling worker.
    pub async fn claim_next(&self, conn_id: &ConnectionId, host: Option<&str>) -> Option<JobSummary> {
        let summary = self
            .queue
            .write()
            .await
            .claim_pending(host, conn_id, Utc::now())
            .map(JobRecord::summary)?;

        self.registry.write().await.record_pull(conn_id);
        tracing::info!(job_id = %summary.id, conn_id = %conn_id, name = %summary.name, "Queue job claimed");
        Some(summary)
    }

    /// A background job finished its setup on the worker. This is the
    /// point at which its submitter hears back.
    pub async fn report_background_in_progress(
        &self,
        conn_id: &ConnectionId,
        report: WorkerReport,
    ) -> Result<()> {
        tracing::info!(conn_id = %conn_id, job_id = %report.id, "Background in progress");

        let mut queue = self.queue.write().await;
        let job = find_reported(&mut queue, &report.id)?;
        if !job.background {
            tracing::warn!(job_id = %job.id, "Background progress reported for a foreground job");
            return Err(BrokerError::NotBackgroundJob(job.id.to_string()));
        }

        job.result = report.result;
        job.error = report.error;
        job.run_by_client = Some(conn_id.clone());

        match job.error.clone() {
            Some(error) => {
                tracing::error!(job_id = %job.id, host = ?report.host, platform = ?report.platform, error = %error, "Background job setup failed on worker");
                job.status = JobStatus::BackgroundSetupFailed;
                job.notifier.resolve_failure(JobFailure(error));
            }
            None => {
                job.status = JobStatus::BackgroundInProgress;
                let completion = completion_for(job, report.host, report.platform);
                job.notifier.resolve_success(completion);
            }
        }
        Ok(())
    }

    /// A worker finished a job. Foreground submitters are notified here;
    /// background submitters were already answered.
    pub async fn report_done(&self, conn_id: &ConnectionId, report: WorkerReport) -> Result<()> {
        tracing::info!(conn_id = %conn_id, job_id = %report.id, "Worker done with job");

        let mut queue = self.queue.write().await;
        let now = Utc::now();
        let job = find_reported(&mut queue, &report.id)?;

        job.result = report.result;
        job.error = report.error;
        job.completed = Some(now);
        job.run_by_client = Some(conn_id.clone());

        match job.error.clone() {
            Some(error) => {
                tracing::error!(job_id = %job.id, job_type = %job.job_type, host = ?report.host, platform = ?report.platform, error = %error, "Job failed on worker");
                job.status = JobStatus::Failed;
                if !job.background {
                    job.notifier.resolve_failure(JobFailure(error));
                }
            }
            None => {
                job.status = JobStatus::Complete;
                if !job.background {
                    let completion = completion_for(job, report.host, report.platform);
                    job.notifier.resolve_success(completion);
                }
            }
        }

        queue.evict_expired(now, self.retention);
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Inspection
    // ---------------------------------------------------------------------

    pub async fn list_workers(&self) -> Vec<WorkerNode> {
        self.registry.read().await.list_all()
    }

    pub async fn list_connected_workers(&self) -> Vec<WorkerNode> {
        self.registry.read().await.list_connected()
    }

    /// Jobs of one type, newest first.
    pub async fn list_jobs(&self, job_type: JobType) -> Vec<JobRecord> {
        self.queue
            .read()
            .await
            .list_by_type(job_type)
            .into_iter()
            .cloned()
            .collect()
    }

    pub async fn get_job(&self, id: &Uuid) -> Option<JobRecord> {
        self.queue.read().await.get_job(id).cloned()
    }
}

fn find_reported<'a>(queue: &'a mut QueueStore, id: &str) -> Result<&'a mut JobRecord> {
    let job = Uuid::parse_str(id)
        .ok()
        .and_then(|uuid| queue.get_job_mut(&uuid));
    match job {
        Some(job) => Ok(job),
        None => {
            tracing::warn!(job_id = id, "Report for unknown job");
            Err(BrokerError::JobNotFound(id.to_string()))
        }
    }
}

fn completion_for(job: &JobRecord, host: Option<String>, platform: Option<String>) -> Completion {
    Completion {
        id: job.id,
        job_type: job.job_type,
        status: job.status,
        result: job.result.clone(),
        host,
        platform,
        background: job.background,
    }
}
