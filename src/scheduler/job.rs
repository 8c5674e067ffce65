use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::scheduler::notifier::CompletionNotifier;
use crate::scheduler::registry::ConnectionId;

/// Dispatch policy a job was submitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// Durable, pull-based job claimed by any eligible worker.
    Queue,
    /// Immediate job pushed to a server-selected worker.
    Exe,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Queue => write!(f, "queue"),
            JobType::Exe => write!(f, "exe"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Running,
    Complete,
    Failed,
    BackgroundInProgress,
    BackgroundSetupFailed,
}

impl JobStatus {
    /// Status held by a job a worker is actively responsible for.
    pub fn is_in_flight(self) -> bool {
        matches!(self, JobStatus::InProgress | JobStatus::Running)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::InProgress => write!(f, "in-progress"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::BackgroundInProgress => write!(f, "background-in-progress"),
            JobStatus::BackgroundSetupFailed => write!(f, "background-setup-failed"),
        }
    }
}

/// What a submitter asks the broker to run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub background: bool,
    #[serde(default)]
    pub options: Value,
    #[serde(default)]
    pub description: Option<String>,
}

impl JobSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn on_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn background(mut self) -> Self {
        self.background = true;
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub name: String,
    pub options: Value,
    pub host: Option<String>,
    pub background: bool,
    pub description: Option<String>,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub run_by_client: Option<ConnectionId>,
    pub worker_id: Option<ConnectionId>,
    pub result: Option<Value>,
    pub error: Option<Value>,
    #[serde(skip)]
    pub notifier: Arc<CompletionNotifier>,
}

impl JobRecord {
    /// A pending queue job waiting to be claimed.
    pub fn queued(spec: JobSpec, notifier: Arc<CompletionNotifier>) -> Self {
        Self::new(JobType::Queue, JobStatus::Pending, spec, notifier)
    }

    /// An exe job already bound to `worker`.
    pub fn execution(
        spec: JobSpec,
        worker: ConnectionId,
        worker_host: String,
        notifier: Arc<CompletionNotifier>,
    ) -> Self {
        let mut job = Self::new(JobType::Exe, JobStatus::Running, spec, notifier);
        job.host = Some(worker_host);
        job.run_by_client = Some(worker.clone());
        job.worker_id = Some(worker);
        job
    }

    fn new(
        job_type: JobType,
        status: JobStatus,
        spec: JobSpec,
        notifier: Arc<CompletionNotifier>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            name: spec.name,
            options: spec.options,
            host: spec.host,
            background: spec.background,
            description: spec.description,
            status,
            created: Utc::now(),
            started: None,
            completed: None,
            run_by_client: None,
            worker_id: None,
            result: None,
            error: None,
            notifier,
        }
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            name: self.name.clone(),
            background: self.background,
            options: self.options.clone(),
        }
    }

    /// Whether a job completed before `cutoff`.
    pub fn completed_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.completed.is_some_and(|completed| completed < cutoff)
    }
}

/// The slice of a queue job handed to a worker on `get`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: Uuid,
    pub name: String,
    pub background: bool,
    pub options: Value,
}

/// Progress or completion report sent by a worker for one job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerReport {
    pub id: String,
    #[serde(default, rename = "type")]
    pub job_type: Option<JobType>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
}

/// Success payload delivered to a waiting submitter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub job_type: JobType,
    pub status: JobStatus,
    pub result: Option<Value>,
    pub host: Option<String>,
    pub platform: Option<String>,
    pub background: bool,
}
