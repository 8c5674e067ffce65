use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Transport-assigned identifier of a live connection. Changes when a
/// worker reconnects; the worker's `host` is its stable identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Connected,
    Running,
    Paused,
}

impl std::fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerStatus::Connected => write!(f, "connected"),
            WorkerStatus::Running => write!(f, "running"),
            WorkerStatus::Paused => write!(f, "paused"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerNode {
    pub id: ConnectionId,
    pub host: String,
    pub platform: String,
    pub status: WorkerStatus,
    pub statistics: Value,
    /// Queue jobs pulled by this worker.
    pub assigned_jobs: u64,
    /// Exe jobs pushed to this worker.
    pub assigned_executions: u64,
    pub disconnected: bool,
}

impl WorkerNode {
    pub fn new(id: ConnectionId, host: String, platform: String, statistics: Value) -> Self {
        Self {
            id,
            host,
            platform,
            status: WorkerStatus::Connected,
            statistics,
            assigned_jobs: 0,
            assigned_executions: 0,
            disconnected: false,
        }
    }

    pub fn load(&self) -> u64 {
        self.assigned_jobs + self.assigned_executions
    }

    fn serves(&self, host: Option<&str>) -> bool {
        host.map_or(true, |host| self.host == host)
    }
}

/// Registration details reported by a worker.
#[derive(Debug, Clone)]
pub struct Registration {
    pub conn_id: ConnectionId,
    pub old_conn_id: Option<ConnectionId>,
    pub host: String,
    pub platform: String,
    pub statistics: Value,
}

/// Tracks connected workers in registration order.
///
/// Order matters: ties in load are broken by position, so the first
/// registered of equally loaded workers is chosen.
#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: Vec<WorkerNode>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a worker, taking over a previous record when the worker
    /// reconnects with its old connection id. Registering a connection id
    /// that is already known does not create a second record.
    pub fn register(&mut self, registration: Registration) -> WorkerNode {
        let Registration {
            conn_id,
            old_conn_id,
            host,
            platform,
            statistics,
        } = registration;

        if let Some(old_id) = old_conn_id.filter(|old_id| *old_id != conn_id) {
            let known_old = self.workers.iter().any(|w| w.id == old_id);
            if known_old && self.get(&conn_id).is_some() {
                // one record per connection id; the older record keeps its counters
                self.workers.retain(|w| w.id != conn_id);
                tracing::info!(conn_id = %conn_id, old_conn_id = %old_id, "Dropped fresh record superseded by re-registration");
            }
            match self.workers.iter_mut().find(|w| w.id == old_id) {
                Some(worker) => {
                    tracing::info!(new_conn_id = %conn_id, old_conn_id = %old_id, "Worker node re-registered");
                    worker.id = conn_id.clone();
                    worker.disconnected = false;
                }
                None => {
                    tracing::info!(old_conn_id = %old_id, "No existing worker node found for old connection id");
                }
            }
        }

        if let Some(worker) = self.get(&conn_id) {
            return worker.clone();
        }

        let worker = WorkerNode::new(conn_id, host, platform, statistics);
        self.workers.push(worker.clone());
        tracing::info!(conn_id = %worker.id, host = %worker.host, total = self.workers.len(), "Worker node registered");
        worker
    }

    /// Mark a worker disconnected without removing it. Returns whether
    /// the connection belonged to a known worker.
    pub fn record_disconnect(&mut self, conn_id: &ConnectionId) -> bool {
        match self.get_mut(conn_id) {
            Some(worker) => {
                worker.disconnected = true;
                tracing::info!(conn_id = %conn_id, "Worker marked as disconnected");
                true
            }
            None => false,
        }
    }

    /// Remove the worker still registered under `conn_id`. Returns `None`
    /// when the worker re-registered under a new id in the meantime.
    pub fn evict(&mut self, conn_id: &ConnectionId) -> Option<WorkerNode> {
        let index = self.workers.iter().position(|w| &w.id == conn_id)?;
        Some(self.workers.remove(index))
    }

    pub fn set_status(&mut self, conn_id: &ConnectionId, status: WorkerStatus) {
        if let Some(worker) = self.get_mut(conn_id) {
            worker.status = status;
        }
    }

    pub fn set_statistics(&mut self, conn_id: &ConnectionId, statistics: Value) {
        if let Some(worker) = self.get_mut(conn_id) {
            worker.statistics = statistics;
        }
    }

    pub fn record_pull(&mut self, conn_id: &ConnectionId) {
        if let Some(worker) = self.get_mut(conn_id) {
            worker.assigned_jobs += 1;
        }
    }

    /// Pick the least loaded connected worker for an immediate execution
    /// and charge it with the assignment.
    ///
    /// Idle workers (status other than running) are preferred; when none
    /// match, any connected worker serving `host` is eligible.
    pub fn assign_execution(&mut self, host: Option<&str>) -> Option<WorkerNode> {
        let eligible: Vec<usize> = self
            .workers
            .iter()
            .enumerate()
            .filter(|(_, w)| !w.disconnected && w.serves(host))
            .map(|(i, _)| i)
            .collect();

        let idle: Vec<usize> = eligible
            .iter()
            .copied()
            .filter(|&i| self.workers[i].status != WorkerStatus::Running)
            .collect();

        let candidates = if idle.is_empty() { eligible } else { idle };

        // min_by_key keeps the first of equal elements
        let chosen = candidates
            .into_iter()
            .min_by_key(|&i| self.workers[i].load())?;

        let worker = &mut self.workers[chosen];
        worker.assigned_executions += 1;
        Some(worker.clone())
    }

    /// First registered worker for `host`, connected or not.
    pub fn find_by_host(&self, host: &str) -> Option<&WorkerNode> {
        self.workers.iter().find(|w| w.host == host)
    }

    pub fn get(&self, conn_id: &ConnectionId) -> Option<&WorkerNode> {
        self.workers.iter().find(|w| &w.id == conn_id)
    }

    fn get_mut(&mut self, conn_id: &ConnectionId) -> Option<&mut WorkerNode> {
        self.workers.iter_mut().find(|w| &w.id == conn_id)
    }

    pub fn list_all(&self) -> Vec<WorkerNode> {
        self.workers.clone()
    }

    pub fn list_connected(&self) -> Vec<WorkerNode> {
        self.workers
            .iter()
            .filter(|w| !w.disconnected)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}
