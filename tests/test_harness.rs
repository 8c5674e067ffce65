//! Shared helpers for broker integration tests.
//!
//! Provides a recording outbox for driving the dispatcher directly, and a
//! loopback broker plus worker/submitter clients for end-to-end tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use jobbus::broker::Broker;
use jobbus::client::BusClient;
use jobbus::config::BrokerConfig;
use jobbus::datastore::MemoryDataStore;
use jobbus::protocol::messages::EventFrame;
use jobbus::scheduler::registry::Registration;
use jobbus::scheduler::{
    ConnectionId, Dispatcher, JobRecord, WorkerOutbox, WorkerPush, WorkerReport,
};

// =============================================================================
// Dispatcher-level helpers
// =============================================================================

/// Outbox that records every push instead of writing to a socket.
#[derive(Default)]
pub struct RecordingOutbox {
    sent: Mutex<Vec<(ConnectionId, WorkerPush)>>,
    broadcasts: Mutex<Vec<WorkerPush>>,
}

impl RecordingOutbox {
    /// Pushes addressed to one worker, in send order.
    pub fn pushes_to(&self, conn_id: &ConnectionId) -> Vec<WorkerPush> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == conn_id)
            .map(|(_, push)| push.clone())
            .collect()
    }

    /// Exe jobs in send order with the worker each went to.
    pub fn executions(&self) -> Vec<(ConnectionId, JobRecord)> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter_map(|(id, push)| match push {
                WorkerPush::Exe(job) => Some((id.clone(), (**job).clone())),
                _ => None,
            })
            .collect()
    }

    pub fn broadcast_count(&self) -> usize {
        self.broadcasts.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerOutbox for RecordingOutbox {
    async fn send(&self, conn_id: &ConnectionId, push: WorkerPush) -> bool {
        self.sent.lock().unwrap().push((conn_id.clone(), push));
        true
    }

    async fn broadcast(&self, push: WorkerPush) {
        self.broadcasts.lock().unwrap().push(push);
    }
}

pub fn test_dispatcher(config: &BrokerConfig) -> (Dispatcher, Arc<RecordingOutbox>) {
    let outbox = Arc::new(RecordingOutbox::default());
    let dispatcher = Dispatcher::new(outbox.clone(), config);
    (dispatcher, outbox)
}

pub fn registration(conn_id: &str, host: &str) -> Registration {
    Registration {
        conn_id: ConnectionId::from(conn_id),
        old_conn_id: None,
        host: host.to_string(),
        platform: "linux".to_string(),
        statistics: json!({}),
    }
}

pub fn reconnection(conn_id: &str, old_conn_id: &str, host: &str) -> Registration {
    Registration {
        old_conn_id: Some(ConnectionId::from(old_conn_id)),
        ..registration(conn_id, host)
    }
}

pub fn success_report(id: impl ToString, result: Value) -> WorkerReport {
    WorkerReport {
        id: id.to_string(),
        result: Some(result),
        host: Some("build-01".to_string()),
        platform: Some("linux".to_string()),
        ..Default::default()
    }
}

pub fn failure_report(id: impl ToString, error: Value) -> WorkerReport {
    WorkerReport {
        id: id.to_string(),
        error: Some(error),
        host: Some("build-01".to_string()),
        platform: Some("linux".to_string()),
        ..Default::default()
    }
}

// =============================================================================
// Loopback broker
// =============================================================================

/// Handle to a broker serving on an ephemeral local port.
pub struct TestBroker {
    pub addr: SocketAddr,
    pub dispatcher: Dispatcher,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl TestBroker {
    pub async fn start() -> Self {
        Self::start_with(BrokerConfig::default()).await
    }

    pub async fn start_with(config: BrokerConfig) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let broker = Broker::new(
            BrokerConfig {
                listen_addr: addr,
                ..config
            },
            Arc::new(MemoryDataStore::new()),
        );
        let dispatcher = broker.dispatcher.clone();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            broker.serve(listener, token).await.unwrap();
        });

        Self {
            addr,
            dispatcher,
            shutdown,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    pub async fn submitter(&self) -> Arc<BusClient> {
        Arc::new(BusClient::connect(&self.url("/bus")).await.unwrap())
    }

    /// Connect a worker and register it under `host`.
    pub async fn worker(&self, host: &str) -> TestWorker {
        TestWorker::register(self, host, None).await
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.handle.abort();
    }

    /// Cancel the shutdown token and wait for the server task to return.
    pub async fn shut_down(self, within: Duration) {
        self.shutdown.cancel();
        tokio::time::timeout(within, self.handle)
            .await
            .expect("broker did not stop after shutdown")
            .unwrap();
    }
}

/// A registered worker connection and the environment it was handed.
pub struct TestWorker {
    pub client: BusClient,
    pub env: Value,
}

impl TestWorker {
    pub async fn register(broker: &TestBroker, host: &str, old_id: Option<&ConnectionId>) -> Self {
        let client = BusClient::connect(&broker.url("/worker")).await.unwrap();
        let env = client
            .request(
                "register",
                json!({
                    "id": client.id,
                    "oldId": old_id,
                    "host": host,
                    "platform": "linux",
                    "statistics": { "cpus": 4 },
                }),
            )
            .await
            .unwrap()
            .unwrap();
        Self { client, env }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.client.id
    }

    /// Wait for the next push named `event`, skipping others.
    pub async fn expect_push(&self, event: &str) -> EventFrame {
        let wait = async {
            loop {
                match self.client.next_event().await {
                    Some(frame) if frame.event == event => return frame,
                    Some(_) => continue,
                    None => panic!("connection closed while waiting for {}", event),
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .unwrap_or_else(|_| panic!("no {} push within 5s", event))
    }

    pub async fn report(&self, event: &str, data: Value) -> Result<Value, Value> {
        self.client.request(event, data).await.unwrap()
    }
}

// =============================================================================
// Polling
// =============================================================================

/// Wait for a condition to become true with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout_duration: Duration, poll_interval: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let start = tokio::time::Instant::now();
    while start.elapsed() < timeout_duration {
        if condition().await {
            return true;
        }
        tokio::time::sleep(poll_interval).await;
    }
    false
}

/// Assert a condition eventually becomes true
pub async fn assert_eventually<F, Fut>(condition: F, timeout_duration: Duration, message: &str)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = wait_for(condition, timeout_duration, Duration::from_millis(20)).await;
    assert!(result, "{}", message);
}
