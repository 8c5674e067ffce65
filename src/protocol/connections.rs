use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::BrokerError;
use crate::protocol::messages::{AckFrame, EventFrame};
use crate::scheduler::dispatcher::{WorkerOutbox, WorkerPush};
use crate::scheduler::registry::ConnectionId;

/// Serialized frames queued for one connection's writer task.
pub type FrameSender = mpsc::UnboundedSender<String>;

/// One accepted connection as seen by a channel handler.
#[derive(Clone)]
pub struct Connection {
    pub id: ConnectionId,
    sender: FrameSender,
    cancel: CancellationToken,
}

impl Connection {
    pub fn new(id: ConnectionId, sender: FrameSender, cancel: CancellationToken) -> Self {
        Self { id, sender, cancel }
    }

    /// Cancelled once the connection is torn down.
    pub fn closed(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn push(&self, frame: &EventFrame) -> bool {
        self.write(frame)
    }

    /// Answer a request. Requests without an ack id get no answer.
    pub fn ack(&self, ack: Option<u64>, result: std::result::Result<Value, BrokerError>) {
        self.ack_raw(ack, result.map_err(|e| e.to_payload()));
    }

    /// Answer a request with an already-encoded error payload.
    pub fn ack_raw(&self, ack: Option<u64>, result: std::result::Result<Value, Value>) {
        let Some(ack) = ack else {
            return;
        };
        let frame = match result {
            Ok(value) => AckFrame::ok(ack, value),
            Err(error) => AckFrame::err(ack, error),
        };
        self.write(&frame);
    }

    fn write<T: Serialize>(&self, frame: &T) -> bool {
        match encode(frame) {
            Some(text) => self.sender.send(text).is_ok(),
            None => false,
        }
    }
}

/// Live connections of one channel, keyed by connection id.
#[derive(Clone, Default)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<ConnectionId, FrameSender>>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, conn_id: ConnectionId, sender: FrameSender) {
        self.connections.write().await.insert(conn_id, sender);
    }

    pub async fn unregister(&self, conn_id: &ConnectionId) {
        self.connections.write().await.remove(conn_id);
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Queue a frame for `conn_id`. Returns false if the connection is gone.
    pub async fn send<T: Serialize>(&self, conn_id: &ConnectionId, frame: &T) -> bool {
        let Some(text) = encode(frame) else {
            return false;
        };
        let connections = self.connections.read().await;
        match connections.get(conn_id) {
            Some(sender) => {
                if sender.send(text).is_err() {
                    tracing::warn!(conn_id = %conn_id, "Connection writer closed");
                    return false;
                }
                true
            }
            None => {
                tracing::warn!(conn_id = %conn_id, "No live connection");
                false
            }
        }
    }

    pub async fn broadcast<T: Serialize>(&self, frame: &T) {
        let Some(text) = encode(frame) else {
            return;
        };
        let connections = self.connections.read().await;
        for (conn_id, sender) in connections.iter() {
            if sender.send(text.clone()).is_err() {
                tracing::debug!(conn_id = %conn_id, "Skipped closed connection during broadcast");
            }
        }
    }
}

fn encode<T: Serialize>(frame: &T) -> Option<String> {
    match serde_json::to_string(frame) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode frame");
            None
        }
    }
}

fn push_frame(push: WorkerPush) -> EventFrame {
    match push {
        WorkerPush::Run => EventFrame::new("run", Value::Null),
        WorkerPush::Exe(job) => EventFrame::new(
            "exe",
            serde_json::to_value(&*job).unwrap_or(Value::Null),
        ),
        WorkerPush::Housekeeping(options) => EventFrame::new("housekeeping", options),
    }
}

#[async_trait]
impl WorkerOutbox for ConnectionManager {
    async fn send(&self, conn_id: &ConnectionId, push: WorkerPush) -> bool {
        ConnectionManager::send(self, conn_id, &push_frame(push)).await
    }

    async fn broadcast(&self, push: WorkerPush) {
        ConnectionManager::broadcast(self, &push_frame(push)).await
    }
}
