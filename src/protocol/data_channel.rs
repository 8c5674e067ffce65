use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::datastore::DataStore;
use crate::error::{BrokerError, Result};
use crate::protocol::connections::Connection;
use crate::protocol::messages::{DataOpRequest, DataRegisterRequest, RequestFrame};
use crate::protocol::server::ChannelHandler;

/// Handles the `/db` channel by forwarding to the configured [`DataStore`].
pub struct DataChannel {
    store: Arc<dyn DataStore>,
}

impl DataChannel {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    async fn handle(&self, frame: &RequestFrame) -> Result<Value> {
        match frame.event.as_str() {
            "op" => {
                let req: DataOpRequest = frame.payload()?;
                let result = self
                    .store
                    .op(&req.table, &req.operation, req.arguments.clone())
                    .await;
                if let Err(e) = &result {
                    tracing::error!(table = %req.table, operation = %req.operation, arguments = ?req.arguments, error = %e, "Data operation failed");
                }
                result
            }
            "register" => {
                let req: DataRegisterRequest = frame.payload()?;
                self.store.register_data_store(&req.name).await
            }
            other => Err(BrokerError::UnknownEvent(other.to_string())),
        }
    }
}

#[async_trait]
impl ChannelHandler for DataChannel {
    fn name(&self) -> &'static str {
        "db"
    }

    async fn on_event(&self, conn: &Connection, frame: RequestFrame) {
        let result = self.handle(&frame).await;
        if let Err(e) = &result {
            tracing::warn!(conn_id = %conn.id, event = %frame.event, error = %e, "Data request failed");
        }
        conn.ack(frame.ack, result);
    }
}
