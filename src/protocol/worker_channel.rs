use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::BrokerConfig;
use crate::env::worker_env;
use crate::error::{BrokerError, Result};
use crate::protocol::connections::Connection;
use crate::protocol::messages::{encode_reply, PullRequest, RegisterRequest, RequestFrame, StatusRequest};
use crate::protocol::server::ChannelHandler;
use crate::scheduler::job::WorkerReport;
use crate::scheduler::registry::{Registration, WorkerStatus};
use crate::scheduler::Dispatcher;

/// Handles the `/worker` channel: registration, pulls, progress reports and
/// status updates from worker processes.
pub struct WorkerChannel {
    dispatcher: Dispatcher,
    config: Arc<BrokerConfig>,
}

impl WorkerChannel {
    pub fn new(dispatcher: Dispatcher, config: Arc<BrokerConfig>) -> Self {
        Self { dispatcher, config }
    }

    async fn handle(&self, conn: &Connection, frame: &RequestFrame) -> Result<Value> {
        match frame.event.as_str() {
            "register" => {
                let req: RegisterRequest = frame.payload()?;
                if let Some(claimed) = req.id.as_ref().filter(|id| **id != conn.id) {
                    tracing::warn!(conn_id = %conn.id, claimed = %claimed, "Worker reported a different connection id");
                }
                self.dispatcher
                    .register_worker(Registration {
                        conn_id: conn.id.clone(),
                        old_conn_id: req.old_id,
                        host: req.host,
                        platform: req.platform,
                        statistics: req.statistics,
                    })
                    .await;
                encode_reply(&frame.event, &worker_env(&self.config))
            }
            "get" => {
                let req: PullRequest = frame.payload()?;
                let job = self
                    .dispatcher
                    .claim_next(&conn.id, req.host.as_deref())
                    .await;
                encode_reply(&frame.event, &job)
            }
            "background-in-progress" => {
                let report: WorkerReport = frame.payload()?;
                self.dispatcher
                    .report_background_in_progress(&conn.id, report)
                    .await?;
                Ok(Value::Null)
            }
            "done" => {
                let report: WorkerReport = frame.payload()?;
                self.dispatcher.report_done(&conn.id, report).await?;
                Ok(Value::Null)
            }
            "running" => {
                self.dispatcher
                    .set_worker_status(&conn.id, WorkerStatus::Running, None)
                    .await;
                Ok(Value::Null)
            }
            "paused" => {
                let req: StatusRequest = frame.payload()?;
                self.dispatcher
                    .set_worker_status(&conn.id, WorkerStatus::Paused, req.statistics)
                    .await;
                Ok(Value::Null)
            }
            "statistics" => {
                let req: StatusRequest = frame.payload()?;
                if let Some(statistics) = req.statistics {
                    self.dispatcher
                        .set_worker_statistics(&conn.id, statistics)
                        .await;
                }
                Ok(Value::Null)
            }
            other => Err(BrokerError::UnknownEvent(other.to_string())),
        }
    }
}

#[async_trait]
impl ChannelHandler for WorkerChannel {
    fn name(&self) -> &'static str {
        "worker"
    }

    async fn on_event(&self, conn: &Connection, frame: RequestFrame) {
        let result = self.handle(conn, &frame).await;
        if let Err(e) = &result {
            tracing::warn!(conn_id = %conn.id, event = %frame.event, error = %e, "Worker request failed");
        }
        conn.ack(frame.ack, result);
    }

    async fn on_disconnect(&self, conn: &Connection) {
        // the grace timer runs detached
        let _ = self.dispatcher.worker_disconnected(&conn.id).await;
    }
}
