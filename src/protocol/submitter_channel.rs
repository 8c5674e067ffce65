use async_trait::async_trait;
use serde_json::Value;

use crate::error::{BrokerError, Result};
use crate::protocol::connections::Connection;
use crate::protocol::messages::{encode_reply, HousekeepingRequest, RequestFrame, SubmitRequest};
use crate::protocol::server::ChannelHandler;
use crate::scheduler::dispatcher::Submission;
use crate::scheduler::Dispatcher;

/// Handles the `/bus` channel used by job submitters.
pub struct SubmitterChannel {
    dispatcher: Dispatcher,
}

impl SubmitterChannel {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    async fn submit(&self, conn: &Connection, frame: &RequestFrame) -> Result<Submission> {
        let spec: SubmitRequest = frame.payload()?;
        tracing::info!(conn_id = %conn.id, event = %frame.event, name = %spec.name, host = ?spec.host, "New job submitted");
        if frame.event == "run" {
            self.dispatcher.dispatch_immediate(spec).await
        } else {
            self.dispatcher.dispatch_queued(spec).await
        }
    }

    async fn housekeeping(&self, frame: &RequestFrame) -> Result<Value> {
        let req: HousekeepingRequest = frame.payload()?;
        let worker = self.dispatcher.housekeeping(&req.host, req.options).await?;
        encode_reply(&frame.event, &worker)
    }
}

/// Answer `ack` once the job settles, unless the submitter leaves first.
fn answer_when_settled(conn: &Connection, ack: Option<u64>, submission: Submission) {
    let conn = conn.clone();
    let closed = conn.closed();
    let Submission { job_id, outcome } = submission;

    tokio::spawn(async move {
        tokio::select! {
            settled = outcome => {
                let reply = match settled {
                    Ok(Ok(completion)) => encode_reply("completion", &completion).map_err(|e| {
                        tracing::error!(job_id = %job_id, error = %e, "Could not encode job completion");
                        e.to_payload()
                    }),
                    Ok(Err(failure)) => Err(failure.0),
                    // notifier dropped without resolving; the job left the store
                    Err(_) => Err(BrokerError::JobNotFound(job_id.to_string()).to_payload()),
                };
                conn.ack_raw(ack, reply);
            }
            _ = closed.cancelled() => {
                tracing::debug!(job_id = %job_id, conn_id = %conn.id, "Submitter left before job settled");
            }
        }
    });
}

#[async_trait]
impl ChannelHandler for SubmitterChannel {
    fn name(&self) -> &'static str {
        "bus"
    }

    async fn on_event(&self, conn: &Connection, frame: RequestFrame) {
        match frame.event.as_str() {
            "run" | "queue" => match self.submit(conn, &frame).await {
                Ok(submission) => answer_when_settled(conn, frame.ack, submission),
                Err(e) => conn.ack(frame.ack, Err(e)),
            },
            "housekeeping" => {
                let result = self.housekeeping(&frame).await;
                conn.ack(frame.ack, result);
            }
            other => {
                tracing::warn!(conn_id = %conn.id, event = other, "Unknown submitter event");
                conn.ack(frame.ack, Err(BrokerError::UnknownEvent(other.to_string())));
            }
        }
    }
}
