//! WebSocket client for the broker's channels.
//!
//! Used by the `jobbus job` commands and by the integration tests to play
//! the part of submitters and workers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::{BrokerError, Result};
use crate::protocol::messages::{
    AckFrame, ConnectPayload, EventFrame, InboundFrame, RequestFrame, CONNECT_EVENT,
};
use crate::scheduler::registry::ConnectionId;

type PendingAcks = Arc<Mutex<HashMap<u64, oneshot::Sender<AckFrame>>>>;

pub struct BusClient {
    /// Connection id assigned by the broker.
    pub id: ConnectionId,
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingAcks,
    next_ack: AtomicU64,
    events: Mutex<mpsc::UnboundedReceiver<EventFrame>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl BusClient {
    /// Connect to a channel URL such as `ws://127.0.0.1:4443/bus` and wait
    /// for the broker to announce the connection id.
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url)
            .await
            .map_err(|e| BrokerError::Connection(format!("{}: {}", url, e)))?;
        let (mut sink, mut stream) = socket.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
        });

        let pending: PendingAcks = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<EventFrame>();
        let reader_pending = pending.clone();
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                let Message::Text(text) = msg else {
                    continue;
                };
                match serde_json::from_str::<InboundFrame>(&text) {
                    Ok(InboundFrame::Ack(ack)) => {
                        if let Some(tx) = reader_pending.lock().await.remove(&ack.ack) {
                            let _ = tx.send(ack);
                        }
                    }
                    Ok(InboundFrame::Event(event)) => {
                        let _ = events_tx.send(event);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Unparsable frame from broker");
                    }
                }
            }
            // dropping the senders fails every outstanding request
            reader_pending.lock().await.clear();
        });

        let id = match events_rx.recv().await {
            Some(frame) if frame.event == CONNECT_EVENT => {
                serde_json::from_value::<ConnectPayload>(frame.data)
                    .map_err(|source| BrokerError::InvalidPayload {
                        event: CONNECT_EVENT.to_string(),
                        source,
                    })?
                    .id
            }
            Some(frame) => {
                return Err(BrokerError::Connection(format!(
                    "expected {} event, got {}",
                    CONNECT_EVENT, frame.event
                )))
            }
            None => return Err(BrokerError::Connection("closed before connect".to_string())),
        };

        Ok(Self {
            id,
            outbound,
            pending,
            next_ack: AtomicU64::new(1),
            events: Mutex::new(events_rx),
            reader,
            writer,
        })
    }

    /// Send a request and wait for its answer. The outer error covers
    /// transport failures; the inner one is the broker's error payload.
    pub async fn request(&self, event: &str, data: Value) -> Result<std::result::Result<Value, Value>> {
        let ack = self.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(ack, tx);

        self.send(RequestFrame {
            event: event.to_string(),
            ack: Some(ack),
            data,
        })?;

        let answer = rx
            .await
            .map_err(|_| BrokerError::Connection(format!("closed while waiting for {}", event)))?;
        Ok(match answer.error {
            Some(error) => Err(error),
            None => Ok(answer.result.unwrap_or(Value::Null)),
        })
    }

    /// Send a request without asking for an answer.
    pub fn emit(&self, event: &str, data: Value) -> Result<()> {
        self.send(RequestFrame {
            event: event.to_string(),
            ack: None,
            data,
        })
    }

    /// Next event pushed by the broker, or `None` once the connection is gone.
    pub async fn next_event(&self) -> Option<EventFrame> {
        self.events.lock().await.recv().await
    }

    /// Close the connection as a client going away would.
    pub async fn close(mut self) {
        let _ = self.outbound.send(Message::Close(None));
        // wait for the broker to echo the close
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), &mut self.reader).await;
    }

    fn send(&self, frame: RequestFrame) -> Result<()> {
        let text = serde_json::to_string(&frame).map_err(|source| BrokerError::InvalidPayload {
            event: frame.event.clone(),
            source,
        })?;
        self.outbound
            .send(Message::Text(text))
            .map_err(|_| BrokerError::Connection("connection closed".to_string()))
    }
}

impl Drop for BusClient {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}
