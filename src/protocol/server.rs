use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::datastore::DataStore;
use crate::protocol::connections::{Connection, ConnectionManager};
use crate::protocol::data_channel::DataChannel;
use crate::protocol::messages::{EventFrame, RequestFrame, CONNECT_EVENT};
use crate::protocol::submitter_channel::SubmitterChannel;
use crate::protocol::worker_channel::WorkerChannel;
use crate::scheduler::registry::ConnectionId;
use crate::scheduler::Dispatcher;

/// Maps inbound events of one logical channel to broker operations.
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    /// Channel name used in logs.
    fn name(&self) -> &'static str;

    async fn on_event(&self, conn: &Connection, frame: RequestFrame);

    async fn on_disconnect(&self, _conn: &Connection) {}
}

#[derive(Clone)]
pub struct ServerState {
    pub worker_connections: ConnectionManager,
    pub submitter_connections: ConnectionManager,
    pub data_connections: ConnectionManager,
    pub worker_channel: Arc<WorkerChannel>,
    pub submitter_channel: Arc<SubmitterChannel>,
    pub data_channel: Arc<DataChannel>,
}

impl ServerState {
    pub fn new(
        config: Arc<BrokerConfig>,
        dispatcher: Dispatcher,
        worker_connections: ConnectionManager,
        data_store: Arc<dyn DataStore>,
    ) -> Self {
        Self {
            worker_connections,
            submitter_connections: ConnectionManager::new(),
            data_connections: ConnectionManager::new(),
            worker_channel: Arc::new(WorkerChannel::new(dispatcher.clone(), config)),
            submitter_channel: Arc::new(SubmitterChannel::new(dispatcher)),
            data_channel: Arc::new(DataChannel::new(data_store)),
        }
    }
}

pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/worker", get(worker_ws))
        .route("/bus", get(submitter_ws))
        .route("/db", get(data_ws))
        .route("/health", get(health_check))
        .with_state(state)
}

async fn worker_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| {
        serve_socket(socket, state.worker_connections, state.worker_channel)
    })
}

async fn submitter_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| {
        serve_socket(socket, state.submitter_connections, state.submitter_channel)
    })
}

async fn data_ws(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state.data_connections, state.data_channel))
}

async fn health_check() -> &'static str {
    "OK"
}

/// Drive one WebSocket connection until the peer goes away.
///
/// Inbound requests are handled one at a time, in arrival order.
pub async fn serve_socket<H: ChannelHandler>(
    socket: WebSocket,
    connections: ConnectionManager,
    handler: Arc<H>,
) {
    let conn_id = ConnectionId::generate();
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();

    let writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    let closed = CancellationToken::new();
    let conn = Connection::new(conn_id.clone(), tx.clone(), closed.clone());
    connections.register(conn_id.clone(), tx).await;
    conn.push(&EventFrame::new(CONNECT_EVENT, json!({ "id": conn_id })));
    tracing::debug!(channel = handler.name(), conn_id = %conn_id, "Connection accepted");

    while let Some(msg) = stream.next().await {
        match msg {
            Ok(Message::Text(text)) => match serde_json::from_str::<RequestFrame>(&text) {
                Ok(frame) => handler.on_event(&conn, frame).await,
                Err(e) => {
                    tracing::warn!(channel = handler.name(), conn_id = %conn_id, error = %e, "Unparsable frame");
                }
            },
            Ok(Message::Close(_)) => break,
            Err(e) => {
                tracing::warn!(channel = handler.name(), conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    connections.unregister(&conn_id).await;
    closed.cancel();
    handler.on_disconnect(&conn).await;
    writer.abort();
    tracing::debug!(channel = handler.name(), conn_id = %conn_id, "Connection closed");
}

/// WebSocket front of the broker.
pub struct BrokerServer {
    addr: SocketAddr,
    state: ServerState,
}

impl BrokerServer {
    pub fn new(addr: SocketAddr, state: ServerState) -> Self {
        Self { addr, state }
    }

    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Serve on an already bound listener.
    pub async fn serve(
        self,
        listener: tokio::net::TcpListener,
        shutdown: CancellationToken,
    ) -> std::io::Result<()> {
        tracing::info!(addr = %listener.local_addr()?, "Event bus listening");
        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
    }
}
