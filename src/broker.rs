use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::datastore::DataStore;
use crate::protocol::{BrokerServer, ConnectionManager, ServerState};
use crate::scheduler::Dispatcher;

/// The event bus process: dispatcher, protocol endpoints and the optional
/// inspection API wired together.
pub struct Broker {
    pub config: Arc<BrokerConfig>,
    pub dispatcher: Dispatcher,
    state: ServerState,
}

impl Broker {
    pub fn new(config: BrokerConfig, data_store: Arc<dyn DataStore>) -> Self {
        let config = Arc::new(config);
        let worker_connections = ConnectionManager::new();
        let dispatcher = Dispatcher::new(Arc::new(worker_connections.clone()), &config);
        let state = ServerState::new(
            config.clone(),
            dispatcher.clone(),
            worker_connections,
            data_store,
        );

        Self {
            config,
            dispatcher,
            state,
        }
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// The dashboard, when configured, runs as a spawned task and logs its
    /// own failures; the WebSocket server runs on the calling task.
    ///
    /// # Errors
    ///
    /// Returns an error if the listen address cannot be bound.
    pub async fn run(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        self.serve(listener, shutdown).await
    }

    /// Like [`Broker::run`] but on an already bound listener.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> std::io::Result<()> {
        if let Some(dashboard_addr) = self.config.dashboard_addr {
            let dashboard_state = DashboardState {
                dispatcher: self.dispatcher.clone(),
            };
            let dashboard_shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_dashboard(dashboard_addr, dashboard_state, dashboard_shutdown).await;
            });
        }

        tracing::info!(
            listen_addr = %self.config.listen_addr,
            dashboard_addr = ?self.config.dashboard_addr,
            reconnect_grace_secs = self.config.reconnect_grace.as_secs(),
            "Starting event bus"
        );

        BrokerServer::new(self.config.listen_addr, self.state)
            .serve(listener, shutdown)
            .await
    }
}
