use std::net::SocketAddr;
use std::time::Duration;

use crate::scheduler::queue::DEFAULT_RETENTION_HOURS;

/// Seconds a disconnected worker has to re-register before its jobs fail.
pub const DEFAULT_RECONNECT_GRACE_SECS: u64 = 60;

/// Prefix of environment variables shared with workers on registration.
pub const DEFAULT_ENV_PREFIX: &str = "CICD_";

/// Broker-local settings that are never shared with workers.
pub const DEFAULT_ENV_DENY_LIST: &[&str] = &[
    "CICD_GULP_HOST_FQDN",
    "CICD_EB_HOST_NAME",
    "CICD_EB_HOST_PORT",
    "CICD_EB_HOST_CLIENT_KEY",
    "CICD_EB_HOST_CLIENT_CERT",
    "CICD_EB_HOST_CLIENT_CA",
    "CICD_EB_WORKER_CLUSTER_NUM",
    "CICD_DB_MONGO_URL",
];

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Address of the WebSocket endpoints (`/worker`, `/bus`, `/db`).
    pub listen_addr: SocketAddr,
    /// Address of the read-only HTTP inspection API, if enabled.
    pub dashboard_addr: Option<SocketAddr>,
    pub reconnect_grace: Duration,
    pub queue_retention: chrono::Duration,
    pub env_prefix: String,
    pub env_deny_list: Vec<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 4443)),
            dashboard_addr: None,
            reconnect_grace: Duration::from_secs(DEFAULT_RECONNECT_GRACE_SECS),
            queue_retention: chrono::Duration::hours(DEFAULT_RETENTION_HOURS),
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            env_deny_list: DEFAULT_ENV_DENY_LIST
                .iter()
                .map(|name| name.to_string())
                .collect(),
        }
    }
}

impl BrokerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_dashboard(mut self, addr: SocketAddr) -> Self {
        self.dashboard_addr = Some(addr);
        self
    }

    pub fn with_reconnect_grace(mut self, grace: Duration) -> Self {
        self.reconnect_grace = grace;
        self
    }

    pub fn with_queue_retention(mut self, retention: chrono::Duration) -> Self {
        self.queue_retention = retention;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_config_default() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.listen_addr.to_string(), "0.0.0.0:4443");
        assert!(cfg.dashboard_addr.is_none());
        assert_eq!(cfg.reconnect_grace, Duration::from_secs(60));
        assert_eq!(cfg.queue_retention, chrono::Duration::hours(12));
        assert_eq!(cfg.env_prefix, "CICD_");
        assert_eq!(cfg.env_deny_list.len(), 8);
        assert!(cfg.env_deny_list.iter().any(|n| n == "CICD_DB_MONGO_URL"));
    }

    #[test]
    fn broker_config_new() {
        let addr: SocketAddr = "10.0.0.1:9000".parse().unwrap();
        let cfg = BrokerConfig::new(addr);
        assert_eq!(cfg.listen_addr, addr);
        assert_eq!(cfg.reconnect_grace, Duration::from_secs(60));
    }

    #[test]
    fn broker_config_builders() {
        let dashboard: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let cfg = BrokerConfig::default()
            .with_dashboard(dashboard)
            .with_reconnect_grace(Duration::from_secs(5))
            .with_queue_retention(chrono::Duration::minutes(1));
        assert_eq!(cfg.dashboard_addr, Some(dashboard));
        assert_eq!(cfg.reconnect_grace, Duration::from_secs(5));
        assert_eq!(cfg.queue_retention, chrono::Duration::minutes(1));
    }
}
