//! Environment propagation to workers.
//!
//! On registration a worker receives the broker's environment variables that
//! carry the configured prefix, minus the broker-local deny list.

use std::collections::BTreeMap;

use crate::config::BrokerConfig;

/// Filter `vars` down to what a worker should inherit.
pub fn shared_env<I>(vars: I, prefix: &str, deny_list: &[String]) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (String, String)>,
{
    vars.into_iter()
        .filter(|(name, _)| name.starts_with(prefix) && !deny_list.iter().any(|d| d == name))
        .collect()
}

/// Variables of the current process to share with workers.
pub fn worker_env(config: &BrokerConfig) -> BTreeMap<String, String> {
    shared_env(std::env::vars(), &config.env_prefix, &config.env_deny_list)
}
