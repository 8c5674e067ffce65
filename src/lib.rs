pub mod broker;
pub mod client;
pub mod config;
pub mod dashboard;
pub mod datastore;
pub mod env;
pub mod error;
pub mod protocol;
pub mod scheduler;
pub mod shutdown;
