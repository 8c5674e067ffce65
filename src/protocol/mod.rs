//! Connection-facing side of the broker.
//!
//! Three logical channels share one framing ([`messages`]) and one
//! connection loop ([`server::serve_socket`]):
//!
//! - `/worker`: worker registration, pulls, progress and status reports
//! - `/bus`: job submission and housekeeping requests
//! - `/db`: opaque pass-through to a [`DataStore`](crate::datastore::DataStore)

pub mod connections;
pub mod data_channel;
pub mod messages;
pub mod server;
pub mod submitter_channel;
pub mod worker_channel;

pub use connections::{Connection, ConnectionManager};
pub use server::{router, BrokerServer, ServerState};
