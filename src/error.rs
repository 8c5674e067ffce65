use serde_json::{json, Value};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("No Worker Nodes available. name: {name}, host: {host:?}, background: {background}")]
    NoWorkersAvailable {
        name: String,
        host: Option<String>,
        background: bool,
    },

    #[error("Job Not Defined (QUEUE)")]
    JobNotDefined,

    #[error("Job not found with ID {0}")]
    JobNotFound(String),

    #[error("This is not a background job {0}")]
    NotBackgroundJob(String),

    #[error("No running worker node found on server {0}")]
    NoWorkerForHost(String),

    #[error("worker disconnected")]
    WorkerDisconnected,

    #[error("Invalid payload for '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode reply for '{event}': {source}")]
    Encode {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Data store error: {0}")]
    DataStore(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

impl BrokerError {
    /// Wire representation sent back over a channel's ack.
    pub fn to_payload(&self) -> Value {
        json!({ "message": self.to_string() })
    }
}

pub type Result<T> = std::result::Result<T, BrokerError>;
