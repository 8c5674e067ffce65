//! One-shot bridge between a worker report and the submitter waiting on it.
//!
//! Each job owns exactly one [`CompletionNotifier`]. The submitter holds the
//! matching receiver; whichever path resolves first (worker `done`, worker
//! `background-in-progress`, or grace-period eviction) wins and every later
//! attempt is a no-op.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::BrokerError;
use crate::scheduler::job::Completion;

/// Failure payload delivered to a submitter. Worker-reported errors are
/// passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobFailure(pub Value);

impl From<BrokerError> for JobFailure {
    fn from(err: BrokerError) -> Self {
        JobFailure(err.to_payload())
    }
}

pub type JobOutcome = Result<Completion, JobFailure>;

/// Receiving half handed to the submitter.
pub type OutcomeReceiver = oneshot::Receiver<JobOutcome>;

#[derive(Debug)]
pub struct CompletionNotifier {
    resolved: AtomicBool,
    slot: Mutex<Option<oneshot::Sender<JobOutcome>>>,
}

impl CompletionNotifier {
    pub fn new() -> (Arc<Self>, OutcomeReceiver) {
        let (tx, rx) = oneshot::channel();
        let notifier = Arc::new(Self {
            resolved: AtomicBool::new(false),
            slot: Mutex::new(Some(tx)),
        });
        (notifier, rx)
    }

    /// Returns true if this call delivered the outcome.
    pub fn resolve_success(&self, completion: Completion) -> bool {
        self.resolve(Ok(completion))
    }

    /// Returns true if this call delivered the outcome.
    pub fn resolve_failure(&self, failure: JobFailure) -> bool {
        self.resolve(Err(failure))
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.load(Ordering::Acquire)
    }

    fn resolve(&self, outcome: JobOutcome) -> bool {
        if self
            .resolved
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    // Submitter went away; the job is still considered settled.
                    tracing::debug!("Submitter no longer waiting for job outcome");
                }
                true
            }
            None => false,
        }
    }
}
