pub mod dispatcher;
pub mod job;
pub mod notifier;
pub mod queue;
pub mod registry;

pub use dispatcher::{Dispatcher, Submission, WorkerOutbox, WorkerPush};
pub use job::{Completion, JobRecord, JobSpec, JobStatus, JobSummary, JobType, WorkerReport};
pub use notifier::{CompletionNotifier, JobFailure, JobOutcome};
pub use queue::QueueStore;
pub use registry::{ConnectionId, WorkerNode, WorkerRegistry, WorkerStatus};
