//! Grace-period handling of worker disconnects, on a paused clock.

mod test_harness;

use std::time::Duration;

use serde_json::json;
use tokio::sync::oneshot::error::TryRecvError;

use jobbus::config::BrokerConfig;
use jobbus::scheduler::{ConnectionId, JobFailure, JobSpec, JobStatus};
use test_harness::{reconnection, registration, success_report, test_dispatcher};

const GRACE: Duration = Duration::from_secs(60);

fn config() -> BrokerConfig {
    BrokerConfig::default().with_reconnect_grace(GRACE)
}

fn conn(id: &str) -> ConnectionId {
    ConnectionId::from(id)
}

#[tokio::test(start_paused = true)]
async fn test_jobs_fail_when_worker_does_not_return() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;

    let mut submission = dispatcher
        .dispatch_immediate(JobSpec::new("compile"))
        .await
        .unwrap();

    let timer = dispatcher.worker_disconnected(&conn("a")).await.unwrap();
    tokio::task::yield_now().await;

    tokio::time::advance(GRACE - Duration::from_secs(1)).await;
    assert!(matches!(submission.outcome.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(dispatcher.list_workers().await.len(), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    timer.await.unwrap();

    let JobFailure(payload) = submission.outcome.try_recv().unwrap().unwrap_err();
    assert_eq!(payload, json!({ "message": "worker disconnected" }));

    let job = dispatcher.get_job(&submission.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.completed.is_some());
    assert!(dispatcher.list_workers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_within_grace_keeps_jobs_alive() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;

    let submission = dispatcher
        .dispatch_immediate(JobSpec::new("compile"))
        .await
        .unwrap();

    let timer = dispatcher.worker_disconnected(&conn("a")).await.unwrap();
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_secs(30)).await;

    let worker = dispatcher
        .register_worker(reconnection("a2", "a", "build-01"))
        .await;
    assert_eq!(worker.id, conn("a2"));
    assert!(!worker.disconnected);
    assert_eq!(worker.assigned_executions, 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    timer.await.unwrap();

    let workers = dispatcher.list_workers().await;
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].id, conn("a2"));

    let job = dispatcher.get_job(&submission.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Running);

    dispatcher
        .report_done(&conn("a2"), success_report(submission.job_id, json!("ok")))
        .await
        .unwrap();
    let completion = submission.outcome.await.unwrap().unwrap();
    assert_eq!(completion.status, JobStatus::Complete);
}

#[tokio::test(start_paused = true)]
async fn test_claimed_queue_job_fails_with_its_worker() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;

    let claimed = dispatcher.dispatch_queued(JobSpec::new("nightly")).await.unwrap();
    let waiting = dispatcher.dispatch_queued(JobSpec::new("later")).await.unwrap();
    dispatcher.claim_next(&conn("a"), None).await.unwrap();

    let timer = dispatcher.worker_disconnected(&conn("a")).await.unwrap();
    timer.await.unwrap();

    let JobFailure(payload) = claimed.outcome.await.unwrap().unwrap_err();
    assert_eq!(payload["message"], "worker disconnected");

    let pending = dispatcher.get_job(&waiting.job_id).await.unwrap();
    assert_eq!(pending.status, JobStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn test_background_job_failure_is_not_sent_to_submitter() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;

    let mut submission = dispatcher
        .dispatch_immediate(JobSpec::new("soak").background())
        .await
        .unwrap();

    let evicted = dispatcher.evict_if_not_reconnected(&conn("a")).await;
    assert_eq!(evicted, 1);

    let job = dispatcher.get_job(&submission.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(!job.notifier.is_resolved());
    assert!(matches!(submission.outcome.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_eviction_of_reconnected_worker_is_a_no_op() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;
    dispatcher.worker_disconnected(&conn("a")).await.unwrap().abort();
    dispatcher
        .register_worker(reconnection("b", "a", "build-01"))
        .await;

    assert_eq!(dispatcher.evict_if_not_reconnected(&conn("a")).await, 0);
    assert_eq!(dispatcher.list_connected_workers().await.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_housekeeping_reaches_worker_inside_grace_period() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;
    dispatcher.worker_disconnected(&conn("a")).await.unwrap().abort();

    let worker = dispatcher.housekeeping("build-01", json!({})).await.unwrap();
    assert_eq!(worker.id, conn("a"));
    assert!(worker.disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_worker_dropping_again_after_reconnect_fails_its_jobs() {
    let (dispatcher, _outbox) = test_dispatcher(&config());
    dispatcher.register_worker(registration("a", "build-01")).await;

    let mut submission = dispatcher
        .dispatch_immediate(JobSpec::new("compile"))
        .await
        .unwrap();

    let first_timer = dispatcher.worker_disconnected(&conn("a")).await.unwrap();
    tokio::task::yield_now().await;
    tokio::time::advance(Duration::from_secs(30)).await;

    dispatcher
        .register_worker(reconnection("a2", "a", "build-01"))
        .await;
    let job = dispatcher.get_job(&submission.job_id).await.unwrap();
    assert_eq!(job.run_by_client, Some(conn("a2")));

    tokio::time::advance(Duration::from_secs(31)).await;
    first_timer.await.unwrap();
    assert!(matches!(submission.outcome.try_recv(), Err(TryRecvError::Empty)));

    let second_timer = dispatcher.worker_disconnected(&conn("a2")).await.unwrap();
    tokio::task::yield_now().await;
    tokio::time::advance(GRACE + Duration::from_secs(1)).await;
    second_timer.await.unwrap();

    let JobFailure(payload) = submission.outcome.try_recv().unwrap().unwrap_err();
    assert_eq!(payload, json!({ "message": "worker disconnected" }));

    let job = dispatcher.get_job(&submission.job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(dispatcher.list_workers().await.is_empty());
}
