// tests/leasing.rs
mod common;

use common::{fast_repo, insert_job, setup_db};

use chrono::{Duration as ChronoDuration, Utc};
use notifyq::jobs::{JobQueue, NewJob, Reservation};
use serial_test::serial;
use std::time::Duration;
use tokio::time::{timeout, Instant};

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn two_workers_never_claim_same_job() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    let job = insert_job(&repo).await;

    let repo_a = repo.clone();
    let repo_b = repo.clone();
    let a = tokio::spawn(async move {
        timeout(Duration::from_millis(500), repo_a.reserve("worker-a")).await
    });
    let b = tokio::spawn(async move {
        timeout(Duration::from_millis(500), repo_b.reserve("worker-b")).await
    });

    let (a, b) = (a.await.unwrap(), b.await.unwrap());
    let got_a = a.is_ok();
    let got_b = b.is_ok();

    // XOR: exactly one worker wins, the other keeps polling until timeout
    assert!(
        got_a ^ got_b,
        "expected exactly one worker to claim the job, got_a={got_a}, got_b={got_b}"
    );

    let winner = a.or(b).unwrap().unwrap();
    assert_eq!(winner.id, job.id);
    assert!(winner.version > job.version);

    let stored = repo.get_job(job.id).await.unwrap().unwrap();
    assert!(stored.worker_id == "worker-a" || stored.worker_id == "worker-b");
    assert_eq!(stored.worker_id, winner.worker_id);
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn stale_version_claim_is_a_conflict() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    let job = insert_job(&repo).await;

    // Someone touches the row between our select and our update.
    let mut other = job.clone();
    repo.requeue(&mut other).await.unwrap();

    let mut stale = job.clone();
    let err = repo.requeue(&mut stale).await.unwrap_err();
    assert!(err.is_stale());

    // The fresh version is still claimable.
    match repo.try_reserve("worker-a").await.unwrap() {
        Reservation::Claimed(claimed) => assert_eq!(claimed.version, other.version + 1),
        other => panic!("expected a claim, got {other:?}"),
    }
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn reserve_waits_for_job_inserted_later() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    let started = Instant::now();
    let pending = {
        let repo = repo.clone();
        tokio::spawn(async move { repo.reserve("worker-a").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = insert_job(&repo).await;

    let claimed = timeout(Duration::from_secs(2), pending)
        .await
        .expect("reserve should return within a backoff cycle")
        .unwrap()
        .unwrap();

    assert_eq!(claimed.id, job.id);
    assert_eq!(claimed.worker_id, "worker-a");
    // inserted at ~100ms, one 50ms backoff cycle plus query latency
    assert!(started.elapsed() < Duration::from_millis(1_000));
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn delayed_job_is_not_reserved_before_active_at() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    let job = repo
        .enqueue(NewJob::new("{}").at(Utc::now() + ChronoDuration::seconds(2)))
        .await
        .unwrap();

    assert!(matches!(
        repo.try_reserve("worker-a").await.unwrap(),
        Reservation::Empty
    ));

    tokio::time::sleep(Duration::from_millis(2_200)).await;

    let claimed = repo.reserve("worker-a").await.unwrap();
    assert_eq!(claimed.id, job.id);
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn dequeue_deletes_the_row() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    insert_job(&repo).await;
    let job = repo.reserve("worker-a").await.unwrap();

    assert!(repo.dequeue(&job).await.unwrap());
    assert!(!repo.dequeue(&job).await.unwrap(), "second delete is a no-op");
    assert!(repo.get_job(job.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn reap_only_releases_expired_claims() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    insert_job(&repo).await;
    insert_job(&repo).await;

    let mut dead = repo.reserve("dead-worker").await.unwrap();
    let live = repo.reserve("live-worker").await.unwrap();

    dead.active_at = Utc::now() - ChronoDuration::minutes(5);
    repo.requeue(&mut dead).await.unwrap();

    let reaped = repo.reap_expired(Duration::from_secs(60)).await.unwrap();
    assert_eq!(reaped, 1, "only the stale claim should be reaped");

    let dead_row = repo.get_job(dead.id).await.unwrap().unwrap();
    assert_eq!(dead_row.worker_id, "");
    assert!(dead_row.version > dead.version);

    let live_row = repo.get_job(live.id).await.unwrap().unwrap();
    assert_eq!(live_row.worker_id, "live-worker");

    let again = repo.reserve("worker-c").await.unwrap();
    assert_eq!(again.id, dead.id);
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn complete_leaves_a_reclaimed_row_alone() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    insert_job(&repo).await;
    let mut first = repo.reserve("worker-a").await.unwrap();
    first.active_at = Utc::now() - ChronoDuration::minutes(5);
    repo.requeue(&mut first).await.unwrap();
    assert_eq!(repo.reap_expired(Duration::from_secs(60)).await.unwrap(), 1);

    let second = repo.reserve("worker-b").await.unwrap();
    assert_eq!(second.id, first.id);

    assert!(!repo.complete(&first).await.unwrap(), "stale owner must not delete");
    let row = repo.get_job(first.id).await.unwrap().unwrap();
    assert_eq!(row.worker_id, "worker-b");

    assert!(repo.complete(&second).await.unwrap());
    assert!(repo.get_job(first.id).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn oversized_lease_is_capped_not_rejected() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    insert_job(&repo).await;
    let job = repo.reserve("worker-a").await.unwrap();

    assert_eq!(repo.reap_expired(Duration::MAX).await.unwrap(), 0);
    let row = repo.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(row.worker_id, "worker-a");
}

#[tokio::test]
#[serial]
#[ignore = "needs TEST_DATABASE_URL"]
async fn gauges_report_depth_and_retry_counts() {
    let pool = setup_db().await;
    let repo = fast_repo(&pool, Duration::from_millis(50));

    for _ in 0..3 {
        insert_job(&repo).await;
    }
    let mut job = repo.reserve("worker-a").await.unwrap();
    job.retry(Duration::from_secs(60));
    repo.requeue(&mut job).await.unwrap();

    let gauges = repo.gauges().await.unwrap();
    assert_eq!(gauges.depth, 3);
    assert_eq!(gauges.retry_counts.get(&0), Some(&2));
    assert_eq!(gauges.retry_counts.get(&1), Some(&1));
}
