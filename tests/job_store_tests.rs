use std::sync::Arc;

use open_scheduler::scheduler::job::{InstanceTelemetry, Job, JobRecord, JobState, JobType};
use open_scheduler::storage::{JobStore, MemoryKv};

fn new_store() -> JobStore {
    JobStore::new(Arc::new(MemoryKv::new()))
}

#[tokio::test]
async fn test_enqueue_then_dequeue_head() {
    let store = new_store();
    let job = Job::new("build", JobType::Batch);
    let job_id = job.job_id.clone();

    store.enqueue(&job).await.unwrap();
    assert_eq!(store.queue_len().await.unwrap(), 1);

    let dequeued = store.dequeue_head().await.unwrap().unwrap();
    assert_eq!(dequeued.job_id, job_id);
    assert_eq!(store.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_dequeue_empty_queue_returns_none() {
    let store = new_store();
    assert!(store.dequeue_head().await.unwrap().is_none());
}

#[tokio::test]
async fn test_dequeue_takes_lexicographically_smallest_key() {
    let store = new_store();

    let mut first = Job::new("a", JobType::Single);
    first.job_id = "aaaa".to_string();
    let mut second = Job::new("b", JobType::Single);
    second.job_id = "bbbb".to_string();

    store.enqueue(&second).await.unwrap();
    store.enqueue(&first).await.unwrap();

    let head = store.dequeue_head().await.unwrap().unwrap();
    assert_eq!(head.job_id, "aaaa");
}

#[tokio::test]
async fn test_concurrent_dequeue_yields_single_winner() {
    let store = new_store();
    let job = Job::new("contested", JobType::Batch);
    store.enqueue(&job).await.unwrap();

    let (a, b) = tokio::join!(store.dequeue_head(), store.dequeue_head());
    let a = a.unwrap();
    let b = b.unwrap();

    assert!(a.is_some() != b.is_some(), "exactly one caller should win the head");
    assert_eq!(store.queue_len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_duplicate_events_are_suppressed() {
    let store = new_store();

    store.append_event("j1", "Status: running - ok").await.unwrap();
    store.append_event("j1", "Status: running - ok").await.unwrap();
    assert_eq!(store.events("j1").await.unwrap().len(), 1);

    store.append_event("j1", "Status: completed - done").await.unwrap();
    assert_eq!(store.events("j1").await.unwrap().len(), 2);

    // Only consecutive duplicates are suppressed.
    store.append_event("j1", "Status: running - ok").await.unwrap();
    assert_eq!(store.events("j1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_events_read_back_in_append_order() {
    let store = new_store();

    store.append_event("j1", "first").await.unwrap();
    store.append_event("j1", "second").await.unwrap();
    store.append_event("j1", "third").await.unwrap();

    let events = store.events("j1").await.unwrap();
    assert_eq!(events.len(), 3);
    assert!(events[0].ends_with("] first"));
    assert!(events[1].ends_with("] second"));
    assert!(events[2].ends_with("] third"));
}

#[tokio::test]
async fn test_events_are_scoped_per_job() {
    let store = new_store();

    store.append_event("j1", "a message").await.unwrap();
    store.append_event("j2", "a message").await.unwrap();

    assert_eq!(store.events("j1").await.unwrap().len(), 1);
    assert_eq!(store.events("j2").await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_lives_in_one_collection_at_a_time() {
    let store = new_store();
    let job = Job::new("lifecycle", JobType::Batch);
    let job_id = job.job_id.clone();

    store.enqueue(&job).await.unwrap();
    assert_eq!(store.queue_len().await.unwrap(), 1);
    assert_eq!(store.active_len().await.unwrap(), 0);

    let job = store.dequeue_head().await.unwrap().unwrap();
    let record = JobRecord::assigned(job, "node-1");
    store.put_active(&job_id, &record).await.unwrap();
    assert_eq!(store.queue_len().await.unwrap(), 0);
    assert_eq!(store.active_len().await.unwrap(), 1);

    let mut record = store.get_active(&job_id).await.unwrap().unwrap();
    record.state = JobState::Completed;
    store.put_history(&job_id, &record).await.unwrap();
    store.delete_active(&job_id).await.unwrap();

    assert_eq!(store.queue_len().await.unwrap(), 0);
    assert_eq!(store.active_len().await.unwrap(), 0);
    assert_eq!(store.history_len().await.unwrap(), 1);
}

#[tokio::test]
async fn test_all_queued_lists_jobs_in_key_order() {
    let store = new_store();

    let mut first = Job::new("a", JobType::Single);
    first.job_id = "aaaa".to_string();
    let mut second = Job::new("b", JobType::Single);
    second.job_id = "bbbb".to_string();

    store.enqueue(&second).await.unwrap();
    store.enqueue(&first).await.unwrap();

    let queued = store.all_queued().await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].job_id, "aaaa");
    assert_eq!(queued[1].job_id, "bbbb");
}

#[tokio::test]
async fn test_fail_queue_round_trip() {
    let store = new_store();
    let job = Job::new("flaky", JobType::Batch);
    let job_id = job.job_id.clone();

    store.enqueue_failed(&job).await.unwrap();
    let failed = store.all_failed().await.unwrap();
    assert_eq!(failed.len(), 1);
    assert!(failed.contains_key(&job_id));

    store.delete_failed(&job_id).await.unwrap();
    assert!(store.all_failed().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_telemetry_listing_recovers_job_ids() {
    let store = new_store();

    let data = InstanceTelemetry {
        instance_id: "abc123".to_string(),
        instance_name: "osched-j1".to_string(),
        status: "running".to_string(),
        ..Default::default()
    };
    store.put_telemetry("j1", &data).await.unwrap();

    let fetched = store.get_telemetry("j1").await.unwrap().unwrap();
    assert_eq!(fetched.instance_id, "abc123");

    let listed = store.list_telemetry().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].0, "j1");
    assert_eq!(listed[0].1.status, "running");
}
