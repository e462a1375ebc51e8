//! Tests for the bounded work queue.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use renderq::fingerprint::Fingerprint;
use renderq::model::{Job, JobId};
use renderq::queue;

fn job(tag: &str) -> Job {
    let fingerprint = Fingerprint::derive(tag.as_bytes());
    Job {
        id: JobId::new(),
        input_path: PathBuf::from(fingerprint.input_name()),
        output_ref: fingerprint.output_name(),
        fingerprint,
        submitted_at: Utc::now(),
    }
}

#[tokio::test]
async fn jobs_come_out_in_arrival_order() {
    let (tx, mut rx) = queue::bounded(10);
    let jobs: Vec<Job> = ["a", "b", "c", "d"].into_iter().map(job).collect();
    let ids: Vec<JobId> = jobs.iter().map(|j| j.id).collect();

    for j in jobs {
        tx.enqueue(j).await.unwrap();
    }
    assert_eq!(tx.len(), 4);

    let mut out = Vec::new();
    for _ in 0..4 {
        out.push(rx.dequeue().await.unwrap().id);
    }
    assert_eq!(out, ids);
    assert!(rx.is_empty());
}

#[tokio::test]
async fn full_queue_blocks_until_a_slot_frees() {
    let (tx, mut rx) = queue::bounded(2);
    tx.enqueue(job("1")).await.unwrap();
    tx.enqueue(job("2")).await.unwrap();
    assert_eq!(tx.len(), tx.capacity());

    let overflow = job("3");
    let overflow_id = overflow.id;
    let producer = {
        let tx = tx.clone();
        tokio::spawn(async move { tx.enqueue(overflow).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!producer.is_finished(), "enqueue should wait on a full queue");

    rx.dequeue().await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), producer)
        .await
        .expect("enqueue should resume after a dequeue")
        .unwrap()
        .unwrap();

    rx.dequeue().await.unwrap();
    assert_eq!(rx.dequeue().await.unwrap().id, overflow_id);
}

#[tokio::test]
async fn enqueue_fails_once_worker_is_gone() {
    let (tx, rx) = queue::bounded(1);
    drop(rx);
    assert!(matches!(
        tx.enqueue(job("orphan")).await,
        Err(renderq::error::Error::QueueClosed)
    ));
}

#[tokio::test]
async fn dequeue_ends_when_all_senders_drop() {
    let (tx, mut rx) = queue::bounded(1);
    drop(tx);
    assert!(rx.dequeue().await.is_none());
}
