//! Bounded FIFO work queue.
//!
//! A thin wrapper over a bounded `tokio::sync::mpsc` channel. A full queue
//! makes `enqueue` wait; that wait is the only backpressure in the system.

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::model::Job;

/// Default number of jobs the queue holds before producers wait.
pub const DEFAULT_CAPACITY: usize = 100;

/// Create a queue with room for `capacity` jobs.
pub fn bounded(capacity: usize) -> (JobSender, JobReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (JobSender { tx }, JobReceiver { rx })
}

/// Producer half. Cheap to clone.
#[derive(Debug, Clone)]
pub struct JobSender {
    tx: mpsc::Sender<Job>,
}

impl JobSender {
    /// Append a job, waiting for space if the queue is full.
    ///
    /// Fails only when the worker side has been dropped.
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        let id = job.id;
        self.tx.send(job).await.map_err(|_| Error::QueueClosed)?;
        debug!(job_id = %id, depth = self.len(), "job enqueued");
        Ok(())
    }

    /// Jobs currently waiting.
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer half. Owned by the single worker.
#[derive(Debug)]
pub struct JobReceiver {
    rx: mpsc::Receiver<Job>,
}

impl JobReceiver {
    /// Wait for the next job. `None` once every sender is gone.
    pub async fn dequeue(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
