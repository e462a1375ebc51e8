//! Process-wide service object.
//!
//! Owns the dedup cache, the correlation registry, the table of jobs that
//! are waiting for their channel or in flight, and the producer half of the
//! work queue. Each table has its own lock; none is held across an
//! `.await` and no two are held at once. Handlers and the worker share it as `Arc<Service>`.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::cache::DedupCache;
use crate::config::Config;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::model::{Job, JobId, JobTicket, SubmitOutcome};
use crate::queue::{self, JobReceiver, JobSender};
use crate::registry::CorrelationRegistry;
use crate::telemetry::metrics;

/// URL prefix under which rendered outputs are served.
pub const OUTPUT_ROUTE: &str = "/output";

/// What [`Service::activate`] did with a job id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    /// Moved from pending onto the work queue.
    Queued,
    /// Already queued or rendering; an earlier channel activated it.
    AlreadyActive,
    /// Never issued, expired before its channel arrived, or finished.
    Unknown,
}

/// Jobs the service still knows about, under one lock so an id is never
/// seen in neither set while it moves from one to the other.
#[derive(Debug, Default)]
struct JobTable {
    /// Accepted jobs whose client has not registered a channel yet.
    pending: HashMap<JobId, Job>,
    /// Queued or rendering.
    active: HashSet<JobId>,
}

pub struct Service {
    cache: DedupCache,
    registry: CorrelationRegistry,
    jobs: Mutex<JobTable>,
    queue: JobSender,
    uploads_dir: PathBuf,
    output_dir: PathBuf,
    pending_ttl: Duration,
}

impl Service {
    /// Create the data directories, load the dedup cache and build the
    /// service. The returned receiver belongs to the worker.
    ///
    /// A corrupt cache file is the one fatal startup error.
    pub fn start(config: &Config) -> Result<(Arc<Self>, JobReceiver)> {
        std::fs::create_dir_all(config.uploads_dir())?;
        std::fs::create_dir_all(config.output_dir())?;
        let cache = DedupCache::load(config.cache_path())?;
        Ok(Self::with_cache(cache, config))
    }

    /// Build a service around an already loaded cache.
    pub fn with_cache(cache: DedupCache, config: &Config) -> (Arc<Self>, JobReceiver) {
        let (tx, rx) = queue::bounded(config.queue_capacity);
        let service = Self {
            cache,
            registry: CorrelationRegistry::new(),
            jobs: Mutex::new(JobTable::default()),
            queue: tx,
            uploads_dir: config.uploads_dir(),
            output_dir: config.output_dir(),
            pending_ttl: config.pending_ttl(),
        };
        (Arc::new(service), rx)
    }

    pub fn cache(&self) -> &DedupCache {
        &self.cache
    }

    pub fn registry(&self) -> &CorrelationRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &JobSender {
        &self.queue
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn output_path(&self, output_ref: &str) -> PathBuf {
        self.output_dir.join(output_ref)
    }

    /// Public link for an output reference.
    pub fn output_link(output_ref: &str) -> String {
        format!("{OUTPUT_ROUTE}/{output_ref}")
    }

    /// Accept uploaded content.
    ///
    /// A cache hit returns the stored output and creates nothing. A miss
    /// persists the bytes, creates a job and parks it until the client's
    /// channel registers (see [`Service::activate`]).
    pub async fn submit(&self, bytes: &[u8]) -> Result<SubmitOutcome> {
        let fingerprint = Fingerprint::derive(bytes);

        if let Some(output) = self.cache.lookup(&fingerprint) {
            info!(fingerprint = %fingerprint, output = %output, "dedup cache hit");
            count_submission("cached");
            return Ok(SubmitOutcome::Cached {
                fingerprint,
                output,
            });
        }

        let input_path = self.uploads_dir.join(fingerprint.input_name());
        if let Err(e) = tokio::fs::write(&input_path, bytes).await {
            warn!(path = %input_path.display(), error = %e, "failed to persist upload");
            count_submission("error");
            return Err(e.into());
        }

        self.prune_expired();

        let job = Job {
            id: JobId::new(),
            output_ref: fingerprint.output_name(),
            fingerprint,
            input_path,
            submitted_at: Utc::now(),
        };
        let ticket = JobTicket::from(&job);
        info!(job_id = %job.id, fingerprint = %job.fingerprint, "job accepted, awaiting channel");
        self.lock_jobs().pending.insert(job.id, job);
        count_submission("accepted");

        Ok(SubmitOutcome::Accepted(ticket))
    }

    /// Move a pending job onto the work queue.
    ///
    /// Called once the job's channel has registered. Waits while the queue
    /// is full.
    pub async fn activate(&self, job_id: &JobId) -> Result<Activation> {
        let job = {
            let mut jobs = self.lock_jobs();
            match jobs.pending.remove(job_id) {
                Some(job) => {
                    jobs.active.insert(*job_id);
                    job
                }
                None if jobs.active.contains(job_id) => {
                    debug!(job_id = %job_id, "job already active");
                    return Ok(Activation::AlreadyActive);
                }
                None => {
                    debug!(job_id = %job_id, "no pending or active job with this id");
                    return Ok(Activation::Unknown);
                }
            }
        };
        if let Err(e) = self.queue.enqueue(job).await {
            self.lock_jobs().active.remove(job_id);
            return Err(e);
        }
        info!(job_id = %job_id, "job queued");
        Ok(Activation::Queued)
    }

    /// Forget a job the worker is done with. Later activations of its id
    /// report [`Activation::Unknown`].
    pub fn finish(&self, job_id: &JobId) {
        self.lock_jobs().active.remove(job_id);
    }

    pub fn pending_len(&self) -> usize {
        self.lock_jobs().pending.len()
    }

    /// Jobs queued or rendering.
    pub fn active_len(&self) -> usize {
        self.lock_jobs().active.len()
    }

    /// Drop pending jobs whose client never showed up.
    ///
    /// Uploaded inputs are left in place: another job for the same content
    /// may share the file.
    pub fn prune_expired(&self) -> usize {
        let ttl = chrono::Duration::from_std(self.pending_ttl).unwrap_or(chrono::Duration::MAX);
        let Some(cutoff) = Utc::now().checked_sub_signed(ttl) else {
            return 0;
        };
        let mut jobs = self.lock_jobs();
        let before = jobs.pending.len();
        jobs.pending.retain(|_, job| job.submitted_at > cutoff);
        let pruned = before - jobs.pending.len();
        if pruned > 0 {
            info!(pruned, "expired pending jobs dropped");
        }
        pruned
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, JobTable> {
        self.jobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn count_submission(result: &'static str) {
    metrics::submissions().add(1, &[KeyValue::new("result", result)]);
}
