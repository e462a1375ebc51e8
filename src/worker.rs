//! The single worker lane.
//!
//! Pulls jobs in FIFO order, renders each one on a blocking thread, records
//! successes in the dedup cache, and reports through the correlation
//! registry. Renders never overlap: the next job is not dequeued until the
//! current one has finished.

use std::sync::Arc;
use std::time::Instant;

use opentelemetry::KeyValue;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

use crate::model::{Job, Notification};
use crate::queue::JobReceiver;
use crate::render::{RenderError, Renderer};
use crate::service::Service;
use crate::telemetry::job::{record_state_transition, start_job_span};
use crate::telemetry::metrics;

pub struct Worker {
    service: Arc<Service>,
    queue: JobReceiver,
    renderer: Arc<dyn Renderer>,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(service: Arc<Service>, queue: JobReceiver, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            service,
            queue,
            renderer,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Handle that stops the loop after the job in progress, if any.
    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Run until shutdown is signalled or the queue closes.
    pub async fn run(mut self) {
        info!("worker started");
        loop {
            let job = tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("worker shutting down");
                    return;
                }
                job = self.queue.dequeue() => job,
            };

            match job {
                Some(job) => {
                    self.process(job).await;
                }
                None => {
                    info!("work queue closed, worker exiting");
                    return;
                }
            }
        }
    }

    /// Process one job to its terminal notification, which is also returned.
    pub async fn process(&self, job: Job) -> Notification {
        let span = start_job_span(&job.id, &job.fingerprint);
        let registry = self.service.registry();

        async {
            record_state_transition(&span, "queued", "processing");
            registry.notify(Notification::Processing { job_id: job.id });

            let started = Instant::now();
            let result = self.render(&job).await;
            let duration_ms = started.elapsed().as_secs_f64() * 1000.0;

            let terminal = match result {
                Ok(()) => {
                    self.record_success(&job);
                    record_state_transition(&span, "processing", "completed");
                    info!(job_id = %job.id, output = %job.output_ref, duration_ms, "job completed");
                    Notification::Completed {
                        job_id: job.id,
                        output: job.output_ref.clone(),
                        link: Service::output_link(&job.output_ref),
                    }
                }
                Err(e) => {
                    record_state_transition(&span, "processing", "failed");
                    error!(job_id = %job.id, error = %e, duration_ms, "job failed");
                    Notification::Failed {
                        job_id: job.id,
                        error: e.to_string(),
                    }
                }
            };

            let outcome = if matches!(terminal, Notification::Completed { .. }) {
                "completed"
            } else {
                "failed"
            };
            metrics::render_duration_ms().record(duration_ms, &[KeyValue::new("outcome", outcome)]);
            metrics::jobs_finished().add(1, &[KeyValue::new("outcome", outcome)]);

            // Retire the id first: a channel that still sees it active is
            // registered before the terminal notice goes out.
            self.service.finish(&job.id);
            registry.notify(terminal.clone());
            terminal
        }
        .instrument(span.clone())
        .await
    }

    async fn render(&self, job: &Job) -> Result<(), RenderError> {
        let renderer = Arc::clone(&self.renderer);
        let input = job.input_path.clone();
        let output = self.service.output_path(&job.output_ref);
        let check = output.clone();

        tokio::task::spawn_blocking(move || renderer.render(&input, &output))
            .await
            .map_err(|e| RenderError::Other(format!("render task aborted: {e}")))??;

        // A cache entry must never point at a file that is not there.
        match tokio::fs::try_exists(&check).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RenderError::Other(format!(
                "renderer produced no file at {}",
                check.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }

    fn record_success(&self, job: &Job) {
        if let Err(e) = self
            .service
            .cache()
            .record(job.fingerprint.clone(), job.output_ref.clone())
        {
            // In-memory entry is kept; the job still counts as completed.
            warn!(job_id = %job.id, fingerprint = %job.fingerprint, error = %e, "dedup cache flush failed");
            metrics::cache_flush_failures().add(1, &[]);
        }
    }
}
