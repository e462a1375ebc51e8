//! End-to-end worker scenarios against a scripted renderer.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use renderq::cache::DedupCache;
use renderq::config::Config;
use renderq::fingerprint::Fingerprint;
use renderq::model::{JobId, Notification, SubmitOutcome};
use renderq::registry::ChannelHandle;
use renderq::render::{RenderError, Renderer};
use renderq::service::{Activation, Service};
use renderq::worker::Worker;
use tokio::sync::mpsc::UnboundedReceiver;

/// Copies input to output, unless the input contains `FAIL`.
#[derive(Default)]
struct ScriptedRenderer {
    calls: Mutex<Vec<PathBuf>>,
}

impl Renderer for ScriptedRenderer {
    fn render(&self, input: &Path, output: &Path) -> Result<(), RenderError> {
        self.calls.lock().unwrap().push(input.to_path_buf());
        let bytes = std::fs::read(input)?;
        if bytes.windows(4).any(|w| w == b"FAIL") {
            return Err(RenderError::Parse("scripted failure".into()));
        }
        std::fs::write(output, bytes)?;
        Ok(())
    }
}

struct Harness {
    _dir: tempfile::TempDir,
    config: Config,
    service: Arc<Service>,
    renderer: Arc<ScriptedRenderer>,
}

impl Harness {
    fn new(queue_capacity: usize) -> (Self, Worker) {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            queue_capacity,
            ..Config::default()
        };
        let (service, queue) = Service::start(&config).unwrap();
        let renderer = Arc::new(ScriptedRenderer::default());
        let worker = Worker::new(
            Arc::clone(&service),
            queue,
            Arc::clone(&renderer) as Arc<dyn Renderer>,
        );
        (
            Self {
                _dir: dir,
                config,
                service,
                renderer,
            },
            worker,
        )
    }

    async fn accept(&self, bytes: &[u8]) -> JobId {
        match self.service.submit(bytes).await.unwrap() {
            SubmitOutcome::Accepted(ticket) => ticket.job_id,
            other => panic!("expected Accepted, got {other:?}"),
        }
    }

    /// Register a channel for `job_id` and queue the job, as a client would.
    async fn follow(&self, job_id: JobId) -> UnboundedReceiver<Notification> {
        let (handle, rx) = ChannelHandle::pair();
        self.service.registry().register(job_id, handle);
        assert_eq!(
            self.service.activate(&job_id).await.unwrap(),
            Activation::Queued
        );
        rx
    }

    fn render_count(&self) -> usize {
        self.renderer.calls.lock().unwrap().len()
    }
}

async fn next(rx: &mut UnboundedReceiver<Notification>) -> Notification {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("channel closed")
}

#[tokio::test]
async fn fresh_content_is_processed_and_cached() {
    let (h, worker) = Harness::new(10);
    tokio::spawn(worker.run());

    let content = b"solid X";
    let fp = Fingerprint::derive(content);
    let ticket = match h.service.submit(content).await.unwrap() {
        SubmitOutcome::Accepted(ticket) => ticket,
        other => panic!("expected Accepted, got {other:?}"),
    };
    assert_eq!(ticket.fingerprint, fp);
    assert_eq!(ticket.output, fp.output_name());
    assert!(h.config.uploads_dir().join(fp.input_name()).exists());

    let mut rx = h.follow(ticket.job_id).await;
    assert_eq!(
        next(&mut rx).await,
        Notification::Processing {
            job_id: ticket.job_id
        }
    );
    assert_eq!(
        next(&mut rx).await,
        Notification::Completed {
            job_id: ticket.job_id,
            output: fp.output_name(),
            link: format!("/output/{}", fp.output_name()),
        }
    );

    assert_eq!(h.service.cache().lookup(&fp), Some(fp.output_name()));
    assert!(h.config.output_dir().join(fp.output_name()).exists());

    // Persisted: a fresh load sees the entry.
    let reloaded = DedupCache::load(h.config.cache_path()).unwrap();
    assert_eq!(reloaded.lookup(&fp), Some(fp.output_name()));
}

#[tokio::test]
async fn resubmitting_processed_content_hits_the_cache() {
    let (h, worker) = Harness::new(10);
    tokio::spawn(worker.run());

    let job_id = h.accept(b"solid X").await;
    let mut rx = h.follow(job_id).await;
    next(&mut rx).await;
    assert!(matches!(next(&mut rx).await, Notification::Completed { .. }));

    let outcome = h.service.submit(b"solid X").await.unwrap();
    let fp = Fingerprint::derive(b"solid X");
    assert_eq!(
        outcome,
        SubmitOutcome::Cached {
            fingerprint: fp.clone(),
            output: fp.output_name(),
        }
    );
    assert_eq!(h.service.pending_len(), 0);
    assert_eq!(h.service.queue().len(), 0);
    assert_eq!(h.render_count(), 1);
}

#[tokio::test]
async fn failed_render_is_terminal_and_not_cached() {
    let (h, worker) = Harness::new(10);
    tokio::spawn(worker.run());

    let content = b"solid Y FAIL";
    let fp = Fingerprint::derive(content);
    let job_id = h.accept(content).await;
    let mut rx = h.follow(job_id).await;

    assert_eq!(next(&mut rx).await, Notification::Processing { job_id });
    match next(&mut rx).await {
        Notification::Failed { job_id: id, error } => {
            assert_eq!(id, job_id);
            assert!(error.contains("scripted failure"), "got {error}");
        }
        other => panic!("expected Failed, got {other:?}"),
    }
    assert!(h.service.cache().lookup(&fp).is_none());

    // No negative caching: the same content becomes a brand new job.
    let retry = h.accept(content).await;
    assert_ne!(retry, job_id);
}

#[tokio::test]
async fn renderer_that_writes_nothing_counts_as_failure() {
    struct Silent;
    impl Renderer for Silent {
        fn render(&self, _input: &Path, _output: &Path) -> Result<(), RenderError> {
            Ok(())
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    let (service, queue) = Service::start(&config).unwrap();
    let worker = Worker::new(Arc::clone(&service), queue, Arc::new(Silent));
    tokio::spawn(worker.run());

    let SubmitOutcome::Accepted(ticket) = service.submit(b"ghost").await.unwrap() else {
        panic!("expected Accepted");
    };
    let (handle, mut rx) = ChannelHandle::pair();
    service.registry().register(ticket.job_id, handle);
    service.activate(&ticket.job_id).await.unwrap();

    next(&mut rx).await;
    assert!(matches!(next(&mut rx).await, Notification::Failed { .. }));
    assert!(service.cache().is_empty());
}

#[tokio::test]
async fn job_without_channel_still_completes() {
    let (h, worker) = Harness::new(10);
    let stop = worker.shutdown_handle();
    let task = tokio::spawn(worker.run());

    let fp = Fingerprint::derive(b"solid lonely");
    let job_id = h.accept(b"solid lonely").await;
    assert_eq!(
        h.service.activate(&job_id).await.unwrap(),
        Activation::Queued
    );

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.service.cache().lookup(&fp).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job never completed");

    stop.notify_one();
    task.await.unwrap();
    assert!(h.service.registry().is_empty());
    assert_eq!(h.render_count(), 1);
}

#[tokio::test]
async fn activation_waits_while_queue_is_saturated() {
    let (h, worker) = Harness::new(1);

    let first = h.accept(b"solid one").await;
    let second = h.accept(b"solid two").await;

    // Fills the only slot; no worker is running yet.
    let mut first_rx = h.follow(first).await;

    let service = Arc::clone(&h.service);
    let blocked = tokio::spawn(async move { service.activate(&second).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "activation should wait on a full queue");

    tokio::spawn(worker.run());
    assert_eq!(
        tokio::time::timeout(Duration::from_secs(5), blocked)
            .await
            .expect("activation never resumed")
            .unwrap()
            .unwrap(),
        Activation::Queued
    );

    next(&mut first_rx).await;
    assert!(matches!(
        next(&mut first_rx).await,
        Notification::Completed { .. }
    ));
}

#[tokio::test]
async fn jobs_render_in_activation_order() {
    let (h, worker) = Harness::new(10);

    let mut receivers = Vec::new();
    for tag in ["a", "b", "c"] {
        let id = h.accept(format!("solid {tag}").as_bytes()).await;
        receivers.push(h.follow(id).await);
    }
    tokio::spawn(worker.run());

    for rx in &mut receivers {
        next(rx).await;
        assert!(matches!(next(rx).await, Notification::Completed { .. }));
    }

    let calls = h.renderer.calls.lock().unwrap().clone();
    let expected: Vec<PathBuf> = ["a", "b", "c"]
        .iter()
        .map(|tag| {
            h.config
                .uploads_dir()
                .join(Fingerprint::derive(format!("solid {tag}").as_bytes()).input_name())
        })
        .collect();
    assert_eq!(calls, expected);
}

#[tokio::test]
async fn cache_flush_failure_does_not_fail_the_job() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        ..Config::default()
    };
    std::fs::create_dir_all(config.uploads_dir()).unwrap();
    std::fs::create_dir_all(config.output_dir()).unwrap();

    let blocked = dir.path().join("blocked");
    let cache = DedupCache::load(blocked.join("file_hashes.json")).unwrap();
    std::fs::write(&blocked, b"").unwrap();

    let (service, queue) = Service::with_cache(cache, &config);
    let worker = Worker::new(
        Arc::clone(&service),
        queue,
        Arc::new(ScriptedRenderer::default()),
    );
    tokio::spawn(worker.run());

    let SubmitOutcome::Accepted(ticket) = service.submit(b"solid Z").await.unwrap() else {
        panic!("expected Accepted");
    };
    let (handle, mut rx) = ChannelHandle::pair();
    service.registry().register(ticket.job_id, handle);
    service.activate(&ticket.job_id).await.unwrap();

    next(&mut rx).await;
    assert!(matches!(next(&mut rx).await, Notification::Completed { .. }));
    assert_eq!(
        service.cache().lookup(&ticket.fingerprint),
        Some(ticket.output.clone())
    );
}

#[tokio::test]
async fn unknown_or_repeated_activation_is_a_no_op() {
    let (h, _worker) = Harness::new(10);
    assert_eq!(
        h.service.activate(&JobId::new()).await.unwrap(),
        Activation::Unknown
    );

    let id = h.accept(b"solid once").await;
    assert_eq!(h.service.activate(&id).await.unwrap(), Activation::Queued);
    assert_eq!(
        h.service.activate(&id).await.unwrap(),
        Activation::AlreadyActive
    );
    assert_eq!(h.service.queue().len(), 1);
    assert_eq!(h.service.active_len(), 1);
}

#[tokio::test]
async fn finished_job_ids_are_retired() {
    let (h, worker) = Harness::new(10);
    tokio::spawn(worker.run());

    let id = h.accept(b"solid done").await;
    let mut rx = h.follow(id).await;
    next(&mut rx).await;
    assert!(matches!(next(&mut rx).await, Notification::Completed { .. }));

    assert_eq!(h.service.active_len(), 0);
    assert_eq!(h.service.activate(&id).await.unwrap(), Activation::Unknown);
}

#[tokio::test]
async fn stale_pending_jobs_expire() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        data_dir: dir.path().to_path_buf(),
        pending_ttl_secs: 0,
        ..Config::default()
    };
    let (service, _queue) = Service::start(&config).unwrap();

    service.submit(b"solid abandoned").await.unwrap();
    assert_eq!(service.pending_len(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The next submission prunes the abandoned job before parking its own.
    service.submit(b"solid fresh").await.unwrap();
    assert_eq!(service.pending_len(), 1);
}
