//! Correlation registry: job id → live notification channel.
//!
//! Jobs are created before the channel that will report on them exists, so
//! every lookup may legitimately miss. A miss resolves to [`NoopSink`] and the
//! message is dropped; progress delivery is at-most-once with no replay.
//!
//! The registry stores a [`ChannelHandle`], which is only the sending end of
//! the connection task's mailbox. Dropping the connection drops the mailbox,
//! after which sends through a stale handle fail and the entry is evicted.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::model::{JobId, Notification};
use crate::telemetry::metrics;

/// Identity of one connection, distinct from the job it reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelId(pub Uuid);

impl ChannelId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChannelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Something a notification can be pushed into.
pub trait NotificationSink: Send {
    fn deliver(&self, notification: Notification) -> Delivery;
}

/// Sink for jobs with no registered channel.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl NotificationSink for NoopSink {
    fn deliver(&self, notification: Notification) -> Delivery {
        debug!(job_id = %notification.job_id(), "no channel registered, notification dropped");
        Delivery::Dropped
    }
}

/// Non-owning handle to a connection's outbound mailbox.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelHandle {
    pub fn new(id: ChannelId, tx: mpsc::UnboundedSender<Notification>) -> Self {
        Self { id, tx }
    }

    /// Create a handle together with the mailbox it feeds.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(ChannelId::new(), tx), rx)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl NotificationSink for ChannelHandle {
    fn deliver(&self, notification: Notification) -> Delivery {
        match self.tx.send(notification) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Closed,
        }
    }
}

/// Result of a best-effort notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to a live channel.
    Delivered,
    /// No channel registered for the job.
    Dropped,
    /// A channel was registered but has gone away; it has been unregistered.
    Closed,
}

impl Delivery {
    fn as_str(self) -> &'static str {
        match self {
            Delivery::Delivered => "delivered",
            Delivery::Dropped => "dropped",
            Delivery::Closed => "closed",
        }
    }
}

/// Job id → channel map behind a single lock.
#[derive(Debug, Default)]
pub struct CorrelationRegistry {
    channels: Mutex<HashMap<JobId, ChannelHandle>>,
}

impl CorrelationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `channel` to `job_id`, returning the binding it replaced.
    pub fn register(&self, job_id: JobId, channel: ChannelHandle) -> Option<ChannelHandle> {
        let channel_id = channel.id();
        let replaced = self.lock().insert(job_id, channel);
        match &replaced {
            Some(old) => debug!(
                job_id = %job_id,
                channel = %channel_id,
                replaced = %old.id(),
                "channel registration replaced"
            ),
            None => debug!(job_id = %job_id, channel = %channel_id, "channel registered"),
        }
        replaced
    }

    pub fn lookup(&self, job_id: &JobId) -> Option<ChannelHandle> {
        self.lock().get(job_id).cloned()
    }

    /// Remove whatever channel is bound to `job_id`.
    pub fn unregister(&self, job_id: &JobId) -> Option<ChannelHandle> {
        let removed = self.lock().remove(job_id);
        if removed.is_some() {
            debug!(job_id = %job_id, "channel unregistered");
        }
        removed
    }

    /// Remove the binding for `job_id` only if it still belongs to `channel`.
    ///
    /// A channel that was superseded by a later registration must not evict
    /// its replacement when it finally closes.
    pub fn release(&self, job_id: &JobId, channel: ChannelId) -> bool {
        let mut channels = self.lock();
        if channels.get(job_id).is_some_and(|c| c.id() == channel) {
            channels.remove(job_id);
            debug!(job_id = %job_id, channel = %channel, "channel released");
            true
        } else {
            false
        }
    }

    /// Sink for `job_id`: the registered channel, or [`NoopSink`].
    pub fn sink(&self, job_id: &JobId) -> Box<dyn NotificationSink> {
        match self.lookup(job_id) {
            Some(handle) => Box::new(handle),
            None => Box::new(NoopSink),
        }
    }

    /// Best-effort delivery of `notification` to its job's channel.
    pub fn notify(&self, notification: Notification) -> Delivery {
        let job_id = notification.job_id();
        let delivery = self.sink(&job_id).deliver(notification);
        if delivery == Delivery::Closed {
            self.evict_closed(&job_id);
        }
        metrics::notifications().add(
            1,
            &[opentelemetry::KeyValue::new("delivery", delivery.as_str())],
        );
        delivery
    }

    /// Drop the binding for `job_id` if its channel has gone away. A live
    /// channel registered in the meantime is left alone.
    fn evict_closed(&self, job_id: &JobId) {
        let mut channels = self.lock();
        let closed = channels
            .get(job_id)
            .filter(|h| h.is_closed())
            .map(ChannelHandle::id);
        if let Some(channel) = closed {
            warn!(job_id = %job_id, channel = %channel, "channel gone, unregistering");
            channels.remove(job_id);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, ChannelHandle>> {
        self.channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
