//! Notification channel protocol.
//!
//! A client opens a channel after its upload was accepted and sends the job
//! id it was given. That first valid message registers the channel in the
//! correlation registry and only then moves the job onto the work queue, so
//! no job starts before its channel could have been registered.
//!
//! ```text
//! Opened ──job id──▶ Registered ──▶ Processing ──▶ Terminal ──▶ Closed
//! ```
//!
//! `Registered` may jump straight to `Terminal` when the processing notice is
//! lost, or when the id names no pending or in-flight job: such a channel is
//! sent a `failed` notice and closed. Any state drops to `Closed` on a
//! transport error or disconnect.

use std::future::Future;
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{ChannelState, JobId, Notification, Terminal};
use crate::registry::{ChannelHandle, ChannelId};
use crate::service::{Activation, Service};

/// Error text sent to a channel whose job id is not pending or in flight.
pub const UNKNOWN_JOB: &str = "unknown or expired job";

/// Full-duplex text transport under a notification channel.
pub trait ChannelTransport: Send {
    /// Next inbound text message. `None` once the peer has closed.
    fn recv(&mut self) -> impl Future<Output = Option<Result<String>>> + Send;

    fn send(&mut self, text: String) -> impl Future<Output = Result<()>> + Send;

    /// Close from our side. Errors are irrelevant at this point.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}

#[derive(Deserialize)]
struct Registration {
    job_id: String,
}

/// Extract the job id from a registration message.
///
/// Accepts the bare id, `{"job_id": "<id>"}`, or `<id>|<input>|<output>`
/// where only the first field is used.
pub fn parse_registration(text: &str) -> Result<JobId> {
    let text = text.trim();
    if text.starts_with('{') {
        let reg: Registration = serde_json::from_str(text)
            .map_err(|_| Error::InvalidJobId(text.to_string()))?;
        return JobId::parse(&reg.job_id);
    }
    let first = text.split('|').next().unwrap_or_default();
    JobId::parse(first)
}

/// Per-connection protocol state.
#[derive(Debug)]
pub struct ChannelSession {
    id: ChannelId,
    state: ChannelState,
    job_id: Option<JobId>,
}

impl ChannelSession {
    pub fn new(id: ChannelId) -> Self {
        Self {
            id,
            state: ChannelState::Opened,
            job_id: None,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn job_id(&self) -> Option<JobId> {
        self.job_id
    }

    /// Handle an inbound message while `Opened`.
    ///
    /// A malformed message leaves the session `Opened`. Messages after
    /// registration are not registrations and yield `Ok(None)`.
    pub fn on_inbound(&mut self, text: &str) -> Result<Option<JobId>> {
        if self.state != ChannelState::Opened {
            return Ok(None);
        }
        let job_id = parse_registration(text)?;
        self.transition(ChannelState::Registered);
        self.job_id = Some(job_id);
        Ok(Some(job_id))
    }

    /// Advance on an outbound notification. Returns whether it should be
    /// forwarded to the client.
    pub fn on_notification(&mut self, notification: &Notification) -> bool {
        if Some(notification.job_id()) != self.job_id {
            return false;
        }
        let to = match notification {
            Notification::Processing { .. } => ChannelState::Processing,
            Notification::Completed { .. } => ChannelState::Terminal(Terminal::Completed),
            Notification::Failed { .. } => ChannelState::Terminal(Terminal::Failed),
        };
        self.transition(to)
    }

    /// Move to `Closed`, returning the job id that must be released.
    pub fn close(&mut self) -> Option<JobId> {
        if self.transition(ChannelState::Closed) {
            self.job_id
        } else {
            None
        }
    }

    fn transition(&mut self, to: ChannelState) -> bool {
        if self.state.can_transition_to(to) {
            debug!(channel = %self.id, from = %self.state, to = %to, "channel transition");
            self.state = to;
            true
        } else {
            false
        }
    }
}

/// Drive one notification channel until it closes.
///
/// Returns the last state reached before closing. Whatever the exit path,
/// the channel's registration is released.
pub async fn run_channel<T: ChannelTransport>(
    service: Arc<Service>,
    mut transport: T,
) -> ChannelState {
    let (handle, mut mailbox) = ChannelHandle::pair();
    let mut session = ChannelSession::new(handle.id());
    debug!(channel = %session.id(), "notification channel opened");

    loop {
        tokio::select! {
            inbound = transport.recv() => match inbound {
                Some(Ok(text)) => match session.on_inbound(&text) {
                    Ok(Some(job_id)) => {
                        service.registry().register(job_id, handle.clone());
                        info!(channel = %session.id(), job_id = %job_id, "channel registered for job");
                        match service.activate(&job_id).await {
                            Ok(Activation::Queued | Activation::AlreadyActive) => {}
                            Ok(Activation::Unknown) => {
                                warn!(channel = %session.id(), job_id = %job_id, "unknown or expired job, rejecting channel");
                                service.registry().release(&job_id, handle.id());
                                let rejection = Notification::Failed {
                                    job_id,
                                    error: UNKNOWN_JOB.to_string(),
                                };
                                session.on_notification(&rejection);
                                if let Ok(text) = serde_json::to_string(&rejection) {
                                    if let Err(e) = transport.send(text).await {
                                        warn!(channel = %session.id(), error = %e, "failed to send rejection");
                                    }
                                }
                                transport.close().await;
                                break;
                            }
                            Err(e) => {
                                warn!(job_id = %job_id, error = %e, "failed to queue job");
                            }
                        }
                    }
                    Ok(None) => {
                        debug!(channel = %session.id(), "ignoring message on registered channel");
                    }
                    Err(e) => {
                        warn!(channel = %session.id(), error = %e, "malformed registration message");
                    }
                },
                Some(Err(e)) => {
                    warn!(channel = %session.id(), error = %e, "channel transport error");
                    break;
                }
                None => {
                    debug!(channel = %session.id(), "client closed channel");
                    break;
                }
            },
            Some(notification) = mailbox.recv() => {
                if !session.on_notification(&notification) {
                    continue;
                }
                let text = match serde_json::to_string(&notification) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "failed to encode notification");
                        continue;
                    }
                };
                if let Err(e) = transport.send(text).await {
                    warn!(channel = %session.id(), error = %e, "failed to send notification");
                    break;
                }
                if notification.is_terminal() {
                    transport.close().await;
                    break;
                }
            }
        }
    }

    let last = session.state();
    if let Some(job_id) = session.close() {
        service.registry().release(&job_id, handle.id());
        info!(channel = %session.id(), job_id = %job_id, last_state = %last, "channel closed");
    }
    last
}
