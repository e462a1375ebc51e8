//! Core data model.
//!
//! A job is one queued render of one uploaded artifact. It is identified by
//! a random [`JobId`] that the client round-trips over its notification
//! channel, and carries the fingerprint of the content it was created for.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::fingerprint::Fingerprint;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn parse(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| Error::InvalidJobId(s.to_string()))
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Full form: clients echo this back verbatim.
        write!(f, "{}", self.0)
    }
}

/// A unit of render work.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub fingerprint: Fingerprint,
    /// Absolute path of the persisted upload.
    pub input_path: PathBuf,
    /// Output file name, relative to the output directory.
    pub output_ref: String,
    pub submitted_at: DateTime<Utc>,
}

/// Job metadata handed back to the submitting client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTicket {
    pub job_id: JobId,
    pub fingerprint: Fingerprint,
    pub output: String,
}

impl From<&Job> for JobTicket {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id,
            fingerprint: job.fingerprint.clone(),
            output: job.output_ref.clone(),
        }
    }
}

/// What happened when content was submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Content was rendered before; no job was created.
    Cached {
        fingerprint: Fingerprint,
        output: String,
    },
    /// New job created and parked until its channel registers.
    Accepted(JobTicket),
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// A message sent to the client over its notification channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Processing {
        job_id: JobId,
    },
    Completed {
        job_id: JobId,
        output: String,
        link: String,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
}

impl Notification {
    pub fn job_id(&self) -> JobId {
        match self {
            Notification::Processing { job_id }
            | Notification::Completed { job_id, .. }
            | Notification::Failed { job_id, .. } => *job_id,
        }
    }

    /// Completed or failed: the last meaningful message for a job.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Processing { .. })
    }
}

// ---------------------------------------------------------------------------
// Channel state
// ---------------------------------------------------------------------------

/// How a job ended, as seen by its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminal {
    Completed,
    Failed,
}

/// Lifecycle state of a notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    /// Connection open, no job id received yet.
    Opened,
    /// Bound to a job id in the registry.
    Registered,
    /// Processing notice delivered.
    Processing,
    /// Completed or failed notice delivered.
    Terminal(Terminal),
    /// Gone. No way back.
    Closed,
}

impl ChannelState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ChannelState) -> bool {
        use ChannelState::*;
        matches!(
            (self, to),
            (Opened, Registered)
                | (Registered, Processing)
                | (Registered, Terminal(_))     // processing notice lost or skipped
                | (Processing, Terminal(_))
                | (Opened | Registered | Processing | Terminal(_), Closed)
        )
    }

    pub fn is_closed(self) -> bool {
        matches!(self, ChannelState::Closed)
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChannelState::Opened => "opened",
            ChannelState::Registered => "registered",
            ChannelState::Processing => "processing",
            ChannelState::Terminal(Terminal::Completed) => "completed",
            ChannelState::Terminal(Terminal::Failed) => "failed",
            ChannelState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_states_follow_protocol() {
        use ChannelState::*;
        assert!(Opened.can_transition_to(Registered));
        assert!(Registered.can_transition_to(Processing));
        assert!(Registered.can_transition_to(Terminal(super::Terminal::Failed)));
        assert!(Processing.can_transition_to(Terminal(super::Terminal::Completed)));
        assert!(Terminal(super::Terminal::Completed).can_transition_to(Closed));
        assert!(Opened.can_transition_to(Closed));

        assert!(!Opened.can_transition_to(Processing));
        assert!(!Terminal(super::Terminal::Completed).can_transition_to(Processing));
        assert!(!Closed.can_transition_to(Opened));
        assert!(!Closed.can_transition_to(Closed));
    }

    #[test]
    fn notification_wire_format_is_tagged() {
        let id = JobId::new();
        let json = serde_json::to_value(Notification::Failed {
            job_id: id,
            error: "bad mesh".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "failed");
        assert_eq!(json["job_id"], id.to_string());
        assert_eq!(json["error"], "bad mesh");
    }

    #[test]
    fn job_id_parse_trims_and_rejects_garbage() {
        let id = JobId::new();
        assert_eq!(JobId::parse(&format!(" {id}\n")).unwrap(), id);
        assert!(matches!(
            JobId::parse("1700000000"),
            Err(Error::InvalidJobId(_))
        ));
    }
}
