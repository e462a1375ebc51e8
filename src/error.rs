//! Error types for renderq.

use std::path::PathBuf;

use thiserror::Error;

use crate::render::RenderError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("dedup cache at {path} is corrupt: {source}")]
    CorruptCache {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    #[error("invalid job id: {0:?}")]
    InvalidJobId(String),

    #[error("invalid fingerprint: {0:?}")]
    InvalidFingerprint(String),

    #[error("work queue is closed")]
    QueueClosed,

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
