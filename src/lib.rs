//! # renderq
//!
//! Content-addressed render queue for STL meshes.
//!
//! Uploads are fingerprinted and checked against a persistent dedup cache.
//! Unseen content becomes a job that waits until the client's notification
//! channel registers, then runs through a single sequential worker. Progress
//! and the final result go back over that channel.

pub mod cache;
pub mod channel;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod model;
pub mod queue;
pub mod registry;
pub mod render;
pub mod server;
pub mod service;
pub mod telemetry;
pub mod worker;
