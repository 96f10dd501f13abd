//! # relaykit-core
//!
//! Core library for relaykit - an on-device event-collection agent.
//!
//! This library provides:
//! - Structured telemetry events with a closed scalar field model
//! - Named, durably-backed event queues with append and readiness policies
//! - An uploader with crash-safe in-flight batch tracking
//! - A coordinator tying queues, uploader, and cross-cutting context together
//!
//! ## Architecture
//!
//! ```text
//! producer ──► Coordinator::append ──► QueueRegistry ──► QueueStore (per-queue
//!                  │                                      buffer + snapshot)
//!                  ▼ timer / lifecycle
//!              Coordinator::upload ──► transfer ready queues ──► Uploader
//!                                                                   │
//!                                              persist in-flight ◄──┤
//!                                              dispatch (async) ────► Transport
//! ```
//!
//! Events survive process termination: every queue persists its buffer as a
//! JSON snapshot, and the uploader persists the batch it currently owns, all
//! under one versioned storage directory.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relaykit_core::{AgentConfig, Coordinator, EventRecord, HttpTransport, QueueConfig};
//!
//! # fn main() -> relaykit_core::Result<()> {
//! let config = AgentConfig {
//!     account_identifier: Some("acct-123".into()),
//!     auth_key: Some("rk_live_xxx".into()),
//!     server_url_template: Some("https://collect.example.com/v1/{account}/events".into()),
//!     ..Default::default()
//! };
//!
//! let transport = Arc::new(HttpTransport::new(config.clone())?);
//! let coordinator = Coordinator::new(config, transport, None)?;
//!
//! coordinator.add_queue("clicks", QueueConfig::default())?;
//! coordinator.set_current_user("alice");
//! coordinator.append(EventRecord::new("tap"), "clicks", false)?;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{AgentConfig, Config, QueueConfig};
pub use coordinator::{AugmentFuture, Coordinator, LocationProvider};
pub use error::{Error, Result};
pub use event::{EventRecord, FieldValue, GeoPoint};
pub use queue::{QueueRegistry, QueueStore};
pub use uploader::{
    HttpTransport, SerializedBatch, Transport, TransportFuture, UploadBatch, UploadStats, Uploader,
};

// Public modules
pub mod config;
pub mod coordinator;
pub mod error;
pub mod event;
pub mod logging;
pub mod queue;
pub mod shared;
pub mod storage;
pub mod uploader;
