//! A single named, durably-backed event queue

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QueueConfig;
use crate::error::Result;
use crate::event::EventRecord;
use crate::storage;

/// Persisted form of a queue's in-memory state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct BufferState {
    events: Vec<EventRecord>,
    last_drained_at: Option<DateTime<Utc>>,
}

/// An ordered, FIFO buffer of pending events for one queue identifier.
///
/// The buffer lives behind its own mutex, separate from the registry lock, so
/// appends to one queue never block on operations against another. Every
/// mutation writes the snapshot file before releasing the lock, which makes
/// `archive` a plain re-write and keeps the crash window empty: an append
/// that returned is on disk.
pub struct QueueStore {
    identifier: String,
    config: QueueConfig,
    path: PathBuf,
    inner: Mutex<BufferState>,
}

impl QueueStore {
    /// Open a queue store rooted in `root`, restoring a prior snapshot if one
    /// exists.
    ///
    /// Fails if the snapshot cannot be read or the directory is unusable;
    /// such a failure is fatal to creating this queue only.
    pub fn open(identifier: &str, config: QueueConfig, root: &Path) -> Result<Self> {
        let path = root.join(storage::queue_file_name(identifier));

        let state: BufferState = storage::read_json(&path)?.unwrap_or_default();
        if !state.events.is_empty() {
            tracing::debug!(
                queue = %identifier,
                restored = state.events.len(),
                "Restored queue snapshot"
            );
        }

        Ok(Self {
            identifier: identifier.to_string(),
            config,
            path,
            inner: Mutex::new(state),
        })
    }

    /// Queue identifier (unique key in the registry).
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The policy this queue was created with.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Append an event to the tail of the buffer.
    ///
    /// Returns `Ok(true)` if the event was buffered, `Ok(false)` if it was
    /// dropped as an adjacent duplicate under `append_only_when_different`.
    /// Never touches the network; the snapshot write happens under the store
    /// lock so the append is durable once this returns.
    pub fn append(&self, event: EventRecord) -> Result<bool> {
        let mut state = self.inner.lock().unwrap();

        if self.config.append_only_when_different {
            if let Some(tail) = state.events.last() {
                if tail.content_hash() == event.content_hash() {
                    tracing::trace!(queue = %self.identifier, "Dropped adjacent duplicate event");
                    return Ok(false);
                }
            }
        }

        state.events.push(event);
        storage::write_json(&self.path, &*state)?;
        Ok(true)
    }

    /// Atomically drain and return the entire buffered sequence.
    ///
    /// The store is left empty; concurrent appends simply populate the
    /// now-empty buffer. Returns an empty Vec if there was nothing buffered.
    pub fn transfer(&self) -> Vec<EventRecord> {
        let mut state = self.inner.lock().unwrap();

        if state.events.is_empty() {
            return Vec::new();
        }

        let events = std::mem::take(&mut state.events);
        state.last_drained_at = Some(Utc::now());

        // The drained events are owned by the caller from here on; a failed
        // snapshot write must not take them back.
        if let Err(e) = storage::write_json(&self.path, &*state) {
            tracing::warn!(queue = %self.identifier, error = %e, "Failed to persist drained queue");
        }

        events
    }

    /// Advisory upload-readiness check.
    ///
    /// True when the buffer holds strictly more events than
    /// `upload_when_more_than`, or when the oldest buffered event is older
    /// than `upload_when_older_than_secs` (0 disables the age rule). Callers
    /// may force a transfer regardless.
    pub fn ready_for_upload(&self) -> bool {
        let state = self.inner.lock().unwrap();

        if state.events.len() > self.config.upload_when_more_than {
            return true;
        }

        if self.config.upload_when_older_than_secs > 0 {
            if let Some(oldest) = state.events.first() {
                let age = Utc::now().signed_duration_since(oldest.recorded_at);
                if age.num_seconds() > self.config.upload_when_older_than_secs as i64 {
                    return true;
                }
            }
        }

        false
    }

    /// Write the current state to durable storage. Idempotent.
    pub fn archive(&self) -> Result<()> {
        let state = self.inner.lock().unwrap();
        storage::write_json(&self.path, &*state)
    }

    /// Number of buffered events.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot file path for this queue.
    pub(crate) fn snapshot_path(&self) -> &Path {
        &self.path
    }
}
