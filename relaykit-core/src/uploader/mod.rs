//! Upload batching and dispatch
//!
//! The [`Uploader`] owns the one batch that may be pending at any time. A
//! batch is persisted to durable storage *before* network dispatch, so a
//! crash mid-upload leaves a replayable record; acknowledgment clears it,
//! failure leaves it for the next upload cycle to fold into a fresh batch.

mod transport;

pub use transport::{HttpTransport, Transport, TransportFuture};

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::event::EventRecord;
use crate::storage;

/// A snapshot of events drained from one or more queues, owned exclusively
/// by the uploader until the remote collector acknowledges or fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadBatch {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub events: Vec<EventRecord>,
}

impl UploadBatch {
    fn new(events: Vec<EventRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            events,
        }
    }

    /// Serialize the batch into the wire payload handed to the transport.
    fn serialize(&self) -> Result<SerializedBatch> {
        Ok(SerializedBatch {
            batch_id: self.id,
            event_count: self.events.len(),
            body: serde_json::to_string(self)?,
        })
    }
}

/// Wire form of a batch.
#[derive(Debug, Clone)]
pub struct SerializedBatch {
    pub batch_id: Uuid,
    pub event_count: usize,
    pub body: String,
}

/// Upload statistics
#[derive(Debug, Default, Clone)]
pub struct UploadStats {
    /// Batches acknowledged by the collector
    pub batches_sent: usize,
    /// Batches that failed dispatch (kept for retry)
    pub batches_failed: usize,
    /// Total events acknowledged
    pub events_sent: usize,
}

/// Persisted uploader state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct UploaderSnapshot {
    in_flight: Option<UploadBatch>,
}

/// Owns the currently pending batch and its durable record.
///
/// Construction failure here is fatal to the whole subsystem: without an
/// uploader there is nothing to drain queues into.
///
/// Internally the state sits behind an `Arc` so the dispatch task can
/// outlive the calling stack frame; `Uploader` itself is cheap to clone.
#[derive(Clone)]
pub struct Uploader {
    inner: Arc<UploaderInner>,
}

struct UploaderInner {
    path: PathBuf,
    transport: Arc<dyn Transport>,
    in_flight: Mutex<Option<UploadBatch>>,
    dispatching: AtomicBool,
    stats: Mutex<UploadStats>,
}

impl Uploader {
    /// Open the uploader, restoring a persisted in-flight batch if a prior
    /// run crashed or failed mid-upload.
    pub fn open(base: &Path, transport: Arc<dyn Transport>) -> Result<Self> {
        let root = storage::init_root(base)?;
        let path = root.join(storage::uploader_file_name());

        let snapshot: UploaderSnapshot = storage::read_json(&path)?.unwrap_or_default();
        if let Some(batch) = &snapshot.in_flight {
            tracing::info!(
                batch_id = %batch.id,
                events = batch.events.len(),
                "Restored in-flight batch from prior run"
            );
        }

        Ok(Self {
            inner: Arc::new(UploaderInner {
                path,
                transport,
                in_flight: Mutex::new(snapshot.in_flight),
                dispatching: AtomicBool::new(false),
                stats: Mutex::new(UploadStats::default()),
            }),
        })
    }

    /// Whether a dispatch task is currently on the wire.
    ///
    /// Callers must not drain queues into the uploader while this is true;
    /// the coordinator checks it at the start of each upload cycle.
    pub fn is_dispatching(&self) -> bool {
        self.inner.dispatching.load(Ordering::SeqCst)
    }

    /// Whether a batch is pending (failed or restored, awaiting retry).
    pub fn has_pending(&self) -> bool {
        self.inner.in_flight.lock().unwrap().is_some()
    }

    /// Events in the pending batch, if any.
    pub fn pending_events(&self) -> usize {
        self.inner
            .in_flight
            .lock()
            .unwrap()
            .as_ref()
            .map(|b| b.events.len())
            .unwrap_or(0)
    }

    /// Take ownership of freshly drained events and dispatch them.
    ///
    /// Any still-pending batch from an earlier failed cycle is folded in
    /// ahead of the new events, preserving order and the at-most-one-pending
    /// contract. The merged batch is persisted before the transport is
    /// invoked; dispatch itself runs on a spawned task, so this never blocks
    /// the caller on network completion.
    ///
    /// Returns whether a dispatch was actually initiated (`false` when there
    /// was nothing to send). On error the merged batch stays in the pending
    /// slot and a later cycle retries it.
    pub fn upload(&self, events: Vec<EventRecord>) -> Result<bool> {
        let serialized = {
            let mut in_flight = self.inner.in_flight.lock().unwrap();

            let merged = match in_flight.take() {
                Some(prior) => {
                    tracing::debug!(
                        batch_id = %prior.id,
                        retried = prior.events.len(),
                        "Folding pending batch into new upload"
                    );
                    let mut all = prior.events;
                    all.extend(events);
                    all
                }
                None => events,
            };

            if merged.is_empty() {
                return Ok(false);
            }

            // The merged batch takes the in-flight slot before any fallible
            // step: a failed serialize or snapshot write must leave it held
            // for the next cycle, never dropped.
            let batch = UploadBatch::new(merged);
            *in_flight = Some(batch.clone());

            let serialized = batch.serialize()?;

            // Durable record before dispatch: a crash between here and
            // acknowledgment must leave the batch replayable.
            storage::write_json(
                &self.inner.path,
                &UploaderSnapshot {
                    in_flight: Some(batch),
                },
            )?;
            serialized
        };

        self.inner.dispatching.store(true, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.dispatch(serialized).await;
        });

        Ok(true)
    }

    /// Persist current in-flight state. Idempotent.
    pub fn archive(&self) -> Result<()> {
        let in_flight = self.inner.in_flight.lock().unwrap();
        storage::write_json(
            &self.inner.path,
            &UploaderSnapshot {
                in_flight: in_flight.clone(),
            },
        )
    }

    /// Current upload statistics.
    pub fn stats(&self) -> UploadStats {
        self.inner.stats.lock().unwrap().clone()
    }
}

impl UploaderInner {
    /// Run one dispatch to completion and record the outcome.
    async fn dispatch(&self, payload: SerializedBatch) {
        let batch_id = payload.batch_id;
        let event_count = payload.event_count;

        match self.transport.send(payload).await {
            Ok(()) => {
                {
                    let mut in_flight = self.in_flight.lock().unwrap();
                    *in_flight = None;
                }
                if let Err(e) = storage::write_json(&self.path, &UploaderSnapshot::default()) {
                    tracing::warn!(error = %e, "Failed to clear in-flight record");
                }

                let mut stats = self.stats.lock().unwrap();
                stats.batches_sent += 1;
                stats.events_sent += event_count;

                tracing::debug!(
                    batch_id = %batch_id,
                    events = event_count,
                    "Batch acknowledged by collector"
                );
            }
            Err(e) => {
                let mut stats = self.stats.lock().unwrap();
                stats.batches_failed += 1;
                drop(stats);

                // The in-flight record stays; the next upload cycle retries it.
                tracing::warn!(
                    batch_id = %batch_id,
                    error = %e,
                    "Batch dispatch failed, keeping in-flight record for retry"
                );
            }
        }

        self.dispatching.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::AtomicUsize;
    use tempfile::TempDir;

    /// Transport that records payloads and can be told to fail.
    struct MockTransport {
        fail: AtomicBool,
        sent: Mutex<Vec<SerializedBatch>>,
        calls: AtomicUsize,
    }

    impl MockTransport {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail: AtomicBool::new(fail),
                sent: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Transport for MockTransport {
        fn send(&self, payload: SerializedBatch) -> TransportFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    Err(Error::Transport("API error (503): unavailable".to_string()))
                } else {
                    self.sent.lock().unwrap().push(payload);
                    Ok(())
                }
            })
        }
    }

    fn events(names: &[&str]) -> Vec<EventRecord> {
        names
            .iter()
            .map(|n| EventRecord::new(*n).with_user("alice"))
            .collect()
    }

    async fn wait_for_dispatch(uploader: &Uploader) {
        for _ in 0..100 {
            if !uploader.is_dispatching() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("dispatch did not settle");
    }

    #[tokio::test]
    async fn test_successful_upload_clears_in_flight() {
        let dir = TempDir::new().unwrap();
        let transport = MockTransport::new(false);
        let uploader = Uploader::open(dir.path(), transport.clone()).unwrap();

        assert!(uploader.upload(events(&["e1", "e2"])).unwrap());
        wait_for_dispatch(&uploader).await;

        assert!(!uploader.has_pending());
        assert_eq!(uploader.stats().batches_sent, 1);
        assert_eq!(uploader.stats().events_sent, 2);
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(transport.sent.lock().unwrap()[0].event_count, 2);
    }

    #[tokio::test]
    async fn test_empty_upload_not_initiated() {
        let dir = TempDir::new().unwrap();
        let uploader = Uploader::open(dir.path(), MockTransport::new(false)).unwrap();
        assert!(!uploader.upload(Vec::new()).unwrap());
        assert_eq!(uploader.stats().batches_sent, 0);
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_batch_and_retries_merged() {
        let dir = TempDir::new().unwrap();
        let transport = MockTransport::new(true);
        let uploader = Uploader::open(dir.path(), transport.clone()).unwrap();

        assert!(uploader.upload(events(&["e1"])).unwrap());
        wait_for_dispatch(&uploader).await;

        assert!(uploader.has_pending());
        assert_eq!(uploader.pending_events(), 1);
        assert_eq!(uploader.stats().batches_failed, 1);

        // Next cycle folds the pending event ahead of the new one
        transport.fail.store(false, Ordering::SeqCst);
        assert!(uploader.upload(events(&["e2"])).unwrap());
        wait_for_dispatch(&uploader).await;

        assert!(!uploader.has_pending());
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_count, 2);
        let replayed: UploadBatch = serde_json::from_str(&sent[0].body).unwrap();
        assert_eq!(replayed.events[0].name, "e1");
        assert_eq!(replayed.events[1].name, "e2");
    }

    #[tokio::test]
    async fn test_pending_batch_retried_without_new_events() {
        let dir = TempDir::new().unwrap();
        let transport = MockTransport::new(true);
        let uploader = Uploader::open(dir.path(), transport.clone()).unwrap();

        uploader.upload(events(&["e1"])).unwrap();
        wait_for_dispatch(&uploader).await;
        assert!(uploader.has_pending());

        transport.fail.store(false, Ordering::SeqCst);
        assert!(uploader.upload(Vec::new()).unwrap());
        wait_for_dispatch(&uploader).await;
        assert!(!uploader.has_pending());
    }

    #[tokio::test]
    async fn test_snapshot_write_failure_keeps_batch_for_retry() {
        let dir = TempDir::new().unwrap();
        let transport = MockTransport::new(false);
        let uploader = Uploader::open(dir.path(), transport.clone()).unwrap();

        // Break the snapshot write by replacing the storage dir with a file
        let root = dir.path().join(crate::storage::STORAGE_VERSION);
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"").unwrap();

        let err = uploader.upload(events(&["e1"])).unwrap_err();
        assert!(matches!(err, Error::Storage { .. }));

        // The drained events are still owned by the uploader, not lost
        assert!(uploader.has_pending());
        assert_eq!(uploader.pending_events(), 1);
        assert!(!uploader.is_dispatching());

        // Once storage heals, the next cycle ships the retained batch
        std::fs::remove_file(&root).unwrap();
        assert!(uploader.upload(Vec::new()).unwrap());
        wait_for_dispatch(&uploader).await;

        assert!(!uploader.has_pending());
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].event_count, 1);
    }

    #[tokio::test]
    async fn test_in_flight_survives_restart() {
        let dir = TempDir::new().unwrap();
        let transport = MockTransport::new(true);
        let uploader = Uploader::open(dir.path(), transport).unwrap();

        uploader.upload(events(&["e1", "e2"])).unwrap();
        wait_for_dispatch(&uploader).await;
        uploader.archive().unwrap();
        drop(uploader);

        let reopened = Uploader::open(dir.path(), MockTransport::new(false)).unwrap();
        assert!(reopened.has_pending());
        assert_eq!(reopened.pending_events(), 2);
    }

    #[tokio::test]
    async fn test_archive_idempotent_on_empty_state() {
        let dir = TempDir::new().unwrap();
        let uploader = Uploader::open(dir.path(), MockTransport::new(false)).unwrap();
        uploader.archive().unwrap();
        uploader.archive().unwrap();
        assert!(!uploader.has_pending());
    }
}
