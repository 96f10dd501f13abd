//! Top-level orchestration of queues, uploader, and cross-cutting context
//!
//! The [`Coordinator`] is the public face of the subsystem: producers append
//! events through it, timers and lifecycle callbacks trigger `upload` and
//! `archive` through it. It injects the process-wide user identity and the
//! optional location augmentation before an event reaches a queue, and it is
//! the only component that drains queues into the uploader.
//!
//! `append` with location augmentation and `upload` both spawn work onto the
//! tokio runtime; the coordinator is expected to live inside one.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::config::{AgentConfig, QueueConfig};
use crate::error::{Error, Result};
use crate::event::EventRecord;
use crate::queue::QueueRegistry;
use crate::uploader::{Transport, UploadStats, Uploader};

/// Boxed future returned by [`LocationProvider::augment`].
pub type AugmentFuture<'a> = Pin<Box<dyn Future<Output = EventRecord> + Send + 'a>>;

/// Location collaborator: asynchronously enriches an event with a location
/// fix. Single resolution, no cancellation.
pub trait LocationProvider: Send + Sync {
    fn augment(&self, event: EventRecord) -> AugmentFuture<'_>;
}

/// Orchestrates the queue registry and the uploader.
pub struct Coordinator {
    config: AgentConfig,
    current_user: Mutex<Option<String>>,
    registry: Arc<QueueRegistry>,
    uploader: Uploader,
    location: Option<Arc<dyn LocationProvider>>,
    /// Serializes upload cycles: collect-and-transfer must not interleave
    /// with another cycle or race the dispatching check. Never held across
    /// network I/O.
    upload_cycle: Mutex<()>,
}

impl Coordinator {
    /// Construct a coordinator with an injected transport and optional
    /// location collaborator.
    ///
    /// Fails only if durable storage cannot be initialized; without a working
    /// uploader the subsystem has no purpose, so that failure aborts
    /// construction.
    pub fn new(
        config: AgentConfig,
        transport: Arc<dyn Transport>,
        location: Option<Arc<dyn LocationProvider>>,
    ) -> Result<Self> {
        let root = config.storage_root();
        let registry = Arc::new(QueueRegistry::open(&root)?);
        let uploader = Uploader::open(&root, transport)?;

        let current_user = config.current_user_identity.clone();

        Ok(Self {
            config,
            current_user: Mutex::new(current_user),
            registry,
            uploader,
            location,
            upload_cycle: Mutex::new(()),
        })
    }

    /// Set the process-wide user identity backfilled into events that carry
    /// none of their own.
    pub fn set_current_user(&self, user_id: impl Into<String>) {
        let mut current = self.current_user.lock().unwrap();
        *current = Some(user_id.into());
    }

    /// The process-wide user identity, if set.
    pub fn current_user(&self) -> Option<String> {
        self.current_user
            .lock()
            .unwrap()
            .clone()
    }

    /// Create a named queue with the given policy.
    pub fn add_queue(&self, identifier: &str, config: QueueConfig) -> Result<()> {
        self.registry.add(identifier, config)
    }

    /// Remove a queue and its durable snapshot.
    pub fn remove_queue(&self, identifier: &str) -> Result<()> {
        self.registry.remove(identifier)
    }

    /// Validate an event and append it to the named queue.
    ///
    /// The event's identity is backfilled from the process-wide identity when
    /// empty; an event with no resolvable identity is rejected. When
    /// `with_location` is set and a location collaborator is configured, the
    /// append happens on a spawned task after augmentation resolves — the
    /// task holds only the queue *identifier* and re-resolves it at append
    /// time, so a queue removed during the gap silently swallows the event.
    pub fn append(&self, mut event: EventRecord, queue_id: &str, with_location: bool) -> Result<()> {
        if event.user_id.is_empty() {
            match self.current_user() {
                Some(user) => event.user_id = user,
                None => {
                    return Err(Error::Validation(
                        "event has no user identity and no process-wide identity is set"
                            .to_string(),
                    ));
                }
            }
        }

        event.sanity_check()?;

        if !self.registry.contains(queue_id) {
            return Err(Error::QueueNotFound(queue_id.to_string()));
        }

        let provider = if with_location { self.location.clone() } else { None };

        match provider {
            Some(provider) => {
                let registry = Arc::clone(&self.registry);
                let queue_id = queue_id.to_string();
                tokio::spawn(async move {
                    let augmented = provider.augment(event).await;
                    match registry.get(&queue_id) {
                        Some(store) => {
                            if let Err(e) = store.append(augmented) {
                                tracing::warn!(queue = %queue_id, error = %e, "Failed to append augmented event");
                            }
                        }
                        None => {
                            tracing::debug!(
                                queue = %queue_id,
                                "Queue removed during augmentation, dropping event"
                            );
                        }
                    }
                });
                Ok(())
            }
            None => {
                let store = self
                    .registry
                    .get(queue_id)
                    .ok_or_else(|| Error::QueueNotFound(queue_id.to_string()))?;
                store.append(event)?;
                Ok(())
            }
        }
    }

    /// Run one upload cycle.
    ///
    /// Fails fast when upload credentials are unset. Otherwise drains every
    /// upload-ready queue (every queue, when `force`) into a single batch and
    /// hands it to the uploader; a batch left over from a failed cycle is
    /// folded in even when no queue contributed.
    ///
    /// Returns whether an upload was actually initiated: `false` when a
    /// dispatch is already on the wire or the concatenated batch came up
    /// empty — forced uploads do not bypass the empty-batch check.
    pub fn upload(&self, force: bool) -> Result<bool> {
        self.config.validate_upload()?;

        let _cycle = self.upload_cycle.lock().unwrap();

        if self.uploader.is_dispatching() {
            tracing::debug!("Upload already in progress, skipping cycle");
            return Ok(false);
        }

        let mut batch = Vec::new();
        for store in self.registry.snapshot() {
            if force || store.ready_for_upload() {
                batch.extend(store.transfer());
            }
        }

        self.uploader.upload(batch)
    }

    /// Archive every queue and the uploader's in-flight state.
    ///
    /// Attempts every store even when one fails; the first error is returned
    /// after the sweep.
    pub fn archive(&self) -> Result<()> {
        archive_sweep(&self.registry, &self.uploader)
    }

    /// Entering-background hook: schedule the archive sweep off the calling
    /// path so foreground work is never stalled by disk I/O.
    pub fn handle_background_transition(&self) {
        let registry = Arc::clone(&self.registry);
        let uploader = self.uploader.clone();
        tokio::task::spawn_blocking(move || {
            if let Err(e) = archive_sweep(&registry, &uploader) {
                tracing::warn!(error = %e, "Background archive failed");
            }
        });
    }

    /// Total events buffered across all queues.
    pub fn pending_count(&self) -> usize {
        self.registry.snapshot().iter().map(|s| s.len()).sum()
    }

    /// Whether any queue holds buffered events.
    pub fn has_pending(&self) -> bool {
        self.registry.snapshot().iter().any(|s| !s.is_empty())
    }

    /// Upload statistics from the uploader.
    pub fn upload_stats(&self) -> UploadStats {
        self.uploader.stats()
    }

    /// The queue registry (for introspection and augmentation callbacks).
    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    /// The uploader.
    pub fn uploader(&self) -> &Uploader {
        &self.uploader
    }
}

/// Archive every queue and the uploader, attempting all of them even when
/// one fails. The first error wins.
fn archive_sweep(registry: &QueueRegistry, uploader: &Uploader) -> Result<()> {
    let mut first_err = None;

    for store in registry.snapshot() {
        if let Err(e) = store.archive() {
            tracing::warn!(queue = %store.identifier(), error = %e, "Failed to archive queue");
            first_err.get_or_insert(e);
        }
    }

    if let Err(e) = uploader.archive() {
        tracing::warn!(error = %e, "Failed to archive uploader state");
        first_err.get_or_insert(e);
    }

    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::uploader::{SerializedBatch, TransportFuture};
    use tempfile::TempDir;

    struct NullTransport;

    impl Transport for NullTransport {
        fn send(&self, _payload: SerializedBatch) -> TransportFuture<'_> {
            Box::pin(async { Ok(()) })
        }
    }

    fn coordinator(dir: &TempDir) -> Coordinator {
        let config = AgentConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };
        Coordinator::new(config, Arc::new(NullTransport), None).unwrap()
    }

    #[tokio::test]
    async fn test_append_requires_identity() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.add_queue("clicks", QueueConfig::default()).unwrap();

        let err = coordinator
            .append(EventRecord::new("tap"), "clicks", false)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        // The same event succeeds once a process-wide identity exists
        coordinator.set_current_user("alice");
        coordinator
            .append(EventRecord::new("tap"), "clicks", false)
            .unwrap();

        let store = coordinator.registry().get("clicks").unwrap();
        let drained = store.transfer();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].user_id, "alice");
    }

    #[tokio::test]
    async fn test_append_keeps_explicit_identity() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.set_current_user("alice");
        coordinator.add_queue("clicks", QueueConfig::default()).unwrap();

        coordinator
            .append(EventRecord::new("tap").with_user("bob"), "clicks", false)
            .unwrap();

        let store = coordinator.registry().get("clicks").unwrap();
        assert_eq!(store.transfer()[0].user_id, "bob");
    }

    #[tokio::test]
    async fn test_append_unknown_queue_fails_without_side_effects() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.set_current_user("alice");
        coordinator.add_queue("clicks", QueueConfig::default()).unwrap();

        let err = coordinator
            .append(EventRecord::new("tap"), "ghost", false)
            .unwrap_err();
        assert!(matches!(err, Error::QueueNotFound(_)));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_append_rejects_invalid_event() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.set_current_user("alice");
        coordinator.add_queue("clicks", QueueConfig::default()).unwrap();

        let err = coordinator
            .append(EventRecord::new(""), "clicks", false)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_fails_fast_without_credentials() {
        let dir = TempDir::new().unwrap();
        let coordinator = coordinator(&dir);
        coordinator.set_current_user("alice");
        coordinator.add_queue("clicks", QueueConfig::default()).unwrap();
        coordinator
            .append(EventRecord::new("tap"), "clicks", false)
            .unwrap();

        let err = coordinator.upload(true).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        // Nothing was drained by the failed attempt
        assert_eq!(coordinator.pending_count(), 1);
    }
}
