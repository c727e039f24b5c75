//! In-memory store and dispatcher doubles
//!
//! - [`InMemoryEventStore`]: versioned compare-and-swap over a `HashMap`, with
//!   fault injection for conflict and outage paths
//! - [`RecordingDispatcher`]: captures every delivery, optionally failing them

use enrollment_core::dispatcher::{DispatchError, NotificationDispatcher};
use enrollment_core::event::EventRecord;
use enrollment_core::event_store::{
    EventStore, EventWrite, StoreError, StoreFuture, Version, VersionedEvent,
};
use enrollment_core::ids::{EntrantId, EventId, NotificationId};
use enrollment_core::notification::{Notification, ResponseState};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct StoreState {
    events: HashMap<EventId, (Version, EventRecord)>,
    notifications: Vec<Notification>,
}

impl StoreState {
    fn notification_mut(&mut self, id: NotificationId) -> Option<&mut Notification> {
        self.notifications.iter_mut().find(|n| n.id == id)
    }
}

/// In-memory event store for fast, deterministic testing.
///
/// Every commit runs under one lock, so the record, the new notifications
/// and the response updates land together or not at all.
///
/// # Fault injection
///
/// - [`inject_conflicts`](Self::inject_conflicts): the next `n` commits fail
///   with `ConcurrencyConflict` and apply nothing
/// - [`inject_unavailable`](Self::inject_unavailable): the next `n` loads or
///   commits fail with `Unavailable`
/// - [`yield_on_load`](Self::yield_on_load): yield to the scheduler between
///   reading a record and returning it, widening race windows
///
/// # Example
///
/// ```
/// use enrollment_core::event::{CapacityPolicy, EventRecord};
/// use enrollment_core::event_store::{EventStore, EventWrite, Version};
/// use enrollment_core::ids::EventId;
/// use enrollment_testing::InMemoryEventStore;
/// use chrono::Utc;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryEventStore::new();
/// let record = EventRecord::new(EventId::new("evt"), "Pottery", CapacityPolicy::new(2), Utc::now());
/// let v0 = store.create_event(record.clone()).await.unwrap();
///
/// let v1 = store.commit(v0, EventWrite::new(record.clone())).await.unwrap();
/// assert_eq!(v1, Version::new(1));
///
/// // A stale writer is rejected
/// assert!(store.commit(v0, EventWrite::new(record)).await.is_err());
/// # });
/// ```
#[derive(Clone, Debug, Default)]
pub struct InMemoryEventStore {
    state: Arc<Mutex<StoreState>>,
    conflicts_to_inject: Arc<AtomicU32>,
    outages_to_inject: Arc<AtomicU32>,
    yield_on_load: Arc<AtomicBool>,
    commits: Arc<AtomicUsize>,
    rejected_commits: Arc<AtomicUsize>,
}

impl InMemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` commits with a version conflict.
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` loads or commits as unavailable.
    pub fn inject_unavailable(&self, n: u32) {
        self.outages_to_inject.store(n, Ordering::SeqCst);
    }

    /// Yield to the scheduler inside every `load_event`.
    pub fn yield_on_load(&self, enabled: bool) {
        self.yield_on_load.store(enabled, Ordering::SeqCst);
    }

    /// Number of successful commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Number of commits rejected for a stale version or response state.
    #[must_use]
    pub fn rejected_commit_count(&self) -> usize {
        self.rejected_commits.load(Ordering::SeqCst)
    }

    /// Current record for `event_id`, if stored.
    #[must_use]
    pub fn event(&self, event_id: &EventId) -> Option<EventRecord> {
        self.lock().events.get(event_id).map(|(_, record)| record.clone())
    }

    /// Current version for `event_id`, if stored.
    #[must_use]
    pub fn version(&self, event_id: &EventId) -> Option<Version> {
        self.lock().events.get(event_id).map(|(version, _)| *version)
    }

    /// Every stored notification, in creation order.
    #[must_use]
    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Replace a stored record directly, bumping its version.
    ///
    /// Stands in for an external writer racing the engine.
    pub fn overwrite(&self, record: EventRecord) {
        let mut state = self.lock();
        let version = state
            .events
            .get(record.id())
            .map_or(Version::INITIAL, |(version, _)| version.next());
        state.events.insert(record.id().clone(), (version, record));
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn check_outage(&self) -> Result<(), StoreError> {
        if Self::take_injected(&self.outages_to_inject) {
            return Err(StoreError::Unavailable("injected outage".to_string()));
        }
        Ok(())
    }

    fn apply(&self, expected_version: Version, write: EventWrite) -> Result<Version, StoreError> {
        let mut state = self.lock();
        let event_id = write.record.id().clone();

        let actual = state
            .events
            .get(&event_id)
            .map(|(version, _)| *version)
            .ok_or_else(|| StoreError::EventNotFound(event_id.clone()))?;

        if Self::take_injected(&self.conflicts_to_inject) || actual != expected_version {
            self.rejected_commits.fetch_add(1, Ordering::SeqCst);
            return Err(StoreError::ConcurrencyConflict {
                event_id,
                expected: expected_version,
                actual: if actual == expected_version { actual.next() } else { actual },
            });
        }

        for update in &write.responses {
            let stored = state
                .notifications
                .iter()
                .find(|n| n.id == update.notification_id)
                .ok_or(StoreError::NotificationNotFound(update.notification_id))?;
            if stored.response_state != update.expected {
                self.rejected_commits.fetch_add(1, Ordering::SeqCst);
                return Err(StoreError::ResponseConflict {
                    notification_id: update.notification_id,
                    expected: update.expected,
                    actual: stored.response_state,
                });
            }
        }

        for update in &write.responses {
            if let Some(stored) = state.notification_mut(update.notification_id) {
                stored.apply(update);
            }
        }
        state.notifications.extend(write.notifications);

        let next = actual.next();
        state.events.insert(event_id, (next, write.record));
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(next)
    }
}

impl EventStore for InMemoryEventStore {
    fn create_event(&self, record: EventRecord) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            self.check_outage()?;
            let mut state = self.lock();
            if state.events.contains_key(record.id()) {
                return Err(StoreError::EventExists(record.id().clone()));
            }
            state
                .events
                .insert(record.id().clone(), (Version::INITIAL, record));
            Ok(Version::INITIAL)
        })
    }

    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, VersionedEvent> {
        Box::pin(async move {
            self.check_outage()?;
            let loaded = self
                .lock()
                .events
                .get(&event_id)
                .map(|(version, record)| VersionedEvent {
                    version: *version,
                    record: record.clone(),
                })
                .ok_or(StoreError::EventNotFound(event_id))?;

            if self.yield_on_load.load(Ordering::SeqCst) {
                tokio::task::yield_now().await;
            }
            Ok(loaded)
        })
    }

    fn commit(&self, expected_version: Version, write: EventWrite) -> StoreFuture<'_, Version> {
        Box::pin(async move {
            self.check_outage()?;
            self.apply(expected_version, write)
        })
    }

    fn create_notification(&self, notification: Notification) -> StoreFuture<'_, NotificationId> {
        Box::pin(async move {
            let id = notification.id;
            self.lock().notifications.push(notification);
            Ok(id)
        })
    }

    fn load_notification(&self, notification_id: NotificationId) -> StoreFuture<'_, Notification> {
        Box::pin(async move {
            self.lock()
                .notifications
                .iter()
                .find(|n| n.id == notification_id)
                .cloned()
                .ok_or(StoreError::NotificationNotFound(notification_id))
        })
    }

    fn query_notifications(
        &self,
        event_id: EventId,
        state: Option<ResponseState>,
    ) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .notifications
                .iter()
                .filter(|n| n.event_id == event_id)
                .filter(|n| state.is_none_or(|wanted| n.response_state == wanted))
                .cloned()
                .collect())
        })
    }

    fn notifications_for_entrant(&self, entrant_id: EntrantId) -> StoreFuture<'_, Vec<Notification>> {
        Box::pin(async move {
            Ok(self
                .lock()
                .notifications
                .iter()
                .filter(|n| n.entrant_id == entrant_id)
                .cloned()
                .collect())
        })
    }
}

/// A delivery captured by [`RecordingDispatcher`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentMessage {
    /// Committed notification id
    pub notification_id: NotificationId,
    /// Addressee
    pub entrant_id: EntrantId,
    /// Message text
    pub message: String,
}

/// Dispatcher that records every send.
///
/// A failing dispatcher still records the attempt, then returns
/// `DeliveryFailed`.
#[derive(Clone, Debug, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<SentMessage>>>,
    failing: bool,
}

impl RecordingDispatcher {
    /// Dispatcher that accepts every message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher that rejects every message.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            sent: Arc::default(),
            failing: true,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<SentMessage>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every send attempt, in order.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().clone()
    }

    /// Messages addressed to `entrant_id`.
    #[must_use]
    pub fn messages_for(&self, entrant_id: &EntrantId) -> Vec<String> {
        self.lock()
            .iter()
            .filter(|sent| &sent.entrant_id == entrant_id)
            .map(|sent| sent.message.clone())
            .collect()
    }
}

impl NotificationDispatcher for RecordingDispatcher {
    fn send(
        &self,
        notification_id: NotificationId,
        entrant_id: EntrantId,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        Box::pin(async move {
            self.lock().push(SentMessage {
                notification_id,
                entrant_id: entrant_id.clone(),
                message,
            });
            if self.failing {
                return Err(DispatchError::DeliveryFailed {
                    entrant_id,
                    reason: "recording dispatcher configured to fail".to_string(),
                });
            }
            Ok(())
        })
    }
}
