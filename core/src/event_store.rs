//! Event store capability consumed by the selection engine.
//!
//! The store holds one versioned [`EventRecord`] per event plus the
//! notification records created for it. It is owned by an external
//! collaborator; this module defines only the contract the engine relies on.
//!
//! # Transactions
//!
//! Every mutating engine operation is one optimistic read-modify-write:
//!
//! 1. [`EventStore::load_event`] returns the record and its [`Version`]
//! 2. the engine decides against that exact snapshot
//! 3. [`EventStore::commit`] writes an [`EventWrite`] only if the record is
//!    still at the expected version
//!
//! A commit applies the new record, the new notifications and the response
//! updates all-or-nothing. A concurrent writer causes
//! [`StoreError::ConcurrencyConflict`] and nothing is applied, so the engine
//! can retry from a fresh read.
//!
//! # Implementations
//!
//! - `InMemoryEventStore` (in `enrollment-testing` crate): versioned
//!   compare-and-swap with fault injection for tests and the demo
//!
//! # Example
//!
//! ```no_run
//! use enrollment_core::event_store::{EventStore, EventWrite, StoreError};
//! use enrollment_core::ids::EventId;
//!
//! async fn touch<S: EventStore + ?Sized>(store: &S) -> Result<(), StoreError> {
//!     let loaded = store.load_event(EventId::new("pottery-night")).await?;
//!     let write = EventWrite::new(loaded.record.clone());
//!     store.commit(loaded.version, write).await?;
//!     Ok(())
//! }
//! ```

use crate::event::EventRecord;
use crate::ids::{EntrantId, EventId, NotificationId};
use crate::notification::{Notification, ResponseState, ResponseUpdate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Version number of an event record, for optimistic concurrency.
///
/// A record is created at [`Version::INITIAL`] and every successful commit
/// increments it by one.
///
/// ```
/// use enrollment_core::event_store::Version;
///
/// let v0 = Version::INITIAL;
/// assert_eq!(v0.next(), Version::new(1));
/// assert!(v0.is_initial());
/// ```
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// The version of a freshly created record.
    pub const INITIAL: Self = Self(0);

    /// Create a new `Version` with the given value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the version number as a `u64`.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The version after one more commit.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Whether this is the creation version.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// A record together with the version it was read at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VersionedEvent {
    /// Version at read time
    pub version: Version,
    /// The record
    pub record: EventRecord,
}

/// Everything one transaction writes, applied all-or-nothing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventWrite {
    /// Replacement record
    pub record: EventRecord,
    /// Notifications to create
    pub notifications: Vec<Notification>,
    /// Response transitions to apply
    pub responses: Vec<ResponseUpdate>,
}

impl EventWrite {
    /// A write that replaces the record only.
    #[must_use]
    pub const fn new(record: EventRecord) -> Self {
        Self {
            record,
            notifications: Vec::new(),
            responses: Vec::new(),
        }
    }

    /// Add a notification to create in the same commit.
    #[must_use]
    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.notifications.push(notification);
        self
    }

    /// Add a response transition to apply in the same commit.
    #[must_use]
    pub fn with_response(mut self, update: ResponseUpdate) -> Self {
        self.responses.push(update);
        self
    }
}

/// Errors that can occur during store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The record moved past the expected version; nothing was written.
    #[error("Concurrency conflict on event {event_id}: expected version {expected}, found {actual}")]
    ConcurrencyConflict {
        /// The event being written
        event_id: EventId,
        /// Version the writer read
        expected: Version,
        /// Version currently stored
        actual: Version,
    },

    /// A response update found the notification in a different state.
    #[error("Response conflict on notification {notification_id}: expected {expected}, found {actual}")]
    ResponseConflict {
        /// The notification being answered
        notification_id: NotificationId,
        /// State the writer read
        expected: ResponseState,
        /// State currently stored
        actual: ResponseState,
    },

    /// No event with this id.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// An event with this id already exists.
    #[error("Event already exists: {0}")]
    EventExists(EventId),

    /// No notification with this id.
    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Whether retrying from a fresh read may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::ResponseConflict { .. } | Self::Unavailable(_)
        )
    }

    /// Whether this is an optimistic-concurrency conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. } | Self::ResponseConflict { .. })
    }
}

/// Transactional document store for events and notifications.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`; the engine shares one store across
/// concurrent callers.
///
/// # Dyn Compatibility
///
/// Methods return `Pin<Box<dyn Future>>` instead of using `async fn` so the
/// trait can be used as `Arc<dyn EventStore>`.
pub trait EventStore: Send + Sync {
    /// Insert a new record at [`Version::INITIAL`].
    ///
    /// # Errors
    ///
    /// - `EventExists`: a record with the same id is already stored
    /// - `Unavailable`: the store could not be reached
    fn create_event(&self, record: EventRecord) -> StoreFuture<'_, Version>;

    /// Read the current record and its version.
    ///
    /// # Errors
    ///
    /// - `EventNotFound`: no record with this id
    /// - `Unavailable`: the store could not be reached
    fn load_event(&self, event_id: EventId) -> StoreFuture<'_, VersionedEvent>;

    /// Apply `write` if the record is still at `expected_version`.
    ///
    /// Returns the new version. On any error nothing is applied.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict`: the record is no longer at `expected_version`
    /// - `ResponseConflict`: a response update's expected state is stale
    /// - `NotificationNotFound`: a response update names an unknown notification
    /// - `EventNotFound`: the record does not exist
    /// - `Unavailable`: the store could not be reached
    fn commit(&self, expected_version: Version, write: EventWrite) -> StoreFuture<'_, Version>;

    /// Store a notification outside of an event commit.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn create_notification(&self, notification: Notification) -> StoreFuture<'_, NotificationId>;

    /// Read one notification.
    ///
    /// # Errors
    ///
    /// - `NotificationNotFound`: no notification with this id
    /// - `Unavailable`: the store could not be reached
    fn load_notification(&self, notification_id: NotificationId) -> StoreFuture<'_, Notification>;

    /// Notifications for an event, optionally filtered by response state.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn query_notifications(
        &self,
        event_id: EventId,
        state: Option<ResponseState>,
    ) -> StoreFuture<'_, Vec<Notification>>;

    /// Every notification addressed to an entrant, across events.
    ///
    /// # Errors
    ///
    /// - `Unavailable`: the store could not be reached
    fn notifications_for_entrant(&self, entrant_id: EntrantId) -> StoreFuture<'_, Vec<Notification>>;
}
