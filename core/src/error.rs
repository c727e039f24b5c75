//! Error taxonomy for enrollment operations.
//!
//! [`ValidationError`] covers bad input and is raised before any store access.
//! [`SelectionError`] is what every engine operation returns; it wraps
//! validation failures and adds the state-machine rejections and the
//! transient [`SelectionError::StoreUnavailable`].

use crate::event::{Membership, Pool};
use crate::event_store::StoreError;
use crate::ids::{EntrantId, EventId, NotificationId};
use crate::registry::RegistryError;
use thiserror::Error;

/// Rejected input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Requested a negative number of draws.
    #[error("Invalid sample size: {0} (must be non-negative)")]
    InvalidSampleSize(i64),

    /// `chosenAmount` must be at least one.
    #[error("Invalid chosen amount: {0} (must be greater than zero)")]
    InvalidChosenAmount(u32),

    /// `waitingListLimit`, when set, must be at least one.
    #[error("Invalid waiting list limit: {0} (must be greater than zero)")]
    InvalidWaitingListLimit(u32),

    /// Event titles are used in messages and cannot be blank.
    #[error("Event title cannot be empty")]
    EmptyTitle,

    /// No event with this id.
    #[error("Event not found: {0}")]
    EventNotFound(EventId),

    /// An event with this id already exists.
    #[error("Event already exists: {0}")]
    EventAlreadyExists(EventId),

    /// No notification with this id.
    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    /// The notification does not accept responses.
    #[error("Notification {0} is not an invitation")]
    NotAnInvitation(NotificationId),
}

/// Coarse classification of a [`SelectionError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input, rejected before touching the store
    Validation,
    /// A state precondition did not hold
    StateConflict,
    /// The waiting list is full
    CapacityExceeded,
    /// The store could not commit after bounded retries
    StoreUnavailable,
    /// Finalization found no accepted entrants
    NoAcceptedEntrants,
}

impl ErrorKind {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::StateConflict => "state_conflict",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::StoreUnavailable => "store_unavailable",
            Self::NoAcceptedEntrants => "no_accepted_entrants",
        }
    }
}

/// Failure of an enrollment operation.
///
/// No variant implies a partial commit: every operation either commits in
/// full or leaves the event untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SelectionError {
    /// Bad input.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The entrant is not where the operation requires.
    #[error("Entrant {entrant_id} is not a member of {expected} (currently {actual})")]
    NotAMember {
        /// The entrant
        entrant_id: EntrantId,
        /// Required pool
        expected: Pool,
        /// Actual membership
        actual: Membership,
    },

    /// The entrant already has a membership that blocks the operation.
    #[error("Entrant {entrant_id} is already a member of {pool}")]
    AlreadyMember {
        /// The entrant
        entrant_id: EntrantId,
        /// Pool the entrant occupies
        pool: Pool,
    },

    /// The event has been finalized.
    #[error("Event {0} is closed")]
    EventClosed(EventId),

    /// Withdraw requires the entrant to be waiting.
    #[error("Entrant {entrant_id} is not in the waiting list (currently {membership})")]
    NotInWaitingList {
        /// The entrant
        entrant_id: EntrantId,
        /// Actual membership
        membership: Membership,
    },

    /// The waiting list is at its limit.
    #[error("Waiting list for event {event_id} is full (limit {limit})")]
    CapacityExceeded {
        /// The event
        event_id: EventId,
        /// Configured waiting-list limit
        limit: u32,
    },

    /// Finalization with nobody accepted.
    #[error("Event {0} has no accepted entrants")]
    NoAcceptedEntrants(EventId),

    /// The store could not commit after bounded retries.
    #[error("Store unavailable after {attempts} attempt(s): {reason}")]
    StoreUnavailable {
        /// Attempts made, including the first
        attempts: u32,
        /// Last store error
        reason: String,
    },
}

impl SelectionError {
    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotAMember { .. }
            | Self::AlreadyMember { .. }
            | Self::EventClosed(_)
            | Self::NotInWaitingList { .. } => ErrorKind::StateConflict,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::StoreUnavailable { .. } => ErrorKind::StoreUnavailable,
            Self::NoAcceptedEntrants(_) => ErrorKind::NoAcceptedEntrants,
        }
    }

    /// Whether the caller may safely retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::StoreUnavailable { .. })
    }

    /// Map a store error surfaced after `attempts` tries.
    #[must_use]
    pub fn from_store(error: StoreError, attempts: u32) -> Self {
        match error {
            StoreError::EventNotFound(id) => ValidationError::EventNotFound(id).into(),
            StoreError::EventExists(id) => ValidationError::EventAlreadyExists(id).into(),
            StoreError::NotificationNotFound(id) => ValidationError::NotificationNotFound(id).into(),
            other => Self::StoreUnavailable {
                attempts,
                reason: other.to_string(),
            },
        }
    }
}

impl From<RegistryError> for SelectionError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::NotAMember {
                entrant_id,
                expected,
                actual,
            } => Self::NotAMember {
                entrant_id,
                expected,
                actual,
            },
            RegistryError::AlreadyMember { entrant_id, pool } => {
                Self::AlreadyMember { entrant_id, pool }
            },
        }
    }
}

impl From<StoreError> for SelectionError {
    fn from(error: StoreError) -> Self {
        Self::from_store(error, 1)
    }
}
