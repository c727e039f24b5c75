//! Capacity checks and the sampling request value object.
//!
//! These are pure functions over an [`EventRecord`] snapshot. The reducer
//! evaluates them against the snapshot it is about to mutate, never against a
//! cached copy.

use crate::error::ValidationError;
use crate::event::EventRecord;
use crate::ids::EventId;

/// `max(0, chosenAmount - |selected|)`.
#[must_use]
pub fn remaining_selection_slots(event: &EventRecord) -> usize {
    as_count(event.policy().chosen_amount).saturating_sub(event.selected().len())
}

/// Whether the waiting pool can take one more entrant.
#[must_use]
pub fn can_join_waiting(event: &EventRecord) -> bool {
    event
        .policy()
        .waiting_list_limit
        .is_none_or(|limit| event.waiting().len() < as_count(limit))
}

fn as_count(value: u32) -> usize {
    usize::try_from(value).unwrap_or(usize::MAX)
}

/// A validated, non-negative number of entrants to draw.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleSize(usize);

impl SampleSize {
    /// Zero draws.
    pub const ZERO: Self = Self(0);

    /// Wrap an already non-negative count.
    #[must_use]
    pub const fn new(count: usize) -> Self {
        Self(count)
    }

    /// The count as `usize`.
    #[must_use]
    pub const fn get(self) -> usize {
        self.0
    }
}

impl TryFrom<i64> for SampleSize {
    type Error = ValidationError;

    fn try_from(requested: i64) -> Result<Self, Self::Error> {
        usize::try_from(requested)
            .map(Self)
            .map_err(|_| ValidationError::InvalidSampleSize(requested))
    }
}

/// Ephemeral request to draw entrants for one event. Never persisted.
///
/// ```
/// use enrollment_core::capacity::SamplingRequest;
/// use enrollment_core::ids::EventId;
///
/// assert!(SamplingRequest::new(EventId::new("evt"), -1).is_err());
/// let request = SamplingRequest::new(EventId::new("evt"), 3).unwrap();
/// assert_eq!(request.requested().get(), 3);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SamplingRequest {
    event_id: EventId,
    requested: SampleSize,
}

impl SamplingRequest {
    /// Validate a raw requested count.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::InvalidSampleSize`] when `requested` is negative.
    pub fn new(event_id: EventId, requested: i64) -> Result<Self, ValidationError> {
        Ok(Self {
            event_id,
            requested: SampleSize::try_from(requested)?,
        })
    }

    /// Build from an already validated size.
    #[must_use]
    pub const fn from_size(event_id: EventId, requested: SampleSize) -> Self {
        Self {
            event_id,
            requested,
        }
    }

    /// Target event
    #[must_use]
    pub const fn event_id(&self) -> &EventId {
        &self.event_id
    }

    /// Count as asked by the organizer
    #[must_use]
    pub const fn requested(&self) -> SampleSize {
        self.requested
    }

    /// Clamp the request to the free slots and the waiting pool size.
    #[must_use]
    pub fn effective_count(&self, event: &EventRecord) -> usize {
        self.requested
            .get()
            .min(remaining_selection_slots(event))
            .min(event.waiting().len())
    }
}
