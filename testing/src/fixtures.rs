//! Event fixtures.
//!
//! [`EventBuilder`] places entrants directly into pools through the public
//! registry operations, so every built record satisfies the disjointness
//! invariant.

#![allow(clippy::missing_panics_doc)] // Fixtures panic on contradictory input

use crate::mocks::test_clock;
use enrollment_core::environment::Clock;
use enrollment_core::event::{CapacityPolicy, EventRecord, Pool};
use enrollment_core::ids::{EntrantId, EventId};

/// Builder for [`EventRecord`] test fixtures.
///
/// ```
/// use enrollment_testing::EventBuilder;
///
/// let event = EventBuilder::new("evt")
///     .chosen(2)
///     .waiting(&["a", "b"])
///     .selected(&["c"])
///     .build();
/// assert_eq!(event.waiting().len(), 2);
/// assert_eq!(event.selected().len(), 1);
/// ```
#[derive(Clone, Debug)]
pub struct EventBuilder {
    id: EventId,
    title: String,
    policy: CapacityPolicy,
    placements: Vec<(EntrantId, Pool)>,
}

impl EventBuilder {
    /// Open event with `chosenAmount = 1` and no waiting-list cap.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: EventId::new(id),
            title: "Pottery Night".to_string(),
            policy: CapacityPolicy::new(1),
            placements: Vec::new(),
        }
    }

    /// Set the title.
    #[must_use]
    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Set `chosenAmount`.
    #[must_use]
    pub const fn chosen(mut self, chosen_amount: u32) -> Self {
        self.policy.chosen_amount = chosen_amount;
        self
    }

    /// Set `waitingListLimit`.
    #[must_use]
    pub const fn waiting_limit(mut self, limit: u32) -> Self {
        self.policy.waiting_list_limit = Some(limit);
        self
    }

    fn place(mut self, pool: Pool, entrants: &[&str]) -> Self {
        self.placements
            .extend(entrants.iter().map(|id| (EntrantId::new(*id), pool)));
        self
    }

    /// Entrants in the waiting pool.
    #[must_use]
    pub fn waiting(self, entrants: &[&str]) -> Self {
        self.place(Pool::Waiting, entrants)
    }

    /// Entrants in the selected pool.
    #[must_use]
    pub fn selected(self, entrants: &[&str]) -> Self {
        self.place(Pool::Selected, entrants)
    }

    /// Entrants in the cancelled pool.
    #[must_use]
    pub fn cancelled(self, entrants: &[&str]) -> Self {
        self.place(Pool::Cancelled, entrants)
    }

    /// Entrants in the final list (closes the event).
    #[must_use]
    pub fn finalized(self, entrants: &[&str]) -> Self {
        self.place(Pool::Final, entrants)
    }

    /// Build the record.
    ///
    /// # Panics
    ///
    /// Panics if an entrant is placed twice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn build(self) -> EventRecord {
        let mut record = EventRecord::new(self.id, self.title, self.policy, test_clock().now());
        for (entrant_id, pool) in self.placements {
            record
                .admit(entrant_id.clone())
                .expect("fixture entrant placed twice");
            if pool != Pool::Waiting {
                record
                    .move_entrant(&entrant_id, Pool::Waiting, pool)
                    .expect("fresh entrant moves out of waiting");
            }
        }
        record
    }
}
