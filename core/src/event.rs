//! The event record: capacity policy plus the four entrant pools.
//!
//! An [`EventRecord`] is the unit of consistency. Every enrollment operation
//! reads one record, decides against that exact snapshot, and writes the
//! whole record back under an optimistic version check.
//!
//! The pools are private so that membership can only change through the
//! registry operations in [`crate::registry`], which maintain pairwise
//! disjointness.

use crate::ids::{EntrantId, EventId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ============================================================================
// Pools and membership
// ============================================================================

/// One of the four disjoint entrant pools of an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Pool {
    /// Joined, not yet drawn
    Waiting,
    /// Drawn, asked to confirm
    Selected,
    /// Withdrew, declined, or was not chosen at finalization
    Cancelled,
    /// Confirmed and committed at finalization
    Final,
}

impl Pool {
    /// All pools in lifecycle order.
    pub const ALL: [Self; 4] = [Self::Waiting, Self::Selected, Self::Cancelled, Self::Final];

    /// Stable lowercase name (matches the persisted field name).
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Selected => "selected",
            Self::Cancelled => "cancelled",
            Self::Final => "final",
        }
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived view of where an entrant currently sits for one event.
///
/// Always recomputed from the record's pools, never stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Membership {
    /// In the waiting pool
    Waiting,
    /// In the selected pool
    Selected,
    /// In the cancelled pool
    Cancelled,
    /// In the final list
    Final,
    /// Not a member of any pool
    None,
}

impl Membership {
    /// The pool this membership corresponds to, if any.
    #[must_use]
    pub const fn pool(self) -> Option<Pool> {
        match self {
            Self::Waiting => Some(Pool::Waiting),
            Self::Selected => Some(Pool::Selected),
            Self::Cancelled => Some(Pool::Cancelled),
            Self::Final => Some(Pool::Final),
            Self::None => None,
        }
    }

    /// Whether the entrant is in any pool.
    #[must_use]
    pub const fn is_member(self) -> bool {
        !matches!(self, Self::None)
    }
}

impl From<Pool> for Membership {
    fn from(pool: Pool) -> Self {
        match pool {
            Pool::Waiting => Self::Waiting,
            Pool::Selected => Self::Selected,
            Pool::Cancelled => Self::Cancelled,
            Pool::Final => Self::Final,
        }
    }
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.pool() {
            Some(pool) => write!(f, "{pool}"),
            None => f.write_str("none"),
        }
    }
}

// ============================================================================
// Capacity policy
// ============================================================================

/// Per-event limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacityPolicy {
    /// Target number of selected entrants
    pub chosen_amount: u32,
    /// Optional cap on the waiting pool
    pub waiting_list_limit: Option<u32>,
}

impl CapacityPolicy {
    /// Policy with a chosen-count target and no waiting-list cap.
    #[must_use]
    pub const fn new(chosen_amount: u32) -> Self {
        Self {
            chosen_amount,
            waiting_list_limit: None,
        }
    }

    /// Add a waiting-list cap.
    #[must_use]
    pub const fn with_waiting_list_limit(mut self, limit: u32) -> Self {
        self.waiting_list_limit = Some(limit);
        self
    }
}

// ============================================================================
// Event record
// ============================================================================

/// Fields supplied by the event creation flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    /// Event identifier chosen by the creator
    pub id: EventId,
    /// Human-readable title, used in notification messages
    pub title: String,
    /// Capacity limits
    #[serde(flatten)]
    pub policy: CapacityPolicy,
}

impl EventDraft {
    /// Creates a new `EventDraft`
    #[must_use]
    pub fn new(id: EventId, title: impl Into<String>, policy: CapacityPolicy) -> Self {
        Self {
            id,
            title: title.into(),
            policy,
        }
    }
}

/// Persisted event state.
///
/// Invariant: `waiting`, `selected`, `cancelled` and `final` are pairwise
/// disjoint. The event is closed once `final` is non-empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    id: EventId,
    title: String,
    #[serde(flatten)]
    policy: CapacityPolicy,
    pub(crate) waiting: HashSet<EntrantId>,
    pub(crate) selected: HashSet<EntrantId>,
    pub(crate) cancelled: HashSet<EntrantId>,
    #[serde(rename = "final")]
    pub(crate) final_entrants: HashSet<EntrantId>,
    pub(crate) lottery_runs: u32,
    created_at: DateTime<Utc>,
    pub(crate) finalized_at: Option<DateTime<Utc>>,
}

impl EventRecord {
    /// Create an open event with empty pools.
    #[must_use]
    pub fn new(
        id: EventId,
        title: impl Into<String>,
        policy: CapacityPolicy,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            policy,
            waiting: HashSet::new(),
            selected: HashSet::new(),
            cancelled: HashSet::new(),
            final_entrants: HashSet::new(),
            lottery_runs: 0,
            created_at,
            finalized_at: None,
        }
    }

    /// Create an open event from a creation draft.
    #[must_use]
    pub fn from_draft(draft: EventDraft, created_at: DateTime<Utc>) -> Self {
        Self::new(draft.id, draft.title, draft.policy, created_at)
    }

    /// Event identifier
    #[must_use]
    pub const fn id(&self) -> &EventId {
        &self.id
    }

    /// Event title
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Capacity limits
    #[must_use]
    pub const fn policy(&self) -> &CapacityPolicy {
        &self.policy
    }

    /// Entrants waiting to be drawn
    #[must_use]
    pub const fn waiting(&self) -> &HashSet<EntrantId> {
        &self.waiting
    }

    /// Entrants drawn and awaiting or holding a confirmation
    #[must_use]
    pub const fn selected(&self) -> &HashSet<EntrantId> {
        &self.selected
    }

    /// Entrants who left the enrollment
    #[must_use]
    pub const fn cancelled(&self) -> &HashSet<EntrantId> {
        &self.cancelled
    }

    /// The committed final list
    #[must_use]
    pub const fn final_entrants(&self) -> &HashSet<EntrantId> {
        &self.final_entrants
    }

    /// Borrow a pool by name.
    #[must_use]
    pub const fn pool(&self, pool: Pool) -> &HashSet<EntrantId> {
        match pool {
            Pool::Waiting => &self.waiting,
            Pool::Selected => &self.selected,
            Pool::Cancelled => &self.cancelled,
            Pool::Final => &self.final_entrants,
        }
    }

    pub(crate) fn pool_mut(&mut self, pool: Pool) -> &mut HashSet<EntrantId> {
        match pool {
            Pool::Waiting => &mut self.waiting,
            Pool::Selected => &mut self.selected,
            Pool::Cancelled => &mut self.cancelled,
            Pool::Final => &mut self.final_entrants,
        }
    }

    /// Number of committed lottery runs.
    #[must_use]
    pub const fn lottery_runs(&self) -> u32 {
        self.lottery_runs
    }

    /// Whether at least one lottery has been committed.
    #[must_use]
    pub const fn already_sampled(&self) -> bool {
        self.lottery_runs > 0
    }

    /// Creation timestamp
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Finalization timestamp, once closed
    #[must_use]
    pub const fn finalized_at(&self) -> Option<DateTime<Utc>> {
        self.finalized_at
    }

    /// An event is closed once its final list is populated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        !self.final_entrants.is_empty()
    }

    /// Total number of entrants across all pools.
    #[must_use]
    pub fn entrant_count(&self) -> usize {
        Pool::ALL.iter().map(|pool| self.pool(*pool).len()).sum()
    }

    /// Check the disjointness invariant.
    ///
    /// Returns the first entrant found in more than one pool.
    #[must_use]
    pub fn find_overlap(&self) -> Option<(EntrantId, Pool, Pool)> {
        for (i, left) in Pool::ALL.iter().enumerate() {
            for right in &Pool::ALL[i + 1..] {
                if let Some(entrant) = self.pool(*left).intersection(self.pool(*right)).next() {
                    return Some((entrant.clone(), *left, *right));
                }
            }
        }
        None
    }

    /// Whether the four pools are pairwise disjoint.
    #[must_use]
    pub fn is_disjoint(&self) -> bool {
        self.find_overlap().is_none()
    }
}
