//! The selection state machine.
//!
//! [`SelectionReducer`] applies one [`SelectionAction`] to an [`EventRecord`]
//! snapshot. It validates every precondition against that snapshot, mutates
//! the pools through the registry, and returns the notifications and
//! response transitions that must be committed together with the new record.
//!
//! Per-entrant lifecycle:
//!
//! ```text
//! Waiting ──draw──▶ Selected ──accept + finalize──▶ Final
//!    │                  │
//!    └─withdraw─┐       └─decline──▶ Cancelled (+ one replacement drawn)
//!               ▼
//!           Cancelled
//! ```

use crate::capacity::{can_join_waiting, remaining_selection_slots, SamplingRequest};
use crate::effect::Effect;
use crate::environment::{Clock, RandomSource};
use crate::error::{SelectionError, ValidationError};
use crate::event::{EventRecord, Membership, Pool};
use crate::ids::EntrantId;
use crate::notification::Notification;
use crate::reducer::Reducer;
use crate::sampler::LotterySampler;
use smallvec::SmallVec;
use std::collections::HashSet;
use std::sync::Arc;

/// One enrollment operation against one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SelectionAction {
    /// Add a new entrant to the waiting pool.
    Join {
        /// The joining entrant
        entrant_id: EntrantId,
    },

    /// Move a waiting entrant to cancelled.
    Withdraw {
        /// The withdrawing entrant
        entrant_id: EntrantId,
    },

    /// Draw up to the requested number of waiting entrants.
    RunLottery(SamplingRequest),

    /// Record an answer to an invitation, backfilling on decline.
    ///
    /// `notification` is the record as read after the event snapshot.
    RecordResponse {
        /// The invitation being answered
        notification: Notification,
        /// The entrant's answer
        accepted: bool,
    },

    /// Cancel a selected entrant and draw one replacement.
    Backfill {
        /// The selected entrant giving up their slot
        entrant_id: EntrantId,
    },

    /// Close the event with the given confirmed entrants.
    Finalize {
        /// Entrants whose invitations for this event are `Accepted`
        accepted: HashSet<EntrantId>,
    },
}

impl SelectionAction {
    /// Stable operation name for logs and metrics.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Withdraw { .. } => "withdraw",
            Self::RunLottery(_) => "run_lottery",
            Self::RecordResponse { .. } => "record_response",
            Self::Backfill { .. } => "backfill",
            Self::Finalize { .. } => "finalize",
        }
    }
}

/// Injected dependencies of the selection reducer.
#[derive(Clone)]
pub struct SelectionEnvironment {
    /// Time source for notification and finalization stamps
    pub clock: Arc<dyn Clock>,
    /// Randomness for lottery and backfill draws
    pub random: Arc<dyn RandomSource>,
}

impl SelectionEnvironment {
    /// Creates a new `SelectionEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, random: Arc<dyn RandomSource>) -> Self {
        Self { clock, random }
    }
}

impl std::fmt::Debug for SelectionEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionEnvironment").finish_non_exhaustive()
    }
}

type Effects = SmallVec<[Effect; 4]>;

/// Pure selection state machine.
#[derive(Clone, Copy, Debug, Default)]
pub struct SelectionReducer;

impl Reducer for SelectionReducer {
    type State = EventRecord;
    type Action = SelectionAction;
    type Environment = SelectionEnvironment;
    type Error = SelectionError;

    fn reduce(
        &self,
        state: &mut EventRecord,
        action: SelectionAction,
        env: &SelectionEnvironment,
    ) -> Result<Effects, SelectionError> {
        if state.is_closed() {
            return Err(SelectionError::EventClosed(state.id().clone()));
        }

        match action {
            SelectionAction::Join { entrant_id } => join(state, entrant_id),
            SelectionAction::Withdraw { entrant_id } => withdraw(state, &entrant_id),
            SelectionAction::RunLottery(request) => run_lottery(state, &request, env),
            SelectionAction::RecordResponse {
                notification,
                accepted,
            } => record_response(state, &notification, accepted, env),
            SelectionAction::Backfill { entrant_id } => {
                let mut effects = Effects::new();
                backfill(state, &entrant_id, env, &mut effects)?;
                Ok(effects)
            },
            SelectionAction::Finalize { accepted } => finalize(state, &accepted, env),
        }
    }
}

fn join(state: &mut EventRecord, entrant_id: EntrantId) -> Result<Effects, SelectionError> {
    if let Some(pool) = state.membership_of(&entrant_id).pool() {
        return Err(SelectionError::AlreadyMember { entrant_id, pool });
    }
    if !can_join_waiting(state) {
        return Err(SelectionError::CapacityExceeded {
            event_id: state.id().clone(),
            limit: state.policy().waiting_list_limit.unwrap_or_default(),
        });
    }

    tracing::debug!(event_id = %state.id(), entrant_id = %entrant_id, "entrant joined waiting list");
    state.admit(entrant_id)?;
    Ok(Effects::new())
}

fn withdraw(state: &mut EventRecord, entrant_id: &EntrantId) -> Result<Effects, SelectionError> {
    let membership = state.membership_of(entrant_id);
    if membership != Membership::Waiting {
        return Err(SelectionError::NotInWaitingList {
            entrant_id: entrant_id.clone(),
            membership,
        });
    }

    state.move_entrant(entrant_id, Pool::Waiting, Pool::Cancelled)?;
    tracing::debug!(event_id = %state.id(), entrant_id = %entrant_id, "entrant withdrew");
    Ok(Effects::new())
}

fn run_lottery(
    state: &mut EventRecord,
    request: &SamplingRequest,
    env: &SelectionEnvironment,
) -> Result<Effects, SelectionError> {
    let k = request.effective_count(state);
    let drawn = LotterySampler::sample(state.waiting(), k, env.random.as_ref());
    let now = env.clock.now();

    let mut effects = Effects::with_capacity(drawn.len());
    for entrant_id in drawn {
        state.move_entrant(&entrant_id, Pool::Waiting, Pool::Selected)?;
        effects.push(Effect::Notify(Notification::invitation(
            state.id().clone(),
            entrant_id,
            state.title(),
            now,
        )));
    }
    state.lottery_runs += 1;

    tracing::debug!(
        event_id = %state.id(),
        requested = request.requested().get(),
        drawn = effects.len(),
        selected = state.selected().len(),
        "lottery drawn"
    );
    Ok(effects)
}

fn record_response(
    state: &mut EventRecord,
    notification: &Notification,
    accepted: bool,
    env: &SelectionEnvironment,
) -> Result<Effects, SelectionError> {
    if !notification.kind.expects_response() {
        return Err(ValidationError::NotAnInvitation(notification.id).into());
    }

    let mut effects = Effects::new();
    if notification.response_state.is_terminal() {
        tracing::debug!(
            notification_id = %notification.id,
            state = %notification.response_state,
            "response already recorded"
        );
        return Ok(effects);
    }

    effects.push(Effect::RecordResponse(
        notification.respond(accepted, env.clock.now()),
    ));

    if !accepted {
        let entrant_id = &notification.entrant_id;
        if state.membership_of(entrant_id) == Membership::Selected {
            backfill(state, entrant_id, env, &mut effects)?;
        } else {
            tracing::debug!(
                event_id = %state.id(),
                entrant_id = %entrant_id,
                "declining entrant is no longer selected; no backfill"
            );
        }
    }
    Ok(effects)
}

fn backfill(
    state: &mut EventRecord,
    entrant_id: &EntrantId,
    env: &SelectionEnvironment,
    effects: &mut Effects,
) -> Result<(), SelectionError> {
    state.move_entrant(entrant_id, Pool::Selected, Pool::Cancelled)?;

    let k = remaining_selection_slots(state).min(1);
    let drawn = LotterySampler::sample(state.waiting(), k, env.random.as_ref());
    if drawn.is_empty() {
        tracing::debug!(event_id = %state.id(), entrant_id = %entrant_id, "slot left unfilled");
        return Ok(());
    }

    let now = env.clock.now();
    for replacement in drawn {
        state.move_entrant(&replacement, Pool::Waiting, Pool::Selected)?;
        tracing::debug!(
            event_id = %state.id(),
            cancelled = %entrant_id,
            replacement = %replacement,
            "replacement drawn"
        );
        effects.push(Effect::Notify(Notification::replacement(
            state.id().clone(),
            replacement,
            state.title(),
            now,
        )));
    }
    Ok(())
}

fn finalize(
    state: &mut EventRecord,
    accepted: &HashSet<EntrantId>,
    env: &SelectionEnvironment,
) -> Result<Effects, SelectionError> {
    let mut confirmed: Vec<EntrantId> = accepted
        .iter()
        .filter(|entrant_id| state.selected().contains(*entrant_id))
        .cloned()
        .collect();
    if confirmed.is_empty() {
        return Err(SelectionError::NoAcceptedEntrants(state.id().clone()));
    }
    confirmed.sort_unstable();

    for entrant_id in &confirmed {
        state.move_entrant(entrant_id, Pool::Selected, Pool::Final)?;
    }
    let unconfirmed = state.drain_into(Pool::Selected, Pool::Cancelled);
    let unselected = state.drain_into(Pool::Waiting, Pool::Cancelled);
    state.finalized_at = Some(env.clock.now());

    tracing::debug!(
        event_id = %state.id(),
        finalized = confirmed.len(),
        unconfirmed,
        unselected,
        "event finalized"
    );
    Ok(Effects::new())
}
