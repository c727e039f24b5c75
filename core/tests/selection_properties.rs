//! Property tests: random operation sequences against the reducer.
//!
//! Each sequence is driven the way the engine drives it: reduce a scratch
//! copy, keep it only on success, and apply the committed effects to a local
//! notification table.

#![allow(clippy::unwrap_used)]

use enrollment_core::capacity::SamplingRequest;
use enrollment_core::effect::Effect;
use enrollment_core::event::EventRecord;
use enrollment_core::ids::{EntrantId, EventId};
use enrollment_core::notification::{Notification, ResponseState};
use enrollment_core::reducer::Reducer;
use enrollment_core::selection::{SelectionAction, SelectionReducer};
use enrollment_testing::properties::{Step, entrant_ids, steps};
use enrollment_testing::{EventBuilder, test_environment};
use proptest::prelude::*;
use std::collections::HashSet;

const POPULATION: usize = 12;

struct Harness {
    event: EventRecord,
    notifications: Vec<Notification>,
    entrants: Vec<EntrantId>,
    seed: u64,
}

impl Harness {
    fn new(chosen: u32, limit: Option<u32>, seed: u64) -> Self {
        let mut builder = EventBuilder::new("evt").chosen(chosen);
        if let Some(limit) = limit {
            builder = builder.waiting_limit(limit);
        }
        Self {
            event: builder.build(),
            notifications: Vec::new(),
            entrants: entrant_ids(POPULATION),
            seed,
        }
    }

    fn action_for(&self, step: &Step) -> Option<SelectionAction> {
        let action = match step {
            Step::Join(i) => SelectionAction::Join { entrant_id: self.entrants[*i].clone() },
            Step::Withdraw(i) => SelectionAction::Withdraw { entrant_id: self.entrants[*i].clone() },
            Step::RunLottery(n) => {
                SelectionAction::RunLottery(SamplingRequest::new(EventId::new("evt"), *n).ok()?)
            },
            Step::Respond(i, accepted) => {
                let invitations: Vec<&Notification> = self
                    .notifications
                    .iter()
                    .filter(|n| n.kind.expects_response())
                    .collect();
                if invitations.is_empty() {
                    return None;
                }
                SelectionAction::RecordResponse {
                    notification: invitations[i % invitations.len()].clone(),
                    accepted: *accepted,
                }
            },
            Step::Backfill(i) => SelectionAction::Backfill { entrant_id: self.entrants[*i].clone() },
            Step::Finalize => SelectionAction::Finalize {
                accepted: self
                    .notifications
                    .iter()
                    .filter(|n| n.response_state == ResponseState::Accepted)
                    .map(|n| n.entrant_id.clone())
                    .collect(),
            },
        };
        Some(action)
    }

    /// Returns the committed effects, or `None` if the step was rejected.
    fn apply(&mut self, step: &Step) -> Option<Vec<Effect>> {
        let action = self.action_for(step)?;
        self.seed = self.seed.wrapping_add(1);
        let mut scratch = self.event.clone();
        let effects = SelectionReducer
            .reduce(&mut scratch, action, &test_environment(self.seed))
            .ok()?;

        self.event = scratch;
        for effect in &effects {
            match effect {
                Effect::Notify(notification) => self.notifications.push(notification.clone()),
                Effect::RecordResponse(update) => {
                    let stored = self
                        .notifications
                        .iter_mut()
                        .find(|n| n.id == update.notification_id)
                        .unwrap();
                    assert_eq!(stored.response_state, update.expected);
                    stored.apply(update);
                },
                Effect::None => {},
            }
        }
        Some(effects.into_vec())
    }
}

fn chosen_amount() -> impl Strategy<Value = u32> {
    1_u32..5
}

fn waiting_limit() -> impl Strategy<Value = Option<u32>> {
    prop::option::of(1_u32..8)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn pools_stay_disjoint(
        chosen in chosen_amount(),
        limit in waiting_limit(),
        seed in any::<u64>(),
        script in steps(POPULATION, 60),
    ) {
        let mut harness = Harness::new(chosen, limit, seed);
        for step in &script {
            harness.apply(step);
            prop_assert!(harness.event.is_disjoint(), "overlap after {:?}: {:?}", step, harness.event.find_overlap());
        }
    }

    #[test]
    fn selected_never_exceeds_chosen_amount(
        chosen in chosen_amount(),
        seed in any::<u64>(),
        script in steps(POPULATION, 60),
    ) {
        let mut harness = Harness::new(chosen, None, seed);
        for step in &script {
            harness.apply(step);
            prop_assert!(harness.event.selected().len() <= chosen as usize);
        }
    }

    #[test]
    fn waiting_never_exceeds_limit(
        limit in 1_u32..6,
        seed in any::<u64>(),
        script in steps(POPULATION, 60),
    ) {
        let mut harness = Harness::new(2, Some(limit), seed);
        for step in &script {
            harness.apply(step);
            prop_assert!(harness.event.waiting().len() <= limit as usize);
        }
    }

    #[test]
    fn finalized_event_is_frozen(
        chosen in chosen_amount(),
        seed in any::<u64>(),
        script in steps(POPULATION, 80),
    ) {
        let mut harness = Harness::new(chosen, None, seed);
        let mut frozen: Option<EventRecord> = None;
        for step in &script {
            let committed = harness.apply(step);
            if let Some(snapshot) = &frozen {
                prop_assert!(committed.is_none(), "{:?} committed on a closed event", step);
                prop_assert_eq!(&harness.event, snapshot);
            } else if harness.event.is_closed() {
                prop_assert!(harness.event.waiting().is_empty());
                prop_assert!(harness.event.selected().is_empty());
                frozen = Some(harness.event.clone());
            }
        }
    }

    #[test]
    fn duplicate_decline_backfills_once(
        seed in any::<u64>(),
        extra in 1_usize..6,
    ) {
        let mut harness = Harness::new(2, None, seed);
        for i in 0..(2 + extra) {
            harness.apply(&Step::Join(i));
        }
        harness.apply(&Step::RunLottery(2));
        let declined = harness.notifications[0].clone();

        let first = harness.apply(&Step::Respond(0, false)).unwrap();
        let replacements = first.iter().filter(|e| e.as_notification().is_some()).count();
        prop_assert_eq!(replacements, 1);

        let mut replay = harness.event.clone();
        let stale = SelectionAction::RecordResponse {
            notification: harness.notifications.iter().find(|n| n.id == declined.id).unwrap().clone(),
            accepted: false,
        };
        let second = SelectionReducer.reduce(&mut replay, stale, &test_environment(seed)).unwrap();
        prop_assert!(second.is_empty());
        prop_assert_eq!(replay, harness.event.clone());
    }
}

#[test]
fn scenario_draw_decline_backfill() {
    let mut harness = Harness::new(2, None, 5);
    for i in 0..4 {
        harness.apply(&Step::Join(i));
    }
    let before: HashSet<EntrantId> = harness.event.waiting().clone();

    harness.apply(&Step::RunLottery(2)).unwrap();
    assert_eq!(harness.event.selected().len(), 2);
    assert_eq!(harness.event.waiting().len(), 2);

    let decliner = harness.notifications[0].entrant_id.clone();
    harness.apply(&Step::Respond(0, false)).unwrap();

    assert!(harness.event.cancelled().contains(&decliner));
    assert_eq!(harness.event.selected().len(), 2);
    assert_eq!(harness.event.waiting().len(), 1);
    let all: HashSet<EntrantId> = harness
        .event
        .selected()
        .union(harness.event.waiting())
        .chain(harness.event.cancelled())
        .cloned()
        .collect();
    assert_eq!(all, before);
}
