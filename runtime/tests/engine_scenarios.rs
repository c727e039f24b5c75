//! Integration tests for `SelectionEngine` against the in-memory store.
//!
//! Covers the enrollment day end to end: joins, lottery, responses with
//! backfill, finalization, broadcasts, and the store failure paths.

#![allow(clippy::unwrap_used, clippy::panic)]

use enrollment_core::error::{SelectionError, ValidationError};
use enrollment_core::event::{CapacityPolicy, EventDraft, Membership, Pool};
use enrollment_core::event_store::{EventStore, StoreError};
use enrollment_core::ids::{EntrantId, EventId, NotificationId};
use enrollment_core::notification::{
    NotificationKind, ResponseState, invitation_message, replacement_message,
};
use enrollment_runtime::{ResponseOutcome, RetryPolicy, SelectionEngine};
use enrollment_testing::{InMemoryEventStore, RecordingDispatcher, init_test_tracing, test_environment};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const TITLE: &str = "Beginner Pottery";

fn fast_retry(max_retries: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(5))
        .jitter(false)
        .build()
}

struct Fixture {
    engine: SelectionEngine,
    store: InMemoryEventStore,
    dispatcher: RecordingDispatcher,
    event: EventId,
}

impl Fixture {
    async fn new(policy: CapacityPolicy) -> Self {
        Self::with_dispatcher(policy, RecordingDispatcher::new(), 11).await
    }

    async fn with_dispatcher(policy: CapacityPolicy, dispatcher: RecordingDispatcher, seed: u64) -> Self {
        init_test_tracing();
        let store = InMemoryEventStore::new();
        let engine = SelectionEngine::new(Arc::new(store.clone()), Arc::new(dispatcher.clone()))
            .with_environment(test_environment(seed))
            .with_retry_policy(fast_retry(3));
        let event = EventId::new("pottery");
        engine
            .create_event(EventDraft::new(event.clone(), TITLE, policy))
            .await
            .unwrap();
        Self {
            engine,
            store,
            dispatcher,
            event,
        }
    }

    async fn join_all(&self, entrants: &[&str]) {
        for entrant in entrants {
            self.engine.join(&self.event, &EntrantId::new(*entrant)).await.unwrap();
        }
    }

    fn invitation_for(&self, entrant_id: &EntrantId) -> NotificationId {
        self.store
            .notifications()
            .into_iter()
            .find(|n| &n.entrant_id == entrant_id && n.kind.expects_response())
            .map(|n| n.id)
            .unwrap()
    }

    fn count_kind(&self, kind: NotificationKind) -> usize {
        self.store.notifications().iter().filter(|n| n.kind == kind).count()
    }
}

fn ids(entrants: &[&str]) -> HashSet<EntrantId> {
    entrants.iter().map(|e| EntrantId::new(*e)).collect()
}

mod scenarios {
    use super::*;

    #[tokio::test]
    async fn lottery_then_decline_backfills_one_replacement() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["A", "B", "C", "D"]).await;

        let lottery = fx.engine.run_lottery(&fx.event, 2).await.unwrap();
        assert_eq!(lottery.drawn.len(), 2);

        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert_eq!(event.selected().len(), 2);
        assert_eq!(event.waiting().len(), 2);
        assert_eq!(
            event.selected().union(event.waiting()).cloned().collect::<HashSet<_>>(),
            ids(&["A", "B", "C", "D"])
        );
        for entrant in &lottery.drawn {
            assert_eq!(fx.dispatcher.messages_for(entrant), vec![invitation_message(TITLE)]);
        }

        let decliner = lottery.drawn[0].clone();
        let remaining_waiting = event.waiting().clone();
        let outcome = fx
            .engine
            .record_response(fx.invitation_for(&decliner), false)
            .await
            .unwrap();

        let ResponseOutcome::Recorded { state, replacement } = outcome else {
            panic!("expected a recorded response, got {outcome:?}");
        };
        assert_eq!(state, ResponseState::Declined);
        let replacement = replacement.unwrap();
        assert!(remaining_waiting.contains(&replacement));

        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert_eq!(event.selected().len(), 2);
        assert_eq!(event.waiting().len(), 1);
        assert!(event.cancelled().contains(&decliner));
        assert!(event.selected().contains(&replacement));
        assert!(event.is_disjoint());
        assert_eq!(
            fx.dispatcher.messages_for(&replacement),
            vec![replacement_message(TITLE)]
        );
    }

    #[tokio::test]
    async fn lottery_on_empty_waiting_pool_draws_nobody() {
        let fx = Fixture::new(CapacityPolicy::new(3)).await;

        let outcome = fx.engine.run_lottery(&fx.event, 5).await.unwrap();

        assert!(outcome.drawn.is_empty());
        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert!(event.selected().is_empty());
        assert_eq!(event.lottery_runs(), 1);
        assert!(fx.dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn lottery_clamps_to_remaining_slots() {
        let fx = Fixture::new(CapacityPolicy::new(3)).await;
        fx.join_all(&["a", "b", "c", "d", "e", "f"]).await;

        assert_eq!(fx.engine.run_lottery(&fx.event, 2).await.unwrap().drawn.len(), 2);
        assert_eq!(fx.engine.run_lottery(&fx.event, 10).await.unwrap().drawn.len(), 1);
        assert!(fx.engine.run_lottery(&fx.event, 10).await.unwrap().drawn.is_empty());

        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert_eq!(event.selected().len(), 3);
        assert_eq!(event.lottery_runs(), 3);
        assert_eq!(fx.count_kind(NotificationKind::Invitation), 3);
    }

    #[tokio::test]
    async fn finalize_without_acceptances_keeps_event_open() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b", "c"]).await;
        fx.engine.run_lottery(&fx.event, 2).await.unwrap();

        let err = fx.engine.finalize(&fx.event).await.unwrap_err();

        assert_eq!(err, SelectionError::NoAcceptedEntrants(fx.event.clone()));
        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert!(!event.is_closed());
        assert_eq!(event.selected().len(), 2);
        fx.engine.join(&fx.event, &EntrantId::new("late")).await.unwrap();
    }

    #[tokio::test]
    async fn finalize_closes_the_event() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b", "c", "d"]).await;
        let drawn = fx.engine.run_lottery(&fx.event, 2).await.unwrap().drawn;
        for entrant in &drawn {
            fx.engine
                .record_response(fx.invitation_for(entrant), true)
                .await
                .unwrap();
        }

        let outcome = fx.engine.finalize(&fx.event).await.unwrap();

        let mut expected = drawn.clone();
        expected.sort();
        assert_eq!(outcome.final_entrants, expected);
        assert_eq!(outcome.cancelled, 2);

        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert!(event.is_closed());
        assert!(event.waiting().is_empty());
        assert!(event.selected().is_empty());
        assert!(event.finalized_at().is_some());

        let closed = SelectionError::EventClosed(fx.event.clone());
        let newcomer = EntrantId::new("newcomer");
        assert_eq!(fx.engine.join(&fx.event, &newcomer).await.unwrap_err(), closed);
        assert_eq!(fx.engine.run_lottery(&fx.event, 1).await.unwrap_err(), closed);
        assert_eq!(fx.engine.backfill(&fx.event, &drawn[0]).await.unwrap_err(), closed);
        assert_eq!(fx.engine.finalize(&fx.event).await.unwrap_err(), closed);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap(), event);
    }

    #[tokio::test]
    async fn finalize_confirms_only_accepted_entrants() {
        let fx = Fixture::new(CapacityPolicy::new(3)).await;
        fx.join_all(&["a", "b", "c"]).await;
        let drawn = fx.engine.run_lottery(&fx.event, 3).await.unwrap().drawn;
        fx.engine
            .record_response(fx.invitation_for(&drawn[0]), true)
            .await
            .unwrap();

        let outcome = fx.engine.finalize(&fx.event).await.unwrap();

        assert_eq!(outcome.final_entrants, vec![drawn[0].clone()]);
        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        assert!(event.cancelled().contains(&drawn[1]));
        assert!(event.cancelled().contains(&drawn[2]));
        assert_eq!(
            fx.engine.membership_of(&fx.event, &drawn[0]).await.unwrap(),
            Membership::Final
        );
    }

    #[tokio::test]
    async fn seeded_engines_draw_the_same_entrants() {
        let entrants = ["a", "b", "c", "d", "e", "f", "g", "h"];
        let first = Fixture::with_dispatcher(CapacityPolicy::new(3), RecordingDispatcher::new(), 99).await;
        let second = Fixture::with_dispatcher(CapacityPolicy::new(3), RecordingDispatcher::new(), 99).await;
        first.join_all(&entrants).await;
        second.join_all(&entrants).await;

        let left = first.engine.run_lottery(&first.event, 3).await.unwrap();
        let right = second.engine.run_lottery(&second.event, 3).await.unwrap();

        assert_eq!(left, right);
    }
}

mod membership {
    use super::*;

    #[tokio::test]
    async fn join_twice_is_already_member() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a"]).await;

        let err = fx.engine.join(&fx.event, &EntrantId::new("a")).await.unwrap_err();

        assert_eq!(
            err,
            SelectionError::AlreadyMember {
                entrant_id: EntrantId::new("a"),
                pool: Pool::Waiting,
            }
        );
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().waiting().len(), 1);
    }

    #[tokio::test]
    async fn join_beyond_limit_is_capacity_exceeded() {
        let fx = Fixture::new(CapacityPolicy::new(1).with_waiting_list_limit(2)).await;
        fx.join_all(&["a", "b"]).await;

        let err = fx.engine.join(&fx.event, &EntrantId::new("c")).await.unwrap_err();

        assert_eq!(
            err,
            SelectionError::CapacityExceeded {
                event_id: fx.event.clone(),
                limit: 2,
            }
        );
    }

    #[tokio::test]
    async fn withdraw_moves_waiting_to_cancelled() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a"]).await;
        let a = EntrantId::new("a");

        fx.engine.withdraw(&fx.event, &a).await.unwrap();

        assert_eq!(fx.engine.membership_of(&fx.event, &a).await.unwrap(), Membership::Cancelled);
        let err = fx.engine.join(&fx.event, &a).await.unwrap_err();
        assert_eq!(err.kind().as_str(), "state_conflict");
    }

    #[tokio::test]
    async fn selected_entrant_cannot_withdraw() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.join_all(&["a"]).await;
        fx.engine.run_lottery(&fx.event, 1).await.unwrap();
        let a = EntrantId::new("a");

        let err = fx.engine.withdraw(&fx.event, &a).await.unwrap_err();

        assert_eq!(
            err,
            SelectionError::NotInWaitingList {
                entrant_id: a.clone(),
                membership: Membership::Selected,
            }
        );
        assert_eq!(fx.engine.membership_of(&fx.event, &a).await.unwrap(), Membership::Selected);
    }

    #[tokio::test]
    async fn unknown_entrant_has_no_membership() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        assert_eq!(
            fx.engine.membership_of(&fx.event, &EntrantId::new("ghost")).await.unwrap(),
            Membership::None
        );
    }
}

mod responses {
    use super::*;

    #[tokio::test]
    async fn duplicate_decline_backfills_once() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b", "c", "d"]).await;
        let drawn = fx.engine.run_lottery(&fx.event, 2).await.unwrap().drawn;
        let invitation = fx.invitation_for(&drawn[0]);

        let first = fx.engine.record_response(invitation, false).await.unwrap();
        let second = fx.engine.record_response(invitation, false).await.unwrap();

        assert!(matches!(first, ResponseOutcome::Recorded { replacement: Some(_), .. }));
        assert_eq!(second, ResponseOutcome::AlreadyRecorded(ResponseState::Declined));
        assert_eq!(fx.count_kind(NotificationKind::Replacement), 1);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().waiting().len(), 1);
    }

    #[tokio::test]
    async fn accept_after_decline_is_ignored() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.join_all(&["a", "b"]).await;
        let drawn = fx.engine.run_lottery(&fx.event, 1).await.unwrap().drawn;
        let invitation = fx.invitation_for(&drawn[0]);
        fx.engine.record_response(invitation, false).await.unwrap();

        let outcome = fx.engine.record_response(invitation, true).await.unwrap();

        assert_eq!(outcome, ResponseOutcome::AlreadyRecorded(ResponseState::Declined));
        assert_eq!(
            fx.engine.membership_of(&fx.event, &drawn[0]).await.unwrap(),
            Membership::Cancelled
        );
    }

    #[tokio::test]
    async fn decline_without_waiting_entrants_leaves_slot_unfilled() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b"]).await;
        let drawn = fx.engine.run_lottery(&fx.event, 2).await.unwrap().drawn;

        let outcome = fx
            .engine
            .record_response(fx.invitation_for(&drawn[0]), false)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ResponseOutcome::Recorded {
                state: ResponseState::Declined,
                replacement: None,
            }
        );
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().selected().len(), 1);
    }

    #[tokio::test]
    async fn decline_after_explicit_backfill_draws_nobody_new() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.join_all(&["a", "b", "c"]).await;
        let drawn = fx.engine.run_lottery(&fx.event, 1).await.unwrap().drawn;
        let invitation = fx.invitation_for(&drawn[0]);

        let backfill = fx.engine.backfill(&fx.event, &drawn[0]).await.unwrap();
        assert!(backfill.replacement.is_some());

        let outcome = fx.engine.record_response(invitation, false).await.unwrap();

        assert_eq!(
            outcome,
            ResponseOutcome::Recorded {
                state: ResponseState::Declined,
                replacement: None,
            }
        );
        assert_eq!(fx.count_kind(NotificationKind::Replacement), 1);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().selected().len(), 1);
    }

    #[tokio::test]
    async fn backfill_of_waiting_entrant_is_not_a_member() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.join_all(&["a"]).await;

        let err = fx.engine.backfill(&fx.event, &EntrantId::new("a")).await.unwrap_err();

        assert!(matches!(err, SelectionError::NotAMember { expected: Pool::Selected, .. }));
    }

    #[tokio::test]
    async fn unknown_notification_is_validation_error() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        let missing = NotificationId::new();

        let err = fx.engine.record_response(missing, true).await.unwrap_err();

        assert_eq!(err, SelectionError::Validation(ValidationError::NotificationNotFound(missing)));
    }
}

mod validation {
    use super::*;

    #[tokio::test]
    async fn negative_lottery_count_is_rejected_before_store_access() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.store.inject_unavailable(1);

        let err = fx.engine.run_lottery(&fx.event, -1).await.unwrap_err();

        assert_eq!(err, SelectionError::Validation(ValidationError::InvalidSampleSize(-1)));
        // The injected outage is still armed: nothing touched the store.
        assert!(matches!(
            fx.store.load_event(fx.event.clone()).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn create_event_validates_the_draft() {
        let engine = SelectionEngine::new(
            Arc::new(InMemoryEventStore::new()),
            Arc::new(RecordingDispatcher::new()),
        );
        let id = EventId::new("evt");

        let blank = engine
            .create_event(EventDraft::new(id.clone(), " ", CapacityPolicy::new(1)))
            .await;
        let zero = engine
            .create_event(EventDraft::new(id.clone(), "Swim", CapacityPolicy::new(0)))
            .await;

        assert_eq!(blank.unwrap_err(), SelectionError::Validation(ValidationError::EmptyTitle));
        assert_eq!(
            zero.unwrap_err(),
            SelectionError::Validation(ValidationError::InvalidChosenAmount(0))
        );
    }

    #[tokio::test]
    async fn duplicate_event_is_rejected() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;

        let err = fx
            .engine
            .create_event(EventDraft::new(fx.event.clone(), "Again", CapacityPolicy::new(1)))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            SelectionError::Validation(ValidationError::EventAlreadyExists(fx.event.clone()))
        );
    }

    #[tokio::test]
    async fn unknown_event_is_validation_error() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        let missing = EventId::new("missing");

        let err = fx.engine.join(&missing, &EntrantId::new("a")).await.unwrap_err();

        assert_eq!(err, SelectionError::Validation(ValidationError::EventNotFound(missing)));
        assert!(!err.is_retryable());
    }
}

mod store_failures {
    use super::*;

    #[tokio::test]
    async fn conflicts_are_retried_from_a_fresh_read() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.store.inject_conflicts(2);

        fx.engine.join(&fx.event, &EntrantId::new("a")).await.unwrap();

        assert_eq!(fx.store.rejected_commit_count(), 2);
        assert_eq!(fx.store.commit_count(), 1);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().waiting().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_store_unavailable() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b", "c"]).await;
        let before = fx.engine.snapshot(&fx.event).await.unwrap();
        fx.store.inject_unavailable(u32::MAX);

        let err = fx.engine.run_lottery(&fx.event, 2).await.unwrap_err();

        let SelectionError::StoreUnavailable { attempts, .. } = &err else {
            panic!("expected StoreUnavailable, got {err:?}");
        };
        assert_eq!(*attempts, fx.engine.retry_policy().max_attempts());
        assert!(err.is_retryable());

        fx.store.inject_unavailable(0);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap(), before);
        assert!(fx.store.notifications().is_empty());
    }

    #[tokio::test]
    async fn persistent_conflicts_leave_the_event_untouched() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b", "c"]).await;
        let before = fx.engine.snapshot(&fx.event).await.unwrap();
        fx.store.inject_conflicts(u32::MAX);

        let err = fx.engine.run_lottery(&fx.event, 2).await.unwrap_err();

        assert!(matches!(err, SelectionError::StoreUnavailable { attempts: 4, .. }));
        fx.store.inject_conflicts(0);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap(), before);
        assert!(fx.store.notifications().is_empty());
        assert!(fx.dispatcher.sent().is_empty());
    }

    #[tokio::test]
    async fn external_writer_forces_revalidation() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b"]).await;

        // An outside writer bumps the version; the engine must reload and still
        // respect the pools it finds.
        let current = fx.engine.snapshot(&fx.event).await.unwrap();
        fx.store.overwrite(current);
        fx.engine.join(&fx.event, &EntrantId::new("c")).await.unwrap();

        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().waiting().len(), 3);
    }

    #[tokio::test]
    async fn delivery_failure_does_not_roll_back() {
        let fx = Fixture::with_dispatcher(CapacityPolicy::new(2), RecordingDispatcher::failing(), 3).await;
        fx.join_all(&["a", "b", "c"]).await;

        let outcome = fx.engine.run_lottery(&fx.event, 2).await.unwrap();

        assert_eq!(outcome.drawn.len(), 2);
        assert_eq!(fx.dispatcher.sent().len(), 2);
        assert_eq!(fx.count_kind(NotificationKind::Invitation), 2);
        assert_eq!(fx.engine.snapshot(&fx.event).await.unwrap().selected().len(), 2);
    }
}

mod broadcasts {
    use super::*;

    #[tokio::test]
    async fn announce_reaches_every_pool_member() {
        let fx = Fixture::new(CapacityPolicy::new(2)).await;
        fx.join_all(&["a", "b", "c", "d"]).await;
        fx.engine.run_lottery(&fx.event, 2).await.unwrap();
        let version = fx.store.version(&fx.event);

        let sent = fx
            .engine
            .announce(&fx.event, Pool::Waiting, "Thanks for your patience")
            .await
            .unwrap();

        assert_eq!(sent.len(), 2);
        assert_eq!(fx.count_kind(NotificationKind::Announcement), 2);
        assert_eq!(fx.store.version(&fx.event), version);
        let event = fx.engine.snapshot(&fx.event).await.unwrap();
        for entrant in event.waiting() {
            assert_eq!(
                fx.dispatcher.messages_for(entrant).last().map(String::as_str),
                Some("Thanks for your patience")
            );
        }
    }

    #[tokio::test]
    async fn announcements_cannot_be_answered() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.join_all(&["a"]).await;
        let sent = fx.engine.announce(&fx.event, Pool::Waiting, "Hello").await.unwrap();

        let err = fx.engine.record_response(sent[0], true).await.unwrap_err();

        assert_eq!(err, SelectionError::Validation(ValidationError::NotAnInvitation(sent[0])));
    }

    #[tokio::test]
    async fn inbox_lists_an_entrants_notifications() {
        let fx = Fixture::new(CapacityPolicy::new(1)).await;
        fx.join_all(&["a"]).await;
        fx.engine.run_lottery(&fx.event, 1).await.unwrap();
        fx.engine.announce(&fx.event, Pool::Selected, "See you Monday").await.unwrap();

        let inbox = fx.engine.notifications_for(&EntrantId::new("a")).await.unwrap();

        let kinds: Vec<NotificationKind> = inbox.iter().map(|n| n.kind).collect();
        assert_eq!(kinds, vec![NotificationKind::Invitation, NotificationKind::Announcement]);
        assert!(fx.engine.notifications_for(&EntrantId::new("b")).await.unwrap().is_empty());
    }
}
