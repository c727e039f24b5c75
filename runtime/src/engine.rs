//! The selection engine: transactional shell around [`SelectionReducer`].
//!
//! Every mutating operation runs as one optimistic read-modify-write:
//!
//! 1. Load the event snapshot and its version
//! 2. Read whatever notification state the operation needs (after the
//!    snapshot, so the version check covers it)
//! 3. Run the reducer on a clone of the snapshot
//! 4. Commit the new record, new notifications and response transitions
//!    together, expecting the version read in step 1
//!
//! A conflicting writer or an unreachable store aborts the attempt with
//! nothing applied, and the whole transaction is retried from a fresh read
//! with exponential backoff. Precondition failures are never retried.
//!
//! Notifications are delivered only after their commit succeeded. Delivery
//! failures are logged and counted; they never roll back state.

use crate::config::EngineConfig;
use crate::metrics::SelectionMetrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use enrollment_core::capacity::SamplingRequest;
use enrollment_core::dispatcher::NotificationDispatcher;
use enrollment_core::effect::Effect;
use enrollment_core::environment::{SystemClock, SystemRandom};
use enrollment_core::error::{SelectionError, ValidationError};
use enrollment_core::event::{EventDraft, EventRecord, Membership, Pool};
use enrollment_core::event_store::{EventStore, EventWrite, StoreError, StoreFuture, VersionedEvent};
use enrollment_core::ids::{EntrantId, EventId, NotificationId};
use enrollment_core::notification::{Notification, ResponseState};
use enrollment_core::reducer::Reducer;
use enrollment_core::selection::{SelectionAction, SelectionEnvironment, SelectionReducer};
use smallvec::SmallVec;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

type Effects = SmallVec<[Effect; 4]>;

/// Result of a committed lottery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LotteryOutcome {
    /// Entrants moved from `waiting` to `selected`, in draw order
    pub drawn: Vec<EntrantId>,
}

/// Result of recording a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResponseOutcome {
    /// The response was committed.
    Recorded {
        /// The new response state
        state: ResponseState,
        /// Entrant drawn to replace a decliner, if any
        replacement: Option<EntrantId>,
    },
    /// The notification had already been answered; nothing changed.
    AlreadyRecorded(ResponseState),
}

/// Result of a committed backfill.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackfillOutcome {
    /// Entrant drawn into the freed slot, if the waiting pool had one
    pub replacement: Option<EntrantId>,
}

/// Result of a committed finalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// Confirmed entrants, sorted
    pub final_entrants: Vec<EntrantId>,
    /// Entrants moved to `cancelled` by finalization
    pub cancelled: usize,
}

/// One mutating operation, replayable across transaction attempts.
#[derive(Clone, Debug)]
enum Operation {
    Join(EntrantId),
    Withdraw(EntrantId),
    RunLottery(SamplingRequest),
    RecordResponse {
        notification_id: NotificationId,
        accepted: bool,
    },
    Backfill(EntrantId),
    Finalize,
}

impl Operation {
    const fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => "join",
            Self::Withdraw(_) => "withdraw",
            Self::RunLottery(_) => "run_lottery",
            Self::RecordResponse { .. } => "record_response",
            Self::Backfill(_) => "backfill",
            Self::Finalize => "finalize",
        }
    }
}

/// Why a single transaction attempt did not commit.
#[derive(Debug)]
enum AttemptError {
    /// The reducer refused the operation against a fresh snapshot.
    Rejected(SelectionError),
    /// The store refused or failed the read or the commit.
    Store(StoreError),
}

impl AttemptError {
    const fn is_retryable(&self) -> bool {
        match self {
            Self::Rejected(_) => false,
            Self::Store(error) => error.is_retryable(),
        }
    }
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected(error) => write!(f, "{error}"),
            Self::Store(error) => write!(f, "{error}"),
        }
    }
}

impl From<StoreError> for AttemptError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<SelectionError> for AttemptError {
    fn from(error: SelectionError) -> Self {
        Self::Rejected(error)
    }
}

/// A transaction that went through, or was a read-only no-op.
#[derive(Debug)]
struct Committed {
    before: EventRecord,
    after: EventRecord,
    effects: Effects,
    /// Notification as read by a `RecordResponse` attempt
    notification: Option<Notification>,
}

impl Committed {
    fn notified(&self) -> Vec<EntrantId> {
        self.effects
            .iter()
            .filter_map(Effect::as_notification)
            .map(|n| n.entrant_id.clone())
            .collect()
    }

    fn recorded_state(&self) -> Option<ResponseState> {
        self.effects.iter().find_map(|effect| match effect {
            Effect::RecordResponse(update) => Some(update.new_state),
            _ => None,
        })
    }
}

/// Concurrent-safe enrollment operations over a shared [`EventStore`].
///
/// The engine holds no event state of its own; any number of engines (or
/// tasks sharing one engine) may operate on the same store.
///
/// # Example
///
/// ```
/// use enrollment_core::event::{CapacityPolicy, EventDraft};
/// use enrollment_core::ids::{EntrantId, EventId};
/// use enrollment_runtime::SelectionEngine;
/// use enrollment_testing::{InMemoryEventStore, RecordingDispatcher};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let engine = SelectionEngine::new(
///     Arc::new(InMemoryEventStore::new()),
///     Arc::new(RecordingDispatcher::new()),
/// );
/// let event = EventId::new("pottery");
/// engine
///     .create_event(EventDraft::new(event.clone(), "Pottery", CapacityPolicy::new(1)))
///     .await
///     .unwrap();
/// engine.join(&event, &EntrantId::new("ada")).await.unwrap();
///
/// let outcome = engine.run_lottery(&event, 1).await.unwrap();
/// assert_eq!(outcome.drawn, vec![EntrantId::new("ada")]);
/// # });
/// ```
#[derive(Clone)]
pub struct SelectionEngine {
    store: Arc<dyn EventStore>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    environment: SelectionEnvironment,
    retry: RetryPolicy,
}

impl fmt::Debug for SelectionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectionEngine")
            .field("environment", &self.environment)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl SelectionEngine {
    /// Engine with the system clock, OS randomness and the default retry policy.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>, dispatcher: Arc<dyn NotificationDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            environment: SelectionEnvironment::new(Arc::new(SystemClock), Arc::new(SystemRandom)),
            retry: RetryPolicy::default(),
        }
    }

    /// Engine configured from [`EngineConfig`].
    #[must_use]
    pub fn from_config(
        store: Arc<dyn EventStore>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(store, dispatcher)
            .with_environment(SelectionEnvironment::new(
                Arc::new(SystemClock),
                config.random_source(),
            ))
            .with_retry_policy(config.retry_policy())
    }

    /// Replace the clock and randomness.
    #[must_use]
    pub fn with_environment(mut self, environment: SelectionEnvironment) -> Self {
        self.environment = environment;
        self
    }

    /// Replace the transaction retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The retry policy in use.
    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Create an open event with empty pools.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyTitle`], [`ValidationError::InvalidChosenAmount`]
    ///   or [`ValidationError::InvalidWaitingListLimit`] for a bad draft
    /// - [`ValidationError::EventAlreadyExists`] if the id is taken
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %draft.id))]
    pub async fn create_event(&self, draft: EventDraft) -> Result<EventRecord, SelectionError> {
        observed("create_event", async {
            validate_draft(&draft)?;
            let record = EventRecord::from_draft(draft, self.environment.clock.now());
            self.read(|| self.store.create_event(record.clone())).await?;
            tracing::info!(
                chosen_amount = record.policy().chosen_amount,
                waiting_list_limit = ?record.policy().waiting_list_limit,
                "event created"
            );
            Ok::<_, SelectionError>(record)
        })
        .await
    }

    /// Add an entrant to the waiting pool.
    ///
    /// # Errors
    ///
    /// - [`SelectionError::AlreadyMember`] if the entrant is in any pool
    /// - [`SelectionError::CapacityExceeded`] if the waiting list is full
    /// - [`SelectionError::EventClosed`] after finalization
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %event_id, entrant_id = %entrant_id))]
    pub async fn join(&self, event_id: &EventId, entrant_id: &EntrantId) -> Result<(), SelectionError> {
        observed("join", async {
            self.transact(event_id, Operation::Join(entrant_id.clone())).await?;
            tracing::info!("entrant joined");
            Ok::<_, SelectionError>(())
        })
        .await
    }

    /// Move a waiting entrant to `cancelled`.
    ///
    /// # Errors
    ///
    /// - [`SelectionError::NotInWaitingList`] unless the entrant is waiting
    /// - [`SelectionError::EventClosed`] after finalization
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %event_id, entrant_id = %entrant_id))]
    pub async fn withdraw(&self, event_id: &EventId, entrant_id: &EntrantId) -> Result<(), SelectionError> {
        observed("withdraw", async {
            self.transact(event_id, Operation::Withdraw(entrant_id.clone())).await?;
            tracing::info!("entrant withdrew");
            Ok::<_, SelectionError>(())
        })
        .await
    }

    /// Draw up to `requested` waiting entrants and invite them.
    ///
    /// The count is clamped to the free selection slots and to the size of
    /// the waiting pool; drawing nobody is not an error.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidSampleSize`] for a negative count, before
    ///   any store access
    /// - [`SelectionError::EventClosed`] after finalization
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %event_id, requested = requested))]
    pub async fn run_lottery(
        &self,
        event_id: &EventId,
        requested: i64,
    ) -> Result<LotteryOutcome, SelectionError> {
        observed("run_lottery", async {
            let request = SamplingRequest::new(event_id.clone(), requested)?;
            let committed = self.transact(event_id, Operation::RunLottery(request)).await?;
            let drawn = committed.notified();

            SelectionMetrics::record_drawn(drawn.len());
            tracing::info!(
                drawn = drawn.len(),
                selected = committed.after.selected().len(),
                waiting = committed.after.waiting().len(),
                "lottery committed"
            );
            self.dispatch(&committed.effects).await;
            Ok::<_, SelectionError>(LotteryOutcome { drawn })
        })
        .await
    }

    /// Record an entrant's answer to an invitation.
    ///
    /// A decline from a still-selected entrant frees the slot and draws one
    /// replacement in the same transaction. Answering a notification that
    /// has already left `Pending` changes nothing.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NotificationNotFound`] for an unknown id
    /// - [`ValidationError::NotAnInvitation`] for an announcement
    /// - [`SelectionError::EventClosed`] after finalization
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(notification_id = %notification_id, accepted = accepted))]
    pub async fn record_response(
        &self,
        notification_id: NotificationId,
        accepted: bool,
    ) -> Result<ResponseOutcome, SelectionError> {
        observed("record_response", async {
            let notification = self.read(|| self.store.load_notification(notification_id)).await?;
            let committed = self
                .transact(
                    &notification.event_id,
                    Operation::RecordResponse {
                        notification_id,
                        accepted,
                    },
                )
                .await?;

            let Some(state) = committed.recorded_state() else {
                let current = committed
                    .notification
                    .as_ref()
                    .map_or(notification.response_state, |n| n.response_state);
                tracing::info!(state = %current, "response already recorded");
                return Ok(ResponseOutcome::AlreadyRecorded(current));
            };

            let replacement = committed.notified().into_iter().next();
            if !accepted && committed.before.selected().contains(&notification.entrant_id) {
                SelectionMetrics::record_backfill(replacement.is_some());
                if replacement.is_some() {
                    SelectionMetrics::record_drawn(1);
                }
            }
            tracing::info!(state = %state, replacement = ?replacement, "response recorded");
            self.dispatch(&committed.effects).await;
            Ok::<_, SelectionError>(ResponseOutcome::Recorded { state, replacement })
        })
        .await
    }

    /// Cancel a selected entrant and draw one replacement if possible.
    ///
    /// # Errors
    ///
    /// - [`SelectionError::NotAMember`] unless the entrant is selected
    /// - [`SelectionError::EventClosed`] after finalization
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %event_id, entrant_id = %entrant_id))]
    pub async fn backfill(
        &self,
        event_id: &EventId,
        entrant_id: &EntrantId,
    ) -> Result<BackfillOutcome, SelectionError> {
        observed("backfill", async {
            let committed = self.transact(event_id, Operation::Backfill(entrant_id.clone())).await?;
            let replacement = committed.notified().into_iter().next();

            SelectionMetrics::record_backfill(replacement.is_some());
            if replacement.is_some() {
                SelectionMetrics::record_drawn(1);
            }
            tracing::info!(replacement = ?replacement, "backfill committed");
            self.dispatch(&committed.effects).await;
            Ok::<_, SelectionError>(BackfillOutcome { replacement })
        })
        .await
    }

    /// Close the event with every accepted, still-selected entrant.
    ///
    /// # Errors
    ///
    /// - [`SelectionError::NoAcceptedEntrants`] if nobody has accepted; the
    ///   event stays open
    /// - [`SelectionError::EventClosed`] if already finalized
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %event_id))]
    pub async fn finalize(&self, event_id: &EventId) -> Result<FinalizeOutcome, SelectionError> {
        observed("finalize", async {
            let committed = self.transact(event_id, Operation::Finalize).await?;

            let mut final_entrants: Vec<EntrantId> =
                committed.after.final_entrants().iter().cloned().collect();
            final_entrants.sort_unstable();
            let cancelled = committed
                .after
                .cancelled()
                .len()
                .saturating_sub(committed.before.cancelled().len());

            tracing::info!(final_entrants = final_entrants.len(), cancelled, "event finalized");
            Ok::<_, SelectionError>(FinalizeOutcome {
                final_entrants,
                cancelled,
            })
        })
        .await
    }

    /// Which pool, if any, an entrant occupies.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EventNotFound`] for an unknown event
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    pub async fn membership_of(
        &self,
        event_id: &EventId,
        entrant_id: &EntrantId,
    ) -> Result<Membership, SelectionError> {
        Ok(self.snapshot(event_id).await?.membership_of(entrant_id))
    }

    /// Current event record.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EventNotFound`] for an unknown event
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    pub async fn snapshot(&self, event_id: &EventId) -> Result<EventRecord, SelectionError> {
        let VersionedEvent { record, .. } = self.read(|| self.store.load_event(event_id.clone())).await?;
        Ok(record)
    }

    /// Send an organizer message to every member of `pool`.
    ///
    /// Each recipient gets its own stored [`Notification`]; the event record
    /// is not touched. Returns the ids in recipient order (sorted by entrant).
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EventNotFound`] for an unknown event
    /// - [`SelectionError::StoreUnavailable`] after retry exhaustion
    #[tracing::instrument(skip_all, fields(event_id = %event_id, pool = %pool))]
    pub async fn announce(
        &self,
        event_id: &EventId,
        pool: Pool,
        message: &str,
    ) -> Result<Vec<NotificationId>, SelectionError> {
        observed("announce", async {
            let record = self.snapshot(event_id).await?;
            let mut recipients: Vec<&EntrantId> = record.pool(pool).iter().collect();
            recipients.sort_unstable();

            let now = self.environment.clock.now();
            let mut ids = Vec::with_capacity(recipients.len());
            for entrant_id in recipients {
                let notification =
                    Notification::announcement(event_id.clone(), entrant_id.clone(), message, now);
                ids.push(
                    self.read(|| self.store.create_notification(notification.clone()))
                        .await?,
                );
                self.deliver(&notification).await;
            }

            tracing::info!(recipients = ids.len(), "announcement sent");
            Ok::<_, SelectionError>(ids)
        })
        .await
    }

    /// Every notification addressed to an entrant, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`SelectionError::StoreUnavailable`] after retry exhaustion.
    pub async fn notifications_for(
        &self,
        entrant_id: &EntrantId,
    ) -> Result<Vec<Notification>, SelectionError> {
        let mut notifications = self
            .read(|| self.store.notifications_for_entrant(entrant_id.clone()))
            .await?;
        notifications.sort_by_key(|n| n.created_at);
        Ok(notifications)
    }

    /// Run `operation` as a retried optimistic transaction.
    async fn transact(&self, event_id: &EventId, operation: Operation) -> Result<Committed, SelectionError> {
        let name = operation.name();
        let attempts = AtomicU32::new(0);
        let operation = &operation;
        let attempts_ref = &attempts;

        let result = retry_with_predicate(
            &self.retry,
            move || {
                attempts_ref.fetch_add(1, Ordering::Relaxed);
                self.attempt(event_id, operation)
            },
            |error: &AttemptError| {
                if let AttemptError::Store(store_error) = error {
                    if store_error.is_conflict() {
                        SelectionMetrics::record_conflict(name);
                    }
                }
                error.is_retryable()
            },
        )
        .await;

        match result {
            Ok(committed) => Ok(committed),
            Err(AttemptError::Rejected(error)) => {
                tracing::debug!(operation = name, error = %error, "operation rejected");
                Err(error)
            },
            Err(AttemptError::Store(error)) => {
                let attempts = attempts.load(Ordering::Relaxed);
                tracing::warn!(operation = name, attempts, error = %error, "transaction abandoned");
                Err(SelectionError::from_store(error, attempts))
            },
        }
    }

    /// One read-validate-commit pass.
    async fn attempt(&self, event_id: &EventId, operation: &Operation) -> Result<Committed, AttemptError> {
        let VersionedEvent { version, record } = self.store.load_event(event_id.clone()).await?;

        let mut notification = None;
        let action = match operation {
            Operation::Join(entrant_id) => SelectionAction::Join {
                entrant_id: entrant_id.clone(),
            },
            Operation::Withdraw(entrant_id) => SelectionAction::Withdraw {
                entrant_id: entrant_id.clone(),
            },
            Operation::RunLottery(request) => SelectionAction::RunLottery(request.clone()),
            Operation::RecordResponse {
                notification_id,
                accepted,
            } => {
                let current = self.store.load_notification(*notification_id).await?;
                notification = Some(current.clone());
                SelectionAction::RecordResponse {
                    notification: current,
                    accepted: *accepted,
                }
            },
            Operation::Backfill(entrant_id) => SelectionAction::Backfill {
                entrant_id: entrant_id.clone(),
            },
            Operation::Finalize => {
                let accepted = self
                    .store
                    .query_notifications(event_id.clone(), Some(ResponseState::Accepted))
                    .await?
                    .into_iter()
                    .filter(|n| n.kind.expects_response())
                    .map(|n| n.entrant_id)
                    .collect();
                SelectionAction::Finalize { accepted }
            },
        };

        let mut next = record.clone();
        let effects = SelectionReducer.reduce(&mut next, action, &self.environment)?;

        if effects.is_empty() && next == record {
            tracing::debug!(%version, "nothing to commit");
        } else {
            let version = self.store.commit(version, write_for(&next, &effects)).await?;
            tracing::debug!(%version, effects = effects.len(), "transaction committed");
        }

        Ok(Committed {
            before: record,
            after: next,
            effects,
            notification,
        })
    }

    /// Run a single store call with the retry policy.
    async fn read<'a, T, F>(&'a self, mut call: F) -> Result<T, SelectionError>
    where
        F: FnMut() -> StoreFuture<'a, T>,
    {
        let attempts = AtomicU32::new(0);
        retry_with_predicate(
            &self.retry,
            || {
                attempts.fetch_add(1, Ordering::Relaxed);
                call()
            },
            StoreError::is_retryable,
        )
        .await
        .map_err(|error| SelectionError::from_store(error, attempts.load(Ordering::Relaxed)))
    }

    async fn dispatch(&self, effects: &[Effect]) {
        for notification in effects.iter().filter_map(Effect::as_notification) {
            self.deliver(notification).await;
        }
    }

    async fn deliver(&self, notification: &Notification) {
        let sent = self
            .dispatcher
            .send(
                notification.id,
                notification.entrant_id.clone(),
                notification.message.clone(),
            )
            .await;
        if let Err(error) = sent {
            tracing::warn!(
                notification_id = %notification.id,
                entrant_id = %notification.entrant_id,
                error = %error,
                "notification delivery failed"
            );
            SelectionMetrics::record_notification_failure();
        }
    }
}

fn write_for(record: &EventRecord, effects: &[Effect]) -> EventWrite {
    effects
        .iter()
        .fold(EventWrite::new(record.clone()), |write, effect| match effect {
            Effect::Notify(notification) => write.with_notification(notification.clone()),
            Effect::RecordResponse(update) => write.with_response(update.clone()),
            Effect::None => write,
        })
}

fn validate_draft(draft: &EventDraft) -> Result<(), ValidationError> {
    if draft.title.trim().is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if draft.policy.chosen_amount == 0 {
        return Err(ValidationError::InvalidChosenAmount(draft.policy.chosen_amount));
    }
    if let Some(limit) = draft.policy.waiting_list_limit.filter(|limit| *limit == 0) {
        return Err(ValidationError::InvalidWaitingListLimit(limit));
    }
    Ok(())
}

/// Time an operation and count its outcome.
async fn observed<T, Fut>(operation: &'static str, fut: Fut) -> Result<T, SelectionError>
where
    Fut: Future<Output = Result<T, SelectionError>>,
{
    let start = Instant::now();
    let result = fut.await;
    SelectionMetrics::record_operation(operation, result.as_ref().map(|_| ()), start.elapsed());
    result
}
