//! # Enrollment Core
//!
//! Core traits and types for capacity-constrained event enrollment.
//!
//! Entrants join a waiting pool, a bounded subset is drawn by uniform random
//! sampling, drawn entrants are asked to confirm, declines trigger automatic
//! backfill from the remaining pool, and a final list is assembled from the
//! confirmations.
//!
//! This crate is the functional core. It performs no I/O: every decision is a
//! pure function of an [`event::EventRecord`] snapshot, an action, and the
//! injected [`environment`]. The runtime crate owns the imperative shell that
//! loads snapshots, runs the reducer and commits the result.
//!
//! ## Core Concepts
//!
//! - **State**: an [`event::EventRecord`] with four pairwise disjoint pools
//! - **Action**: [`selection::SelectionAction`], one variant per enrollment operation
//! - **Reducer**: [`selection::SelectionReducer`], `(State, Action, Environment) → Result<Effects>`
//! - **Effect**: [`effect::Effect`] descriptions committed alongside the new state
//! - **Environment**: [`environment::Clock`] and [`environment::RandomSource`]
//!
//! ## Example
//!
//! ```
//! use enrollment_core::environment::{SeededRandom, SystemClock};
//! use enrollment_core::event::{CapacityPolicy, EventRecord};
//! use enrollment_core::ids::{EntrantId, EventId};
//! use enrollment_core::reducer::Reducer;
//! use enrollment_core::selection::{SelectionAction, SelectionEnvironment, SelectionReducer};
//! use std::sync::Arc;
//!
//! let env = SelectionEnvironment::new(Arc::new(SystemClock), Arc::new(SeededRandom::new(7)));
//! let mut event = EventRecord::new(
//!     EventId::new("swim-lessons"),
//!     "Swim Lessons",
//!     CapacityPolicy::new(2),
//!     env.clock.now(),
//! );
//!
//! let effects = SelectionReducer
//!     .reduce(&mut event, SelectionAction::Join { entrant_id: EntrantId::new("device-a") }, &env)
//!     .unwrap();
//! assert!(effects.is_empty());
//! assert_eq!(event.waiting().len(), 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

pub mod capacity;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod event_store;
pub mod ids;
pub mod notification;
pub mod registry;
pub mod sampler;
pub mod selection;

/// Reducer module - The core trait for business logic
///
/// Reducers are pure functions: `(State, Action, Environment) → Result<Effects>`
///
/// They contain all business logic and are deterministic and testable. A reducer
/// that returns an error may have partially mutated `state`; callers always
/// reduce a scratch copy and discard it on failure.
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for business logic
    ///
    /// # Type Parameters
    ///
    /// - `State`: The domain state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    /// - `Error`: The typed rejection returned when a precondition fails
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for SelectionReducer {
    ///     type State = EventRecord;
    ///     type Action = SelectionAction;
    ///     type Environment = SelectionEnvironment;
    ///     type Error = SelectionError;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut EventRecord,
    ///         action: SelectionAction,
    ///         env: &SelectionEnvironment,
    ///     ) -> Result<SmallVec<[Effect; 4]>, SelectionError> {
    ///         // Business logic here
    ///         Ok(SmallVec::new())
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// The error type describing rejected actions
        type Error;

        /// Reduce an action into state changes and effects
        ///
        /// This is a pure function that:
        /// 1. Validates the action against the current state
        /// 2. Updates state in place
        /// 3. Returns effect descriptions to be committed with the new state
        ///
        /// # Errors
        ///
        /// Returns `Self::Error` when the action's preconditions do not hold
        /// for `state`.
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> Result<SmallVec<[Effect; 4]>, Self::Error>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects describe work the runtime performs as part of the same commit that
/// persists the new state. They are values (not execution).
pub mod effect {
    use crate::notification::{Notification, ResponseUpdate};

    /// Effect type - describes a side effect to be executed
    ///
    /// Effects are NOT executed by the reducer. The runtime collects them,
    /// writes them atomically with the new state, and only then performs
    /// delivery.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Effect {
        /// No-op effect
        None,

        /// Persist a new notification and deliver it after commit
        Notify(Notification),

        /// Persist a response transition on an existing notification
        RecordResponse(ResponseUpdate),
    }

    impl Effect {
        /// The notification carried by a `Notify` effect, if any.
        #[must_use]
        pub const fn as_notification(&self) -> Option<&Notification> {
            match self {
                Self::Notify(notification) => Some(notification),
                Self::None | Self::RecordResponse(_) => None,
            }
        }
    }
}

/// Environment module - Dependency injection traits
///
/// All sources of non-determinism (time and randomness) are abstracted behind
/// traits and injected via the reducer's environment.
pub mod environment {
    use chrono::{DateTime, Utc};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::{Mutex, PoisonError};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of uniform random indices for the lottery.
    ///
    /// Implementations must return a value in `0..upper` with every value
    /// equally likely. `upper` is always greater than zero.
    pub trait RandomSource: Send + Sync {
        /// Draw a uniformly distributed index in `0..upper`.
        fn index_below(&self, upper: usize) -> usize;
    }

    /// Thread-local OS-seeded randomness.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemRandom;

    impl RandomSource for SystemRandom {
        fn index_below(&self, upper: usize) -> usize {
            rand::thread_rng().gen_range(0..upper)
        }
    }

    /// Deterministic randomness from a fixed seed.
    ///
    /// Two sources built from the same seed produce the same sequence of
    /// indices, which makes a draw reproducible for audits and tests.
    ///
    /// ```
    /// use enrollment_core::environment::{RandomSource, SeededRandom};
    ///
    /// let a = SeededRandom::new(42);
    /// let b = SeededRandom::new(42);
    /// let left: Vec<usize> = (0..8).map(|_| a.index_below(100)).collect();
    /// let right: Vec<usize> = (0..8).map(|_| b.index_below(100)).collect();
    /// assert_eq!(left, right);
    /// ```
    #[derive(Debug)]
    pub struct SeededRandom {
        seed: u64,
        rng: Mutex<StdRng>,
    }

    impl SeededRandom {
        /// Create a source seeded with `seed`.
        #[must_use]
        pub fn new(seed: u64) -> Self {
            Self {
                seed,
                rng: Mutex::new(StdRng::seed_from_u64(seed)),
            }
        }

        /// The seed this source was created with.
        #[must_use]
        pub const fn seed(&self) -> u64 {
            self.seed
        }
    }

    impl RandomSource for SeededRandom {
        fn index_below(&self, upper: usize) -> usize {
            self.rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .gen_range(0..upper)
        }
    }

}
