//! # Enrollment Testing
//!
//! Testing utilities and helpers for the enrollment engine.
//!
//! This crate provides:
//! - Mock implementations of Environment traits and store capabilities
//! - A Given-When-Then harness for the selection reducer
//! - Event fixtures
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```
//! use enrollment_core::event_store::EventStore;
//! use enrollment_core::ids::EventId;
//! use enrollment_testing::{EventBuilder, InMemoryEventStore};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryEventStore::new();
//! store
//!     .create_event(EventBuilder::new("swim").chosen(2).waiting(&["a", "b", "c"]).build())
//!     .await
//!     .unwrap();
//!
//! let loaded = store.load_event(EventId::new("swim")).await.unwrap();
//! assert_eq!(loaded.record.waiting().len(), 3);
//! # });
//! ```

use chrono::{DateTime, Utc};
use enrollment_core::environment::Clock;

pub mod fixtures;
pub mod store_mocks;

/// Mock implementations for testing.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    pub use crate::store_mocks::{InMemoryEventStore, RecordingDispatcher, SentMessage};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use enrollment_testing::mocks::FixedClock;
    /// use enrollment_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2);
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default())
    }
}

/// Test helpers and utilities.
pub mod helpers {
    use crate::mocks::test_clock;
    use enrollment_core::environment::SeededRandom;
    use enrollment_core::selection::SelectionEnvironment;
    use std::sync::Arc;

    /// Reducer environment with the fixed test clock and a seeded source.
    #[must_use]
    pub fn test_environment(seed: u64) -> SelectionEnvironment {
        SelectionEnvironment::new(Arc::new(test_clock()), Arc::new(SeededRandom::new(seed)))
    }

    /// Install a `tracing` subscriber that writes through the test harness.
    ///
    /// Safe to call from every test; only the first call installs. Honors
    /// `RUST_LOG`, defaulting to `warn`.
    pub fn init_test_tracing() {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use enrollment_core::ids::EntrantId;
    use proptest::prelude::*;

    /// One externally triggered enrollment step, for random operation sequences.
    #[derive(Clone, Debug)]
    pub enum Step {
        /// An entrant (by index) joins
        Join(usize),
        /// An entrant (by index) withdraws
        Withdraw(usize),
        /// The organizer draws up to `n` entrants
        RunLottery(i64),
        /// The `n`-th pending invitation is answered
        Respond(usize, bool),
        /// The `n`-th selected entrant is backfilled
        Backfill(usize),
        /// The organizer finalizes
        Finalize,
    }

    /// Entrant ids `entrant-0 .. entrant-{n-1}`.
    #[must_use]
    pub fn entrant_ids(n: usize) -> Vec<EntrantId> {
        (0..n).map(|i| EntrantId::new(format!("entrant-{i}"))).collect()
    }

    /// A single step over a population of `population` entrants.
    pub fn step(population: usize) -> impl Strategy<Value = Step> {
        let max = population.max(1);
        prop_oneof![
            4 => (0..max).prop_map(Step::Join),
            1 => (0..max).prop_map(Step::Withdraw),
            2 => (0_i64..6).prop_map(Step::RunLottery),
            3 => ((0..max), any::<bool>()).prop_map(|(i, accepted)| Step::Respond(i, accepted)),
            1 => (0..max).prop_map(Step::Backfill),
            1 => Just(Step::Finalize),
        ]
    }

    /// A sequence of up to `len` steps.
    pub fn steps(population: usize, len: usize) -> impl Strategy<Value = Vec<Step>> {
        prop::collection::vec(step(population), 0..len)
    }
}

// Re-export commonly used items
pub use fixtures::EventBuilder;
pub use helpers::{init_test_tracing, test_environment};
pub use mocks::{FixedClock, InMemoryEventStore, RecordingDispatcher, test_clock};
pub use reducer_test::ReducerTest;
