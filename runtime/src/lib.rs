//! # Enrollment Runtime
//!
//! The imperative shell around the enrollment core.
//!
//! This crate runs the pure [`SelectionReducer`](enrollment_core::selection::SelectionReducer)
//! against a shared [`EventStore`](enrollment_core::event_store::EventStore) and
//! delivers the resulting notifications.
//!
//! ## Core Components
//!
//! - **[`SelectionEngine`]**: optimistic read-validate-commit transactions
//!   with bounded retry, followed by post-commit delivery
//! - **[`retry`]**: exponential backoff with jitter
//! - **[`metrics`]**: Prometheus counters and histograms
//! - **[`config`]**: environment-driven configuration
//!
//! ## Example
//!
//! ```
//! use enrollment_core::event::{CapacityPolicy, EventDraft, Membership};
//! use enrollment_core::ids::{EntrantId, EventId};
//! use enrollment_runtime::{EngineConfig, SelectionEngine};
//! use enrollment_testing::{InMemoryEventStore, RecordingDispatcher};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let engine = SelectionEngine::from_config(
//!     Arc::new(InMemoryEventStore::new()),
//!     Arc::new(RecordingDispatcher::new()),
//!     &EngineConfig::default(),
//! );
//!
//! let event = EventId::new("swim-lessons");
//! engine
//!     .create_event(EventDraft::new(event.clone(), "Swim Lessons", CapacityPolicy::new(2)))
//!     .await
//!     .unwrap();
//!
//! let ada = EntrantId::new("ada");
//! engine.join(&event, &ada).await.unwrap();
//! assert_eq!(engine.membership_of(&event, &ada).await.unwrap(), Membership::Waiting);
//! # });
//! ```

/// Configuration loaded from the environment
pub mod config;

/// The selection engine
pub mod engine;

/// Prometheus metrics for observability
pub mod metrics;

/// Retry logic with exponential backoff
pub mod retry;

pub use config::EngineConfig;
pub use engine::{
    BackfillOutcome, FinalizeOutcome, LotteryOutcome, ResponseOutcome, SelectionEngine,
};
pub use metrics::{MetricsRecorder, SelectionMetrics};
pub use retry::RetryPolicy;
