//! Notification delivery capability.
//!
//! The engine hands a message for one entrant to the dispatcher after the
//! corresponding notification record has been committed. Delivery is
//! fire-and-forget: the engine never waits for, or rolls back on, delivery.

use crate::ids::{EntrantId, NotificationId};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Delivery failure reported by a dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The transport rejected or could not reach the entrant.
    #[error("Delivery to {entrant_id} failed: {reason}")]
    DeliveryFailed {
        /// Addressee
        entrant_id: EntrantId,
        /// Transport message
        reason: String,
    },

    /// The dispatcher is shut down or not configured.
    #[error("Dispatcher unavailable: {0}")]
    Unavailable(String),
}

/// Enqueue a message to one entrant.
///
/// `notification_id` is the id of the committed record, so transports can
/// deduplicate and entrants can answer by id.
pub trait NotificationDispatcher: Send + Sync {
    /// Enqueue `message` for `entrant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError`] when the message could not be enqueued.
    fn send(
        &self,
        notification_id: NotificationId,
        entrant_id: EntrantId,
        message: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>>;
}

/// Dispatcher that drops every message. Useful where delivery is handled
/// elsewhere, for example by a collaborator watching the notification store.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDispatcher;

impl NotificationDispatcher for NoopDispatcher {
    fn send(
        &self,
        _notification_id: NotificationId,
        _entrant_id: EntrantId,
        _message: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}
