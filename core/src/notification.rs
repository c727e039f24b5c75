//! Notification records and response transitions.
//!
//! A notification is created whenever an entrant is drawn (initial lottery or
//! backfill) and whenever an organizer broadcasts to a pool. Invitations and
//! replacements carry a response state that moves exactly once, from
//! `Pending` to `Accepted` or `Declined`.

use crate::ids::{EntrantId, EventId, NotificationId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Response state of a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ResponseState {
    /// Awaiting the entrant's answer
    Pending,
    /// The entrant confirmed
    Accepted,
    /// The entrant declined
    Declined,
}

impl ResponseState {
    /// Map a boolean answer onto a terminal state.
    #[must_use]
    pub const fn from_answer(accepted: bool) -> Self {
        if accepted { Self::Accepted } else { Self::Declined }
    }

    /// Whether an answer has been recorded.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ResponseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Accepted => write!(f, "accepted"),
            Self::Declined => write!(f, "declined"),
        }
    }
}

/// Why a notification was sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationKind {
    /// Drawn by a lottery run
    Invitation,
    /// Drawn by backfill after someone declined
    Replacement,
    /// Organizer broadcast; carries no response
    Announcement,
}

impl NotificationKind {
    /// Whether the entrant is expected to accept or decline.
    #[must_use]
    pub const fn expects_response(self) -> bool {
        matches!(self, Self::Invitation | Self::Replacement)
    }
}

/// Invitation text for an entrant drawn by the lottery.
#[must_use]
pub fn invitation_message(title: &str) -> String {
    format!("Congratulations! You have been selected for {title}.")
}

/// Invitation text for an entrant drawn to replace a decline.
#[must_use]
pub fn replacement_message(title: &str) -> String {
    format!("Congratulations! You were selected for {title} because someone cancelled.")
}

/// A persisted notification record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unique identifier
    pub id: NotificationId,
    /// Event the notification belongs to
    pub event_id: EventId,
    /// Addressee
    pub entrant_id: EntrantId,
    /// Free-text message
    pub message: String,
    /// Why it was sent
    pub kind: NotificationKind,
    /// Current response state
    pub response_state: ResponseState,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// When the response was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Notification {
    /// Pending invitation for a lottery draw.
    #[must_use]
    pub fn invitation(
        event_id: EventId,
        entrant_id: EntrantId,
        title: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self::pending(
            event_id,
            entrant_id,
            invitation_message(title),
            NotificationKind::Invitation,
            now,
        )
    }

    /// Pending invitation for a backfill draw.
    #[must_use]
    pub fn replacement(
        event_id: EventId,
        entrant_id: EntrantId,
        title: &str,
        now: DateTime<Utc>,
    ) -> Self {
        Self::pending(
            event_id,
            entrant_id,
            replacement_message(title),
            NotificationKind::Replacement,
            now,
        )
    }

    /// Organizer broadcast.
    #[must_use]
    pub fn announcement(
        event_id: EventId,
        entrant_id: EntrantId,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self::pending(
            event_id,
            entrant_id,
            message.into(),
            NotificationKind::Announcement,
            now,
        )
    }

    fn pending(
        event_id: EventId,
        entrant_id: EntrantId,
        message: String,
        kind: NotificationKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: NotificationId::new(),
            event_id,
            entrant_id,
            message,
            kind,
            response_state: ResponseState::Pending,
            created_at: now,
            responded_at: None,
        }
    }

    /// Whether this notification still awaits an answer.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.kind.expects_response() && self.response_state == ResponseState::Pending
    }

    /// Describe the transition for `accepted`, applied against this record.
    #[must_use]
    pub fn respond(&self, accepted: bool, at: DateTime<Utc>) -> ResponseUpdate {
        ResponseUpdate {
            notification_id: self.id,
            expected: self.response_state,
            new_state: ResponseState::from_answer(accepted),
            at,
        }
    }

    /// Apply a response transition in place.
    pub fn apply(&mut self, update: &ResponseUpdate) {
        self.response_state = update.new_state;
        self.responded_at = Some(update.at);
    }
}

/// A response transition to persist with a commit.
///
/// The store applies it only if the notification is still in `expected`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseUpdate {
    /// Notification being answered
    pub notification_id: NotificationId,
    /// State the decision was made against
    pub expected: ResponseState,
    /// State to move to
    pub new_state: ResponseState,
    /// When the response was recorded
    pub at: DateTime<Utc>,
}
