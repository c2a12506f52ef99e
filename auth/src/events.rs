//! Lifecycle events dispatched as webhook payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable event-type discriminant, used as both the webhook body's
/// `event_type` and to filter a [`crate::config::WebhookSubscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A new identity was created.
    IdentityCreated,
    /// An identity successfully authenticated (any provider).
    IdentityAuthenticated,
    /// A factor's email was verified.
    EmailVerified,
    /// A one-time code was requested.
    OneTimeCodeRequested,
    /// A one-time code was verified.
    OneTimeCodeVerified,
    /// A password was reset.
    PasswordReset,
}

/// A lifecycle event, carrying whatever subject ids apply to its kind.
///
/// Every variant carries a stable `event_id` and `timestamp` via
/// [`WebhookEvent::envelope`] at dispatch time rather than at construction,
/// so reducers/flows never need a clock just to build an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum WebhookEvent {
    /// A new identity was created.
    IdentityCreated {
        /// The identity's id.
        identity_id: Uuid,
    },
    /// An identity successfully authenticated.
    IdentityAuthenticated {
        /// The identity's id.
        identity_id: Uuid,
    },
    /// A factor's email was verified.
    EmailVerified {
        /// The identity owning the factor.
        identity_id: Uuid,
        /// The factor whose email was verified.
        email_factor_id: Uuid,
    },
    /// A one-time code was requested.
    OneTimeCodeRequested {
        /// The factor the code authenticates.
        email_factor_id: Uuid,
        /// The one-time code record's id (never the plaintext code).
        otc_id: Uuid,
    },
    /// A one-time code was verified.
    OneTimeCodeVerified {
        /// The factor the code authenticated.
        email_factor_id: Uuid,
    },
    /// A password was reset.
    PasswordReset {
        /// The identity whose factor's password changed.
        identity_id: Uuid,
    },
}

impl WebhookEvent {
    /// The event's stable type discriminant.
    #[must_use]
    pub const fn event_type(&self) -> EventType {
        match self {
            Self::IdentityCreated { .. } => EventType::IdentityCreated,
            Self::IdentityAuthenticated { .. } => EventType::IdentityAuthenticated,
            Self::EmailVerified { .. } => EventType::EmailVerified,
            Self::OneTimeCodeRequested { .. } => EventType::OneTimeCodeRequested,
            Self::OneTimeCodeVerified { .. } => EventType::OneTimeCodeVerified,
            Self::PasswordReset { .. } => EventType::PasswordReset,
        }
    }
}

/// The wire envelope for a delivered webhook: the event plus its stable
/// identity and delivery timestamp, flattened into one JSON body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Stable event id, unique per delivery attempt set (retries reuse it).
    pub event_id: Uuid,
    /// Delivery timestamp.
    pub timestamp: DateTime<Utc>,
    /// The event payload, flattened so `event_type` sits at the top level.
    #[serde(flatten)]
    pub event: WebhookEvent,
}
