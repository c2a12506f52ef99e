//! Domain state: identities, factors, and the short-lived records their flows create.
//!
//! Every type here is a plain data record. Persistence lives behind the store
//! traits in [`crate::stores`]; nothing in this module performs I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header fields shared by every persisted record in this subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Stable identifier.
    pub id: Uuid,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-modified timestamp.
    pub modified_at: DateTime<Utc>,
}

impl RecordHeader {
    /// Create a fresh header stamped with `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: now,
            modified_at: now,
        }
    }
}

/// An abstract principal: either a third-party (remote) identity or the local realm.
///
/// Represented as a tagged-variant enum carrying the shared [`RecordHeader`] rather
/// than a class hierarchy, matching this codebase's preference for sum types over
/// inheritance elsewhere in the stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Identity {
    /// An identity resolved through a third-party OAuth2/OIDC provider.
    Remote {
        /// Shared record header.
        header: RecordHeader,
        /// Issuer URL (e.g. `https://github.com`, or the OIDC discovery issuer).
        issuer: String,
        /// Provider-scoped subject string, unique within `issuer`.
        subject: String,
    },
    /// An identity created by the local realm (password, magic link, WebAuthn).
    Local {
        /// Shared record header.
        header: RecordHeader,
        /// Subject string; empty unless the realm assigns one.
        subject: String,
    },
}

impl Identity {
    /// The shared record header, regardless of variant.
    #[must_use]
    pub const fn header(&self) -> &RecordHeader {
        match self {
            Self::Remote { header, .. } | Self::Local { header, .. } => header,
        }
    }

    /// The record id, regardless of variant.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.header().id
    }

    /// The natural key `(issuer, subject)` used for upsert lookups.
    #[must_use]
    pub fn natural_key(&self) -> (&str, &str) {
        match self {
            Self::Remote { issuer, subject, .. } => (issuer.as_str(), subject.as_str()),
            Self::Local { subject, .. } => ("local", subject.as_str()),
        }
    }
}

/// Authentication material bound to exactly one [`Identity`].
///
/// `EmailPassword`, `MagicLink`, and `WebAuthn` are all variants of an
/// abstract "email-bearing factor"; `email()`/`verified_at()` project the
/// common fields shared across them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Factor {
    /// Email + Argon2id password hash.
    EmailPassword {
        /// Shared record header.
        header: RecordHeader,
        /// Owning identity.
        identity_id: Uuid,
        /// Account email.
        email: String,
        /// Argon2id PHC string.
        password_hash: String,
        /// When the email was verified, if ever.
        verified_at: Option<DateTime<Utc>>,
    },
    /// Passwordless email factor authenticated via link or one-time code.
    MagicLink {
        /// Shared record header.
        header: RecordHeader,
        /// Owning identity.
        identity_id: Uuid,
        /// Account email.
        email: String,
        /// When the email was verified, if ever.
        verified_at: Option<DateTime<Utc>>,
    },
    /// WebAuthn/FIDO2 credential.
    WebAuthn {
        /// Shared record header.
        header: RecordHeader,
        /// Owning identity.
        identity_id: Uuid,
        /// Account email.
        email: String,
        /// Opaque per-user handle. Must match every other factor for the same email.
        user_handle: Vec<u8>,
        /// Credential id, unique across all WebAuthn factors.
        credential_id: Vec<u8>,
        /// COSE public key bytes.
        public_key: Vec<u8>,
    },
}

impl Factor {
    /// Shared record header, regardless of variant.
    #[must_use]
    pub const fn header(&self) -> &RecordHeader {
        match self {
            Self::EmailPassword { header, .. }
            | Self::MagicLink { header, .. }
            | Self::WebAuthn { header, .. } => header,
        }
    }

    /// Record id, regardless of variant.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.header().id
    }

    /// The owning identity id.
    #[must_use]
    pub const fn identity_id(&self) -> Uuid {
        match self {
            Self::EmailPassword { identity_id, .. }
            | Self::MagicLink { identity_id, .. }
            | Self::WebAuthn { identity_id, .. } => *identity_id,
        }
    }

    /// The email address, common to every factor kind this subsystem issues.
    #[must_use]
    pub fn email(&self) -> &str {
        match self {
            Self::EmailPassword { email, .. }
            | Self::MagicLink { email, .. }
            | Self::WebAuthn { email, .. } => email,
        }
    }

    /// `verified_at` for email-bearing factors that track it; `WebAuthn` factors
    /// have no separate verification step (possession of the credential is proof).
    #[must_use]
    pub const fn verified_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::EmailPassword { verified_at, .. } | Self::MagicLink { verified_at, .. } => {
                *verified_at
            }
            Self::WebAuthn { .. } => None,
        }
    }

    /// `true` for the factor kinds that share a `user_handle` per email.
    #[must_use]
    pub const fn is_webauthn(&self) -> bool {
        matches!(self, Self::WebAuthn { .. })
    }
}

/// Kind of attempt recorded in the [`AuthenticationAttempt`] ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptType {
    /// A one-time-code verification attempt.
    OneTimeCode,
    /// A password verification attempt.
    Password,
    /// A WebAuthn assertion attempt.
    WebAuthn,
}

/// Append-only ledger entry used for rate limiting and audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticationAttempt {
    /// Shared record header.
    pub header: RecordHeader,
    /// Factor the attempt was made against.
    pub factor_id: Uuid,
    /// Kind of attempt.
    pub attempt_type: AttemptType,
    /// Whether the attempt succeeded.
    pub successful: bool,
}

/// A numeric one-time code bound to a factor.
///
/// `code_hash` is the SHA-256 digest of the 6 ASCII decimal digits; the
/// plaintext code is never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneTimeCode {
    /// Shared record header.
    pub header: RecordHeader,
    /// Factor this code authenticates.
    pub factor_id: Uuid,
    /// SHA-256 digest of the plaintext code, unique across live codes.
    pub code_hash: [u8; 32],
    /// Expiry timestamp.
    pub expires_at: DateTime<Utc>,
}

/// Opaque provider tokens captured at OAuth/OIDC callback time and released on claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderTokens {
    /// Upstream access/bearer token.
    pub auth_token: Option<String>,
    /// Upstream refresh token, if the provider issued one.
    pub refresh_token: Option<String>,
    /// Upstream OIDC `id_token`, if the provider is OIDC.
    pub id_token: Option<String>,
}

/// A PKCE challenge row: recorded at authorize/register, claimed at token exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PkceChallenge {
    /// Shared record header. `header.id` is the opaque `code` returned to the client.
    pub header: RecordHeader,
    /// `base64url(SHA-256(verifier))`, supplied by the client at `record` time.
    pub challenge: String,
    /// Bound identity, once the flow succeeds.
    pub identity_id: Option<Uuid>,
    /// Opaque provider tokens, bound alongside the identity.
    pub tokens: ProviderTokens,
}

/// A short-lived WebAuthn registration challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebAuthnRegistrationChallenge {
    /// Shared record header.
    pub header: RecordHeader,
    /// Email this registration is for.
    pub email: String,
    /// User handle reused across the email's factors, or freshly generated.
    pub user_handle: Vec<u8>,
    /// Serialized `webauthn_rs::prelude::PasskeyRegistration` ceremony state,
    /// opaque to everything outside `crate::providers::webauthn`.
    pub ceremony_state: Vec<u8>,
}

/// A short-lived WebAuthn authentication (assertion) challenge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebAuthnAuthenticationChallenge {
    /// Shared record header.
    pub header: RecordHeader,
    /// Email this authentication attempt is for.
    pub email: String,
    /// Serialized `webauthn_rs::prelude::PasskeyAuthentication` ceremony
    /// state, opaque to everything outside `crate::providers::webauthn`.
    pub ceremony_state: Vec<u8>,
}

/// Marker state for the [`crate::webhook::WebhookReducer`] (and any future
/// reducer wired through `composable-rust-runtime`'s `Store`).
///
/// There is no request-scoped shared mutable state between requests: this
/// subsystem's HTTP flows (`crate::flows`) are plain async functions over
/// injected stores/providers, not reducer state transitions. `AuthState`
/// exists only so the webhook dispatcher — the one piece of this subsystem
/// that is a genuine background effect loop — can be expressed the same way
/// every other long-lived effect loop in this codebase is. See `DESIGN.md`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState;

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> RecordHeader {
        RecordHeader::new(Utc::now())
    }

    #[test]
    fn identity_natural_key_remote() {
        let identity = Identity::Remote {
            header: header(),
            issuer: "https://github.com".to_string(),
            subject: "1".to_string(),
        };
        assert_eq!(identity.natural_key(), ("https://github.com", "1"));
    }

    #[test]
    fn factor_email_and_verified_at_projections() {
        let factor = Factor::MagicLink {
            header: header(),
            identity_id: Uuid::new_v4(),
            email: "a@example.com".to_string(),
            verified_at: None,
        };
        assert_eq!(factor.email(), "a@example.com");
        assert!(factor.verified_at().is_none());
        assert!(!factor.is_webauthn());
    }
}
