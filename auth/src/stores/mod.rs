//! Identity/Factor Store.
//!
//! The persistence seam every provider and flow authenticates against.
//! Natural-key upserts (an identity's `(issuer, subject)`, a factor's
//! `email`) make re-authentication idempotent; cascade delete keeps an
//! identity's factors, attempts, and outstanding codes from outliving it.

#[cfg(feature = "postgres")]
pub mod postgres;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::state::{Factor, Identity, WebAuthnAuthenticationChallenge, WebAuthnRegistrationChallenge};

/// Storage for [`Identity`] rows.
#[async_trait::async_trait]
pub trait IdentityStore: Send + Sync {
    /// Insert a new identity.
    async fn insert(&self, identity: Identity) -> Result<Identity>;

    /// Look up a remote identity by its natural key `(issuer, subject)`.
    async fn find_by_issuer_subject(&self, issuer: &str, subject: &str) -> Result<Option<Identity>>;

    /// Look up an identity by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Identity>>;

    /// Insert the identity if its natural key is new, otherwise return the
    /// existing row unchanged (re-authenticating with the same provider
    /// account must not create duplicates).
    async fn upsert_remote(&self, issuer: &str, subject: &str, now: chrono::DateTime<chrono::Utc>) -> Result<Identity>;

    /// Delete an identity and cascade to its factors, attempts, and
    /// outstanding one-time codes/PKCE rows.
    async fn delete_cascade(&self, id: Uuid) -> Result<()>;
}

/// Storage for [`Factor`] rows.
#[async_trait::async_trait]
pub trait FactorStore: Send + Sync {
    /// Insert a new factor.
    async fn insert(&self, factor: Factor) -> Result<Factor>;

    /// Replace an existing factor (e.g. a password change, or marking an
    /// email verified).
    async fn update(&self, factor: Factor) -> Result<Factor>;

    /// Look up a factor by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Factor>>;

    /// Every factor owned by `identity_id`, across all kinds. A local
    /// identity has at most one factor per kind, but this returns all of
    /// them so callers (e.g. password reset) need not know which kind.
    async fn find_by_identity_id(&self, identity_id: Uuid) -> Result<Vec<Factor>>;

    /// Every factor sharing `email`, across all kinds and identities.
    async fn find_by_email(&self, email: &str) -> Result<Vec<Factor>>;

    /// The `builtin::local_emailpassword` factor for `email`, if any.
    async fn find_email_password(&self, email: &str) -> Result<Option<Factor>>;

    /// The `builtin::magic_link` factor for `email`, if any.
    async fn find_magic_link(&self, email: &str) -> Result<Option<Factor>>;

    /// Every `WebAuthn` factor for `email`, if any (a user may register
    /// multiple authenticators).
    async fn find_webauthn_by_email(&self, email: &str) -> Result<Vec<Factor>>;

    /// The `WebAuthn` factor matching `credential_id`, if any.
    async fn find_webauthn_by_credential_id(&self, credential_id: &[u8]) -> Result<Option<Factor>>;
}

/// Storage for the short-lived WebAuthn ceremony state, keyed by the
/// email the ceremony is for — at most one registration and one
/// authentication ceremony is in flight per email at a time.
#[async_trait::async_trait]
pub trait WebAuthnChallengeStore: Send + Sync {
    /// Persist a registration ceremony, replacing any prior one for `email`.
    async fn put_registration_challenge(
        &self,
        email: &str,
        user_handle: Vec<u8>,
        ceremony_state: Vec<u8>,
        now: DateTime<Utc>,
    ) -> Result<WebAuthnRegistrationChallenge>;

    /// Atomically read and delete the registration ceremony for `email`.
    async fn take_registration_challenge(&self, email: &str) -> Result<Option<WebAuthnRegistrationChallenge>>;

    /// Persist an authentication ceremony, replacing any prior one for `email`.
    async fn put_authentication_challenge(&self, email: &str, ceremony_state: Vec<u8>, now: DateTime<Utc>) -> Result<WebAuthnAuthenticationChallenge>;

    /// Atomically read and delete the authentication ceremony for `email`.
    async fn take_authentication_challenge(&self, email: &str) -> Result<Option<WebAuthnAuthenticationChallenge>>;
}
