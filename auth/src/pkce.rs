//! PKCE Store.
//!
//! A PKCE row is recorded at authorize/register time, keyed by `challenge =
//! base64url(SHA-256(verifier))`, and claimed exactly once at token-exchange
//! time by a verifier that must hash back to that challenge. `record` is
//! idempotent on `challenge`; `claim` is atomic (the row is deleted in the
//! same operation that reads it back) so a verifier cannot be replayed.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{PKCE_VERIFIER_MAX_LEN, PKCE_VERIFIER_MIN_LEN};
use crate::error::{AuthError, Result};
use crate::state::{PkceChallenge, ProviderTokens, RecordHeader};

/// Storage for PKCE challenge rows, independent of the transport backing it.
#[async_trait::async_trait]
pub trait PkceStore: Send + Sync {
    /// Record a challenge, creating a fresh row if one does not already
    /// exist for it (idempotent — a retried authorize request must not
    /// error).
    async fn record(&self, challenge: &str, now: DateTime<Utc>, expires_at: DateTime<Utc>) -> Result<PkceChallenge>;

    /// Look up a row by its opaque `code` (the row's own id) without
    /// consuming it, for binding an identity/tokens mid-flow.
    async fn find_by_code(&self, code: Uuid) -> Result<Option<PkceChallenge>>;

    /// Bind the resolved identity and provider tokens to the row addressed
    /// by `code`.
    async fn bind(&self, code: Uuid, identity_id: Uuid, tokens: ProviderTokens, now: DateTime<Utc>) -> Result<()>;

    /// Atomically read and delete the row whose `challenge` matches, if any
    /// exists and has not expired.
    async fn claim(&self, challenge: &str, now: DateTime<Utc>) -> Result<Option<PkceChallenge>>;
}

/// Derive the challenge for a client-supplied verifier: `base64url(SHA-256(verifier))`.
#[must_use]
pub fn challenge_for_verifier(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Validate a client-supplied verifier's length (43–128 base64url characters,
/// corresponding to 32–96 random bytes) before it is ever hashed or looked up.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if the verifier's length falls
/// outside `43..=128`.
pub fn validate_verifier_length(verifier: &str) -> Result<()> {
    let len = verifier.len();
    if (PKCE_VERIFIER_MIN_LEN..=PKCE_VERIFIER_MAX_LEN).contains(&len) {
        Ok(())
    } else {
        Err(AuthError::InvalidRequest(
            "PKCE verifier must be between 43 and 128 characters".to_string(),
        ))
    }
}

/// Claim the row bound to `verifier`'s derived challenge, exchanging it for
/// the identity and provider tokens a flow previously bound to it.
///
/// # Errors
/// Returns [`AuthError::InvalidRequest`] if `verifier` fails length
/// validation, or [`AuthError::InvalidGrant`] if no row for its challenge
/// exists, it has expired, or it was never bound to an identity.
pub async fn claim_and_exchange(store: &dyn PkceStore, verifier: &str, now: DateTime<Utc>) -> Result<(Uuid, ProviderTokens)> {
    validate_verifier_length(verifier)?;
    let challenge = challenge_for_verifier(verifier);
    let row = store
        .claim(&challenge, now)
        .await?
        .ok_or(AuthError::InvalidGrant)?;
    let identity_id = row.identity_id.ok_or(AuthError::InvalidGrant)?;
    Ok((identity_id, row.tokens))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryPkceStore {
        rows: Mutex<Vec<PkceChallenge>>,
    }

    #[async_trait::async_trait]
    impl PkceStore for MemoryPkceStore {
        async fn record(&self, challenge: &str, now: DateTime<Utc>, _expires_at: DateTime<Utc>) -> Result<PkceChallenge> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(existing) = rows.iter().find(|r| r.challenge == challenge) {
                return Ok(existing.clone());
            }
            let row = PkceChallenge {
                header: RecordHeader::new(now),
                challenge: challenge.to_string(),
                identity_id: None,
                tokens: ProviderTokens::default(),
            };
            rows.push(row.clone());
            Ok(row)
        }

        async fn find_by_code(&self, code: Uuid) -> Result<Option<PkceChallenge>> {
            Ok(self.rows.lock().unwrap().iter().find(|r| r.header.id == code).cloned())
        }

        async fn bind(&self, code: Uuid, identity_id: Uuid, tokens: ProviderTokens, now: DateTime<Utc>) -> Result<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|r| r.header.id == code) {
                row.identity_id = Some(identity_id);
                row.tokens = tokens;
                row.header.modified_at = now;
            }
            Ok(())
        }

        async fn claim(&self, challenge: &str, _now: DateTime<Utc>) -> Result<Option<PkceChallenge>> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(pos) = rows.iter().position(|r| r.challenge == challenge) {
                Ok(Some(rows.remove(pos)))
            } else {
                Ok(None)
            }
        }
    }

    fn verifier() -> String {
        "a".repeat(43)
    }

    #[tokio::test]
    async fn record_is_idempotent() {
        let store = MemoryPkceStore::default();
        let now = Utc::now();
        let challenge = challenge_for_verifier(&verifier());
        let first = store.record(&challenge, now, now).await.unwrap();
        let second = store.record(&challenge, now, now).await.unwrap();
        assert_eq!(first.header.id, second.header.id);
    }

    #[tokio::test]
    async fn claim_after_bind_succeeds_once() {
        let store = MemoryPkceStore::default();
        let now = Utc::now();
        let verifier = verifier();
        let challenge = challenge_for_verifier(&verifier);
        let row = store.record(&challenge, now, now).await.unwrap();
        let identity_id = Uuid::new_v4();
        store
            .bind(row.header.id, identity_id, ProviderTokens::default(), now)
            .await
            .unwrap();

        let (bound_identity, _) = claim_and_exchange(&store, &verifier, now).await.unwrap();
        assert_eq!(bound_identity, identity_id);

        let err = claim_and_exchange(&store, &verifier, now).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidGrant);
    }

    #[tokio::test]
    async fn claim_unbound_row_fails() {
        let store = MemoryPkceStore::default();
        let now = Utc::now();
        let verifier = verifier();
        let challenge = challenge_for_verifier(&verifier);
        store.record(&challenge, now, now).await.unwrap();
        let err = claim_and_exchange(&store, &verifier, now).await.unwrap_err();
        assert_eq!(err, AuthError::InvalidGrant);
    }

    #[tokio::test]
    async fn short_verifier_is_rejected_before_lookup() {
        let store = MemoryPkceStore::default();
        let err = claim_and_exchange(&store, "short", Utc::now()).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }
}
