//! Local Password provider.
//!
//! Passwords are hashed with Argon2id at the crate's default parameters.
//! A reset token embeds `base64(SHA-256(password_hash))` at mint time, so it
//! self-invalidates the moment the password changes without needing a
//! separate revocation list.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::error::{AuthError, Result};
use crate::state::{Factor, Identity, RecordHeader};
use crate::stores::{FactorStore, IdentityStore};
use crate::token::{self, SigningKey, TokenClaims, TokenKind};

/// Hash `password` with Argon2id, returning a PHC-formatted string.
///
/// # Errors
/// Returns [`AuthError::Internal`] if hashing fails (out-of-memory or a
/// malformed salt; cannot happen under normal operation).
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::Internal)
}

/// Verify `password` against a stored PHC `hash`.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] (never a more specific error,
/// so account existence is never disclosed) if the password does not match
/// or `hash` is not a well-formed PHC string.
pub fn verify_password(password: &str, hash: &str) -> Result<()> {
    let parsed = PasswordHash::new(hash).map_err(|_| AuthError::AuthenticationFailed)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AuthError::AuthenticationFailed)
}

fn reset_secret(password_hash: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password_hash.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Register a new local identity with an email+password factor.
///
/// Creates the `Identity::Local` and `Factor::EmailPassword` rows. Whether
/// verification is required is the caller's (`crate::flows`) concern — this
/// function only persists the rows and leaves `verified_at` unset.
///
/// # Errors
/// Returns [`AuthError::Conflict`] if `email` is already registered, or
/// whatever the backing stores return.
pub async fn register(
    identities: &dyn IdentityStore,
    factors: &dyn FactorStore,
    email: &str,
    password: &str,
    now: DateTime<Utc>,
) -> Result<(Identity, Factor)> {
    if factors.find_email_password(email).await?.is_some() {
        return Err(AuthError::Conflict(format!("{email} is already registered")));
    }

    let identity = identities
        .insert(Identity::Local {
            header: RecordHeader::new(now),
            subject: String::new(),
        })
        .await?;

    let password_hash = hash_password(password)?;
    let factor = factors
        .insert(Factor::EmailPassword {
            header: RecordHeader::new(now),
            identity_id: identity.id(),
            email: email.to_string(),
            password_hash,
            verified_at: None,
        })
        .await?;

    Ok((identity, factor))
}

/// Authenticate `email`/`password`, returning the owning identity on success.
///
/// # Errors
/// Returns [`AuthError::AuthenticationFailed`] if no email+password factor
/// exists for `email` or the password does not match.
pub async fn authenticate(identities: &dyn IdentityStore, factors: &dyn FactorStore, email: &str, password: &str) -> Result<Identity> {
    let factor = factors
        .find_email_password(email)
        .await?
        .ok_or(AuthError::AuthenticationFailed)?;
    let Factor::EmailPassword {
        identity_id, password_hash, ..
    } = &factor
    else {
        return Err(AuthError::AuthenticationFailed);
    };
    verify_password(password, password_hash)?;
    identities
        .find_by_id(*identity_id)
        .await?
        .ok_or(AuthError::AuthenticationFailed)
}

/// Mint a password-reset token for `email`, if a factor exists.
///
/// Returns `Ok(None)` when no factor exists for `email` — the caller must
/// still report success to the client so account existence is never
/// disclosed to a caller probing for registered emails. `challenge` is
/// embedded in the token so a completed reset can bind a PKCE row without a
/// second round trip.
///
/// # Errors
/// Propagates whatever the backing [`FactorStore`] returns.
pub async fn send_reset(
    factors: &dyn FactorStore,
    signing_key: &SigningKey,
    base_url: &str,
    email: &str,
    challenge: &str,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<Option<String>> {
    let Some(factor) = factors.find_email_password(email).await? else {
        return Ok(None);
    };
    let Factor::EmailPassword {
        identity_id, password_hash, ..
    } = &factor
    else {
        return Ok(None);
    };
    let claims = TokenClaims::Reset {
        identity_id: *identity_id,
        secret: reset_secret(password_hash),
        challenge: challenge.to_string(),
    };
    let signed = token::sign(signing_key, base_url, claims, now, ttl)?;
    Ok(Some(signed))
}

/// Redeem a reset token, updating the factor's password.
///
/// Fails closed if the token's embedded `secret` no longer matches the
/// factor's current `password_hash` digest — i.e. the password already
/// changed since the token was minted. Returns the identity and the
/// challenge the token was minted with, so the caller can bind a PKCE row.
///
/// # Errors
/// Returns [`AuthError::InvalidData`] if the token is invalid, expired, or
/// stale, or [`AuthError::Internal`] if the bound factor has vanished.
pub async fn reset(
    factors: &dyn FactorStore,
    signing_key: &SigningKey,
    base_url: &str,
    reset_token: &str,
    new_password: &str,
    now: DateTime<Utc>,
) -> Result<(uuid::Uuid, String)> {
    let claims = token::verify(signing_key, base_url, TokenKind::Reset, reset_token, now)?;
    let TokenClaims::Reset {
        identity_id,
        secret,
        challenge,
    } = claims
    else {
        return Err(AuthError::InvalidData("Invalid state token".to_string()));
    };

    let factor = factors
        .find_by_identity_id(identity_id)
        .await?
        .into_iter()
        .find(|f| matches!(f, Factor::EmailPassword { .. }))
        .ok_or(AuthError::Internal)?;
    let Factor::EmailPassword { password_hash, .. } = &factor else {
        return Err(AuthError::Internal);
    };
    if reset_secret(password_hash) != secret {
        return Err(AuthError::InvalidData("Invalid state token".to_string()));
    }

    let Factor::EmailPassword {
        header,
        identity_id,
        email,
        verified_at,
        ..
    } = factor
    else {
        return Err(AuthError::Internal);
    };
    let updated = Factor::EmailPassword {
        header: RecordHeader {
            modified_at: now,
            ..header
        },
        identity_id,
        email,
        password_hash: hash_password(new_password)?,
        verified_at: verified_at.or(Some(now)),
    };
    factors.update(updated).await?;
    Ok((identity_id, challenge))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn hash_then_verify_round_trips() {
        let hash = hash_password("correct horse battery staple").unwrap();
        verify_password("correct horse battery staple", &hash).unwrap();
    }

    #[test]
    fn wrong_password_is_authentication_failed() {
        let hash = hash_password("correct horse battery staple").unwrap();
        let err = verify_password("wrong", &hash).unwrap_err();
        assert_eq!(err, AuthError::AuthenticationFailed);
    }

    #[test]
    fn reset_secret_changes_with_password_hash() {
        let h1 = hash_password("p1").unwrap();
        let h2 = hash_password("p2").unwrap();
        assert_ne!(reset_secret(&h1), reset_secret(&h2));
    }
}
